use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Identity of a rule inside a benchmark, carried by normalization errors so
/// operators can find the offending upstream entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleIdentity {
    pub stig_id: Option<String>,
    pub rule_id: Option<String>,
}

impl fmt::Display for RuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stig id {} / rule id {}",
            self.stig_id.as_deref().unwrap_or("<unknown>"),
            self.rule_id.as_deref().unwrap_or("<unknown>")
        )
    }
}

fn rule_suffix(rule: &Option<RuleIdentity>) -> String {
    rule.as_ref()
        .map(|identity| format!(" ({})", identity))
        .unwrap_or_default()
}

/// Main error type covering every stage of ingestion and querying
#[derive(Error, Debug)]
pub enum StigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {url} - {details}")]
    Network { url: String, details: String },

    #[error("Request timeout: {url} after {timeout_seconds} seconds")]
    Timeout { url: String, timeout_seconds: u64 },

    #[error("Invalid archive URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("No entry matching '{pattern}' found in archive {}", archive.display())]
    ExtractionNotFound { archive: PathBuf, pattern: String },

    #[error("Archive error: {} - {details}", archive.display())]
    Archive { archive: PathBuf, details: String },

    #[error("Markup repair failed: {details}")]
    Sanitize { details: String },

    #[error("XML parsing error: {details}")]
    Parse { details: String },

    #[error("Normalization failed for benchmark '{benchmark}'{}: {reason}", rule_suffix(.rule))]
    Normalization {
        benchmark: String,
        rule: Option<RuleIdentity>,
        reason: String,
    },

    #[error("Invalid query: {0}")]
    QueryValidation(String),

    #[error("No benchmark found for {selector}")]
    BenchmarkNotFound { selector: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Output rendering failed: {0}")]
    Render(#[source] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StigError {
    /// Attach the benchmark title to a rule-level normalization error.
    pub(crate) fn in_benchmark(self, title: &str) -> Self {
        match self {
            StigError::Normalization { rule, reason, .. } => StigError::Normalization {
                benchmark: title.to_string(),
                rule,
                reason,
            },
            other => other,
        }
    }

    /// Whether the error is a caller mistake rather than an operational failure
    pub fn is_usage_error(&self) -> bool {
        matches!(self, StigError::QueryValidation(_))
    }
}

impl From<ConfigError> for StigError {
    fn from(err: ConfigError) -> Self {
        StigError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StigError {
    fn from(err: tokio::task::JoinError) -> Self {
        StigError::Task(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, StigError>;
