//! Normalized record shapes shared by the pipeline, the store and queries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Categorical risk level of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::High, Severity::Medium, Severity::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// A benchmark as produced by normalization, before the store assigns an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBenchmark {
    pub title: String,
    pub description: Option<String>,
    pub version: i64,
    pub release: i64,
    pub date: DateTime<Utc>,
}

/// A rule as produced by normalization, before it is tied to a benchmark id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    pub stig_id: String,
    pub rule_id: String,
    pub severity: Severity,
    pub version: Option<String>,
    pub title: String,
    pub description: String,
    pub fix_text: String,
    pub check_text: String,
}

/// Persisted benchmark record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    pub id: u64,
    pub title: String,
    pub description: Option<String>,
    pub version: i64,
    pub release: i64,
    pub date: DateTime<Utc>,
}

impl Benchmark {
    pub fn from_new(id: u64, new: NewBenchmark) -> Self {
        Self {
            id,
            title: new.title,
            description: new.description,
            version: new.version,
            release: new.release,
            date: new.date,
        }
    }
}

/// Persisted rule record, owned by the benchmark named by `benchmark_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub stig_id: String,
    pub rule_id: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub title: String,
    pub description: String,
    pub fix_text: String,
    pub check_text: String,
    pub benchmark_id: u64,
}

impl Rule {
    pub fn from_new(benchmark_id: u64, new: NewRule) -> Self {
        Self {
            stig_id: new.stig_id,
            rule_id: new.rule_id,
            severity: new.severity,
            version: new.version,
            title: new.title,
            description: new.description,
            fix_text: new.fix_text,
            check_text: new.check_text,
            benchmark_id,
        }
    }
}
