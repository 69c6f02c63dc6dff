use crate::cli::Cli;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

const APP_DIR: &str = "stig";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub network: NetworkConfig,
    pub store: StoreConfig,
    pub extract: ExtractConfig,
    pub ingest: IngestConfig,
}

/// Archive download cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding downloaded archives, keyed by file name
    pub directory: PathBuf,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Download timeout in seconds, measured from the moment the body opens
    pub timeout_seconds: u64,
    pub user_agent: String,
}

/// Record store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot location
    pub path: PathBuf,
    /// First id handed out by a fresh store
    pub id_origin: u64,
}

/// Archive extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractConfig {
    /// Case-insensitive pattern naming the checklist document entry
    pub document_pattern: String,
    /// File name markers of archive families that nest the document in an inner ZIP
    pub nested_archive_families: Vec<String>,
}

/// Ingestion run configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of archives ingested at once
    pub concurrency: Option<usize>,
    /// Scratch directory for extracted documents
    pub work_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            user_agent: format!("stig-ingest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
                .join("store.json"),
            id_origin: 0,
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            document_pattern: r"(?i)manual-xccdf\.xml$".to_string(),
            nested_archive_families: vec!["Cisco".to_string()],
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            work_dir: std::env::temp_dir().join(APP_DIR),
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = match &cli.config {
            Some(config_path) => Self::load_from_file(config_path).await?,
            None => Self::find_config_file().await?.unwrap_or_default(),
        };

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => match toml::from_str::<Config>(&content) {
                Ok(config) => Ok(config),
                Err(_) => Ok(serde_json::from_str(&content)?),
            },
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = ["stig.toml", "stig.json", ".stig.toml", ".stig.json"];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join(APP_DIR);
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(cache_dir) = env.get("STIG_CACHE_DIR") {
            config.cache.directory = PathBuf::from(cache_dir);
        }

        if let Some(timeout) = env.get("STIG_TIMEOUT") {
            config.network.timeout_seconds = parse_env("STIG_TIMEOUT", &timeout)?;
        }

        if let Some(user_agent) = env.get("STIG_USER_AGENT") {
            config.network.user_agent = user_agent;
        }

        if let Some(store_path) = env.get("STIG_STORE_PATH") {
            config.store.path = PathBuf::from(store_path);
        }

        if let Some(origin) = env.get("STIG_ID_ORIGIN") {
            config.store.id_origin = parse_env("STIG_ID_ORIGIN", &origin)?;
        }

        if let Some(pattern) = env.get("STIG_DOCUMENT_PATTERN") {
            config.extract.document_pattern = pattern;
        }

        if let Some(families) = env.get("STIG_NESTED_FAMILIES") {
            config.extract.nested_archive_families = families
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(concurrency) = env.get("STIG_CONCURRENCY") {
            config.ingest.concurrency = Some(parse_env("STIG_CONCURRENCY", &concurrency)?);
        }

        if let Some(work_dir) = env.get("STIG_WORK_DIR") {
            config.ingest.work_dir = PathBuf::from(work_dir);
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(cache_dir) = &cli.cache_dir {
            config.cache.directory = cache_dir.clone();
        }
        if let Some(store) = &cli.store {
            config.store.path = store.clone();
        }
        if let Some(timeout) = cli.timeout {
            config.network.timeout_seconds = timeout;
        }
        if cli.concurrency.is_some() {
            config.ingest.concurrency = cli.concurrency;
        }

        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.network.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(concurrency) = config.ingest.concurrency {
            if concurrency == 0 {
                return Err(ConfigError::Validation(
                    "Concurrency must be greater than 0".to_string(),
                ));
            }
            if concurrency > 256 {
                return Err(ConfigError::Validation(
                    "Concurrency cannot exceed 256".to_string(),
                ));
            }
        }

        if config.extract.document_pattern.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Document pattern must not be empty".to_string(),
            ));
        }

        if let Err(e) = regex::Regex::new(&config.extract.document_pattern) {
            return Err(ConfigError::Validation(format!(
                "Invalid document pattern: {}",
                e
            )));
        }

        if config.cache.directory.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Cache directory must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the effective ingest concurrency
    pub fn get_concurrency(config: &Config) -> usize {
        config.ingest.concurrency.unwrap_or_else(num_cpus::get)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
}
