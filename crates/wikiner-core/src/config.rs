//! WikiNER Configuration Management
//!
//! Handles configuration from TOML files and environment variables,
//! with defaults matching the public Wikimedia endpoints and the
//! Wikidata Query Service usage policy.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// User-Agent sent with every request to Wikimedia services
    pub user_agent: String,

    /// Wikipedia (title -> QID) lookup
    pub wikipedia: WikipediaConfig,

    /// Wikidata claims API and SPARQL endpoint
    pub wikidata: WikidataConfig,

    /// Worker pool settings
    pub pipeline: PipelineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("wikiner/", env!("CARGO_PKG_VERSION")).to_string(),
            wikipedia: WikipediaConfig::default(),
            wikidata: WikidataConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Apply environment variables (env takes precedence over file values)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        if let Ok(agent) = std::env::var("WIKINER_USER_AGENT") {
            self.user_agent = agent;
        }

        // Wikipedia
        if let Ok(lang) = std::env::var("WIKINER_LANG") {
            self.wikipedia.language = lang;
        }
        if let Ok(template) = std::env::var("WIKINER_WIKIPEDIA_API") {
            self.wikipedia.api_url_template = template;
        }

        // Wikidata
        if let Ok(url) = std::env::var("WIKINER_SPARQL_URL") {
            self.wikidata.sparql_url = url;
        }
        if let Ok(url) = std::env::var("WIKINER_CLAIMS_API") {
            self.wikidata.claims_api_url = url;
        }
        if let Some(limit) = parse_env("WIKINER_MAX_CONCURRENT_QUERIES")? {
            self.wikidata.max_concurrent_queries = limit;
        }
        if let Some(attempts) = parse_env("WIKINER_MAX_ATTEMPTS")? {
            self.wikidata.max_attempts = attempts;
        }

        // Pipeline
        if let Some(workers) = parse_env("WIKINER_WORKERS")? {
            self.pipeline.workers = workers;
        }
        if let Some(secs) = parse_env("WIKINER_PROGRESS_INTERVAL_SECS")? {
            self.pipeline.progress_interval_secs = secs;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env("LOG_JSON")? {
            self.logging.json_format = json;
        }

        Ok(self)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wikipedia.language.trim().is_empty() {
            return Err(ConfigError::MissingRequired("wikipedia.language".to_string()));
        }
        if self.pipeline.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.workers".to_string(),
                value: "0".to_string(),
            });
        }
        if self.wikidata.max_concurrent_queries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "wikidata.max_concurrent_queries".to_string(),
                value: "0".to_string(),
            });
        }
        if self.wikidata.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "wikidata.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Wikipedia page-properties lookup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikipediaConfig {
    /// Wikipedia language code (e.g. "hi", "en")
    pub language: String,

    /// Action API URL; `{lang}` is replaced by the language code
    pub api_url_template: String,

    /// Lookup timeout in seconds
    pub timeout_secs: u64,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            api_url_template: "https://{lang}.wikipedia.org/w/api.php".to_string(),
            timeout_secs: 5,
        }
    }
}

impl WikipediaConfig {
    /// Action API URL for the configured language
    pub fn api_url(&self) -> String {
        self.api_url_template.replace("{lang}", &self.language)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Wikidata endpoints and query-service etiquette
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikidataConfig {
    /// SPARQL query service endpoint
    pub sparql_url: String,

    /// Wikidata action API (used for `wbgetclaims`)
    pub claims_api_url: String,

    /// Claim lookup timeout in seconds
    pub claims_timeout_secs: u64,

    /// SPARQL request timeout in seconds
    pub query_timeout_secs: u64,

    /// Maximum SPARQL requests in flight (service limit per client)
    pub max_concurrent_queries: usize,

    /// Attempts per logical query before giving up
    pub max_attempts: u32,

    /// Cooldown when a 429 carries no usable Retry-After, in seconds
    pub default_retry_after_secs: u64,

    /// Added to every advertised retry delay, in milliseconds
    pub cooldown_margin_ms: u64,

    /// Longest cooldown honoured, whatever Retry-After says, in seconds
    pub max_cooldown_secs: u64,

    /// Upper bound of the random pause after a timed-out attempt, in milliseconds
    pub timeout_jitter_ms: u64,
}

impl Default for WikidataConfig {
    fn default() -> Self {
        Self {
            sparql_url: "https://query.wikidata.org/sparql".to_string(),
            claims_api_url: "https://www.wikidata.org/w/api.php".to_string(),
            claims_timeout_secs: 10,
            query_timeout_secs: 20,
            max_concurrent_queries: 5,
            max_attempts: 5,
            default_retry_after_secs: 30,
            cooldown_margin_ms: 1000,
            max_cooldown_secs: 300,
            timeout_jitter_ms: 2000,
        }
    }
}

impl WikidataConfig {
    pub fn claims_timeout(&self) -> Duration {
        Duration::from_secs(self.claims_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of parallel workers (one shard each)
    pub workers: usize,

    /// Delay between starting consecutive workers, in milliseconds
    pub spawn_stagger_ms: u64,

    /// Seconds between aggregate progress reports
    pub progress_interval_secs: u64,

    /// File name of the mapping written into the output directory
    pub output_file_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            spawn_stagger_ms: 500,
            progress_interval_secs: 60,
            output_file_name: "ner_list.json".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn spawn_stagger(&self) -> Duration {
        Duration::from_millis(self.spawn_stagger_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
