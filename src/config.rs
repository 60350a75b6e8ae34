//! Configuration for the indexer and its collaborators.
//!
//! Settings are resolved in the following order (later wins):
//!
//! 1. Compiled defaults
//! 2. TOML config file
//! 3. Environment variables (`FAQSMITH_*`, with `.env` support via dotenvy)
//!
//! ## Example
//!
//! ```rust,ignore
//! use faqsmith::config::IndexerConfig;
//!
//! let config = IndexerConfig::builder()
//!     .with_file("faqsmith.toml")
//!     .with_env()
//!     .build()?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors that can occur while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file at {path}: {source}")]
    FileRead {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed.
    #[error("failed to parse environment variable {key}: {message}")]
    EnvParse {
        /// Environment variable key.
        key: String,
        /// What went wrong.
        message: String,
    },

    /// The resolved configuration is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Sections ───────────────────────────────────────────────────────────

/// Where and how to collect source content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source page URL handed to the extractor.
    pub url: String,
    /// Minimum number of extracted units required before a run is trusted.
    /// An extraction below this threshold aborts the run without mutating
    /// anything — the guard against wiping the index on a transient source
    /// outage.
    pub min_units: usize,
    /// Per-call extractor timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            min_units: 1,
            timeout_secs: 30,
        }
    }
}

/// Embedding service connection and batching limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings endpoint.
    pub endpoint: String,
    /// Model name sent with each request.
    pub model: String,
    /// Expected embedding dimensionality.
    pub dimensions: usize,
    /// Maximum inputs per request, bounded to respect the service's limits.
    pub batch_size: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retry attempts for 429/5xx and transport errors.
    pub max_retries: usize,
    /// API key; usually supplied via `FAQSMITH_EMBEDDING_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 64,
            timeout_secs: 30,
            max_retries: 3,
            api_key: None,
        }
    }
}

/// Vector store location and retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path for the bundled backend.
    pub path: String,
    /// Retry attempts for transient store failures.
    pub retry_attempts: usize,
    /// Base delay for exponential backoff, in milliseconds.
    pub retry_base_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "faqsmith.db".to_string(),
            retry_attempts: 3,
            retry_base_ms: 200,
        }
    }
}

/// Periodic trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scheduled indexing runs.
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
        }
    }
}

// ── IndexerConfig ──────────────────────────────────────────────────────

/// Top-level configuration for an indexing deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub source: SourceConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    /// Path of the persisted tracked-state file.
    pub state_path: Option<String>,
}

impl IndexerConfig {
    /// Starts building a configuration from compiled defaults.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Embedding request timeout as a [`Duration`].
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.timeout_secs)
    }

    /// Scheduler interval as a [`Duration`].
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_secs)
    }

    /// Checks invariants the rest of the system relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a knob is out of range or the
    /// source URL does not parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding.batch_size must be at least 1".into(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimensions must be at least 1".into(),
            ));
        }
        if self.embedding.timeout_secs == 0 || self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be nonzero".into()));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.interval_secs must be nonzero".into(),
            ));
        }
        if !self.source.url.is_empty() {
            Url::parse(&self.source.url).map_err(|err| {
                ConfigError::Invalid(format!("source.url '{}': {err}", self.source.url))
            })?;
        }
        Ok(())
    }
}

// ── ConfigBuilder ──────────────────────────────────────────────────────

/// Builder resolving defaults, file, and environment into an
/// [`IndexerConfig`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    file_path: Option<PathBuf>,
    use_env: bool,
}

impl ConfigBuilder {
    /// Loads settings from a TOML file. Missing sections keep defaults.
    #[must_use]
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Applies `FAQSMITH_*` environment overrides, loading `.env` first when
    /// present.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Resolves and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the file cannot be read or parsed, an
    /// environment override does not parse, or validation fails.
    pub fn build(self) -> Result<IndexerConfig, ConfigError> {
        let mut config = match &self.file_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::FileRead {
                        path: path.clone(),
                        source,
                    }
                })?;
                toml::from_str(&raw)?
            }
            None => IndexerConfig::default(),
        };

        if self.use_env {
            let _ = dotenvy::dotenv();
            apply_env(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn apply_env(config: &mut IndexerConfig) -> Result<(), ConfigError> {
    if let Ok(url) = std::env::var("FAQSMITH_SOURCE_URL") {
        config.source.url = url;
    }
    if let Some(min_units) = env_parse::<usize>("FAQSMITH_MIN_UNITS")? {
        config.source.min_units = min_units;
    }
    if let Ok(endpoint) = std::env::var("FAQSMITH_EMBEDDING_ENDPOINT") {
        config.embedding.endpoint = endpoint;
    }
    if let Ok(model) = std::env::var("FAQSMITH_EMBEDDING_MODEL") {
        config.embedding.model = model;
    }
    if let Ok(key) = std::env::var("FAQSMITH_EMBEDDING_API_KEY") {
        config.embedding.api_key = Some(key);
    }
    if let Some(dimensions) = env_parse::<usize>("FAQSMITH_EMBEDDING_DIMENSIONS")? {
        config.embedding.dimensions = dimensions;
    }
    if let Some(batch_size) = env_parse::<usize>("FAQSMITH_EMBEDDING_BATCH_SIZE")? {
        config.embedding.batch_size = batch_size;
    }
    if let Ok(path) = std::env::var("FAQSMITH_STORE_PATH") {
        config.store.path = path;
    }
    if let Ok(path) = std::env::var("FAQSMITH_STATE_PATH") {
        config.state_path = Some(path);
    }
    if let Some(interval) = env_parse::<u64>("FAQSMITH_INTERVAL_SECS")? {
        config.scheduler.interval_secs = interval;
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| ConfigError::EnvParse {
                key: key.to_string(),
                message: err.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = IndexerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.source.min_units, 1);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut config = IndexerConfig::default();
        config.embedding.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_source_url_rejected() {
        let mut config = IndexerConfig::default();
        config.source.url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[source]
url = "https://example.com/faq"
min_units = 5

[embedding]
batch_size = 16
"#
        )
        .unwrap();

        let config = IndexerConfig::builder()
            .with_file(file.path())
            .build()
            .unwrap();
        assert_eq!(config.source.url, "https://example.com/faq");
        assert_eq!(config.source.min_units, 5);
        assert_eq!(config.embedding.batch_size, 16);
        // Untouched sections keep defaults.
        assert_eq!(config.scheduler.interval_secs, 3600);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = IndexerConfig::builder()
            .with_file("/nonexistent/faqsmith.toml")
            .build();
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }
}
