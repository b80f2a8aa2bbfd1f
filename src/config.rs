use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShieldError};

/// Upper bound on `classifier.max_retries`
pub const MAX_CLASSIFIER_RETRIES: u32 = 10;

/// Application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Message store settings
    pub database: DatabaseConfig,
    /// Log output settings
    pub logging: LoggingConfig,
    /// Remote classifier transport
    pub classifier: ClassifierConfig,
    /// Device network check
    pub connectivity: ConnectivityConfig,
    /// Bulk and live ingestion
    pub ingestion: IngestionConfig,
    /// Classification batching
    pub pipeline: PipelineConfig,
    /// Durable retry queue
    pub retry_queue: RetryQueueConfig,
    /// Page size bounds
    pub paging: PagingConfig,
}

/// Message store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path, optionally prefixed with `sqlite:`
    pub url: String,
    /// Pool size
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    pub connection_timeout_secs: u64,
    /// SQLite busy timeout in milliseconds
    pub busy_timeout_ms: u64,
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Optional file receiving JSON logs, rotated daily
    pub file_path: Option<String>,
    /// "json" or "text" for the console
    pub format: String,
}

/// Remote classifier transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Endpoint receiving `{message, sender}` posts
    pub url: String,
    /// Timeout of the first attempt
    pub timeout_secs: u64,
    /// Extra attempts after the first one
    pub max_retries: u32,
    /// Factor applied to the timeout on each retry
    pub backoff_multiplier: f64,
    /// Run the heuristic when the classifier is unreachable while online.
    /// When false such messages are deferred to the retry queue instead.
    pub fallback_on_transport_error: bool,
}

/// Bulk and live ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Maximum records scanned by the first-run import
    pub bulk_limit: usize,
    /// Records between progress reports
    pub progress_interval: usize,
    /// JSON file used as the message source by the CLI
    pub source_path: String,
    /// CSV file used as the contact directory by the CLI
    pub directory_path: String,
}

/// Classification batching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Oldest unchecked messages classified per trigger
    pub batch_cap: usize,
}

/// Durable retry queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryQueueConfig {
    /// sled database directory
    pub path: String,
    /// Tree holding the queued ids
    pub namespace: String,
    /// Attempts before the final heuristic attempt
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_backoff_secs: u64,
    /// Upper bound on the delay between attempts
    pub max_backoff_secs: u64,
}

/// Device network check. The check targets a general-purpose endpoint, not
/// the classifier, so an unreachable classifier is a transport failure
/// rather than "offline".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// URL answered by any reachable network. Empty disables the check and
    /// the device is assumed online.
    pub check_url: String,
    /// Check timeout
    pub timeout_secs: u64,
}

/// Page size bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Limit used when the caller asks for zero rows
    pub default_limit: usize,
    /// Hard upper bound on a page
    pub max_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/messages.db".to_string(),
            max_connections: 8,
            connection_timeout_secs: 30,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            format: "text".to_string(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: "https://smsshieldbackend.onrender.com/analyze".to_string(),
            timeout_secs: 15,
            max_retries: 2,
            backoff_multiplier: 1.5,
            fallback_on_transport_error: true,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            check_url: "http://connectivitycheck.gstatic.com/generate_204".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            bulk_limit: 500,
            progress_interval: 50,
            source_path: "data/inbox.json".to_string(),
            directory_path: "data/contacts.csv".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { batch_cap: 10 }
    }
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            path: "data/retry_queue".to_string(),
            namespace: "message_check_queue".to_string(),
            max_attempts: 8,
            base_backoff_secs: 30,
            max_backoff_secs: 3_600,
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 500,
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the default
    /// locations. Environment variables such as
    /// `SMS_SHIELD_CLASSIFIER__TIMEOUT_SECS` override every file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&Self::default())
            .map_err(|e| ShieldError::InvalidConfig(format!("Failed to build defaults: {e}")))?;

        let mut builder = Config::builder()
            // Start with default values
            .add_source(defaults)
            // Add config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("sms_shield").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            // Add environment variables with prefix
            .add_source(
                Environment::with_prefix("SMS_SHIELD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ShieldError::InvalidConfig(format!("Failed to load configuration: {e}")))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| ShieldError::InvalidConfig(format!("Failed to deserialize configuration: {e}")))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ShieldError::InvalidConfig(msg.to_string()));

        // Validate database config
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be greater than 0");
        }
        if self.database.connection_timeout_secs == 0 {
            return invalid("database.connection_timeout_secs must be greater than 0");
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ShieldError::InvalidConfig(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ShieldError::InvalidConfig(format!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format, valid_formats
            )));
        }

        // Validate classifier config
        if self.classifier.url.trim().is_empty() {
            return invalid("classifier.url must not be empty");
        }
        if self.classifier.timeout_secs == 0 {
            return invalid("classifier.timeout_secs must be greater than 0");
        }
        if !self.classifier.backoff_multiplier.is_finite() || self.classifier.backoff_multiplier < 1.0 {
            return invalid("classifier.backoff_multiplier must be a finite number of at least 1.0");
        }
        if self.classifier.max_retries > MAX_CLASSIFIER_RETRIES {
            return Err(ShieldError::InvalidConfig(format!(
                "classifier.max_retries must not exceed {MAX_CLASSIFIER_RETRIES}"
            )));
        }
        if self.connectivity.timeout_secs == 0 {
            return invalid("connectivity.timeout_secs must be greater than 0");
        }

        // Validate ingestion and pipeline config
        if self.ingestion.bulk_limit == 0 {
            return invalid("ingestion.bulk_limit must be greater than 0");
        }
        if self.ingestion.progress_interval == 0 {
            return invalid("ingestion.progress_interval must be greater than 0");
        }
        if self.pipeline.batch_cap == 0 {
            return invalid("pipeline.batch_cap must be greater than 0");
        }

        // Validate retry queue config
        if self.retry_queue.namespace.trim().is_empty() {
            return invalid("retry_queue.namespace must not be empty");
        }
        if self.retry_queue.max_attempts == 0 {
            return invalid("retry_queue.max_attempts must be greater than 0");
        }
        if self.retry_queue.base_backoff_secs > self.retry_queue.max_backoff_secs {
            return invalid("retry_queue.base_backoff_secs must not exceed max_backoff_secs");
        }

        // Validate paging config
        if self.paging.default_limit == 0 || self.paging.default_limit > self.paging.max_limit {
            return invalid("paging.default_limit must be between 1 and paging.max_limit");
        }

        Ok(())
    }

    /// Get database URL from environment or config
    #[must_use]
    pub fn get_database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }

    /// Get log level from environment or config
    #[must_use]
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}
