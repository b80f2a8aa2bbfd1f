//! Error types for the sms-shield library.
//!
//! Every failure in the ingestion, storage and classification paths maps onto
//! one `ShieldError` variant. None of them is fatal to the process: transport
//! and parse failures degrade to the local heuristic, missing rows are treated
//! as already handled, and source failures abort only the current pass.

use thiserror::Error;

/// Errors that can occur in the sms-shield library.
#[derive(Error, Debug)]
pub enum ShieldError {
    /// The remote classifier could not be reached, timed out, or answered
    /// with a non-success status
    #[error("Classifier transport error: {0}")]
    Transport(String),

    /// A classifier response had an unexpected shape
    #[error("Classifier response parse error: {0}")]
    Parse(String),

    /// A message or contact vanished mid-operation
    #[error("Not found: {0}")]
    NotFound(String),

    /// The external message source or contact directory could not be read
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Retry queue storage errors
    #[error("Retry queue error: {0}")]
    Queue(#[from] sled::Error),

    /// Binary serialization errors
    #[error("Binary serialization error: {0}")]
    Encoding(#[from] bincode::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller supplied an invalid value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

impl ShieldError {
    /// Short, stable label used for metrics and structured logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Parse(_) => "parse",
            Self::NotFound(_) => "not_found",
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::Database(_) | Self::Pool(_) => "database",
            Self::Queue(_) | Self::Encoding(_) => "queue",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Other(_) => "other",
        }
    }
}

/// Convenience type alias for Result with `ShieldError`
pub type Result<T> = std::result::Result<T, ShieldError>;

impl From<anyhow::Error> for ShieldError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<csv::Error> for ShieldError {
    fn from(err: csv::Error) -> Self {
        Self::SourceUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for ShieldError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
