use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{Result, ShieldError};

/// Initialize structured logging system.
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    // Set up environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ShieldError::InvalidConfig(format!("Failed to create log filter: {e}")))?;

    // Console layer on stderr so stdout stays free for command output
    let console_layer = if config.format == "json" {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .json()
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true)
            .with_thread_names(true)
            .boxed()
    };

    let (file_layer, guard) = match config.file_path.as_deref().map(Path::new) {
        Some(log_path) => {
            let directory = log_path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = log_path
                .file_name()
                .map_or_else(|| "sms-shield.log".into(), |name| name.to_string_lossy().into_owned());
            let (writer, guard) = non_blocking(rolling::daily(directory, file_name));

            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .boxed();
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ShieldError::Other(format!("Failed to install log subscriber: {e}")))?;

    info!(level = %config.level, file = ?config.file_path, "Logging system initialized");
    Ok(guard)
}

/// Logs how long a named operation took
pub struct OperationTimer {
    operation: &'static str,
    start: std::time::Instant,
}

impl OperationTimer {
    /// Start timing `operation`
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: std::time::Instant::now(),
        }
    }

    /// Stop the timer and log the duration at info level
    pub fn finish(self) -> u128 {
        let duration = self.start.elapsed().as_millis();
        tracing::info!(operation = self.operation, duration_ms = duration, "Operation completed");
        crate::metrics::record_operation_duration(self.operation, self.start.elapsed());
        duration
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let duration = self.start.elapsed().as_millis();
            tracing::debug!(operation = self.operation, duration_ms = duration, "Operation finished");
        }
    }
}
