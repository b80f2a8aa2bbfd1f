//! Tests for logging setup. The global subscriber can only be installed
//! once per process, so everything lives in a single test.

use std::fs;

use tempfile::tempdir;

use sms_shield::config::LoggingConfig;
use sms_shield::logging::{init_logging, OperationTimer};

#[test]
fn test_init_logging_writes_file_and_installs_once() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let log_path = temp_dir.path().join("shield.log");
    let config = LoggingConfig {
        level: "debug".to_string(),
        file_path: Some(log_path.to_string_lossy().into_owned()),
        format: "json".to_string(),
    };

    let guard = init_logging(&config).expect("Failed to initialize logging");
    assert!(guard.is_some());

    let timer = OperationTimer::new("logging_test");
    let elapsed = timer.finish();
    assert!(elapsed < 60_000);

    // A second subscriber is refused
    assert!(init_logging(&LoggingConfig::default()).is_err());

    drop(guard);
    let written: Vec<_> = fs::read_dir(temp_dir.path())
        .expect("Failed to read log directory")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("shield.log"))
        .collect();
    assert!(!written.is_empty());
}
