//! External message source adapters.
//!
//! The source is the device-side message store that ingestion reads from.
//! Deletion is mirrored to it on a best-effort basis, matching records whose
//! timestamp lies within [`DELETE_WINDOW_MILLIS`] of the stored one.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Result, ShieldError};
use crate::metrics;
use crate::models::SourceRecord;
use crate::validation::normalize_address;

/// Tolerance applied to timestamps when mirroring a delete
pub const DELETE_WINDOW_MILLIS: i64 = 5_000;

/// Read (and best-effort delete) interface over the external message source
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Up to `limit` records, newest first
    async fn scan_newest_first(&self, limit: usize) -> Result<Vec<SourceRecord>>;

    /// Remove records matching sender, body and timestamp (within the
    /// delete window). Returns the number removed; zero is not an error.
    async fn delete(&self, sender: &str, timestamp_millis: i64, body: &str) -> Result<usize>;
}

fn matches_for_delete(record: &SourceRecord, sender: &str, timestamp_millis: i64, body: &str) -> bool {
    record.body == body
        && normalize_address(&record.sender) == sender
        && record.timestamp_millis.abs_diff(timestamp_millis) <= DELETE_WINDOW_MILLIS.unsigned_abs()
}

fn newest_first(mut records: Vec<SourceRecord>, limit: usize) -> Vec<SourceRecord> {
    records.sort_by(|a, b| b.timestamp_millis.cmp(&a.timestamp_millis));
    records.truncate(limit);
    records
}

/// In-memory source for embedding and tests
#[derive(Debug)]
pub struct MemorySource {
    records: Mutex<Vec<SourceRecord>>,
    available: Mutex<bool>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            available: Mutex::new(true),
        }
    }
}

impl MemorySource {
    /// Source holding `records`
    #[must_use]
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Append a record
    pub fn push(&self, record: SourceRecord) {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record);
    }

    /// Current records in insertion order
    #[must_use]
    pub fn records(&self) -> Vec<SourceRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Simulate the source becoming unreadable (e.g. permission revoked)
    pub fn set_available(&self, available: bool) {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner) = available;
    }

    fn ensure_available(&self) -> Result<()> {
        if *self.available.lock().unwrap_or_else(PoisonError::into_inner) {
            Ok(())
        } else {
            Err(ShieldError::SourceUnavailable("message source is not readable".into()))
        }
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn scan_newest_first(&self, limit: usize) -> Result<Vec<SourceRecord>> {
        self.ensure_available()?;
        Ok(newest_first(self.records(), limit))
    }

    async fn delete(&self, sender: &str, timestamp_millis: i64, body: &str) -> Result<usize> {
        self.ensure_available()?;
        let sender = normalize_address(sender);
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|r| !matches_for_delete(r, &sender, timestamp_millis, body));
        Ok(before - records.len())
    }
}

/// Source backed by a JSON array of `{sender, body, timestampMillis, direction}`
/// records. Deletes rewrite the file.
#[derive(Debug)]
pub struct JsonFileSource {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileSource {
    /// Source reading `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_records(&self) -> Result<Vec<SourceRecord>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ShieldError::SourceUnavailable(format!("message source {}: {e}", self.path.display())))?;

        let values: Vec<serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| ShieldError::SourceUnavailable(format!("message source {}: {e}", self.path.display())))?;

        let mut records = Vec::with_capacity(values.len());
        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<SourceRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(index, error = %e, "Skipping unreadable source record");
                    metrics::record_skipped("malformed");
                },
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl MessageSource for JsonFileSource {
    async fn scan_newest_first(&self, limit: usize) -> Result<Vec<SourceRecord>> {
        let records = self.read_records().await?;
        debug!(path = %self.path.display(), total = records.len(), limit, "Scanned message source");
        Ok(newest_first(records, limit))
    }

    async fn delete(&self, sender: &str, timestamp_millis: i64, body: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let sender = normalize_address(sender);

        let mut records = self.read_records().await?;
        let before = records.len();
        records.retain(|r| !matches_for_delete(r, &sender, timestamp_millis, body));
        let removed = before - records.len();

        if removed > 0 {
            let json = serde_json::to_string_pretty(&records)?;
            tokio::fs::write(&self.path, json).await?;
            info!(path = %self.path.display(), removed, "Deleted records from message source");
        }
        Ok(removed)
    }
}
