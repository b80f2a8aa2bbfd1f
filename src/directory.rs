//! Contact directory adapters.
//!
//! A directory maps phone numbers to display names. It is read-only and
//! uncached: callers take one snapshot per operation. Keys are compared after
//! [`normalize_phone`], the same normalization the message store applies.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, ShieldError};
use crate::validation::normalize_phone;

/// Read interface over an external phone-number to display-name source
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// Display name for a number, if the directory has one
    async fn lookup(&self, phone_number: &str) -> Result<Option<String>>;

    /// Full mapping of normalized number to display name
    async fn bulk_snapshot(&self) -> Result<HashMap<String, String>>;
}

/// In-memory directory for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryDirectory {
    /// Empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory seeded from `(phone, name)` pairs
    pub fn from_entries<I, P, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, N)>,
        P: AsRef<str>,
        N: Into<String>,
    {
        let directory = Self::new();
        for (phone, name) in entries {
            directory.insert(phone.as_ref(), name);
        }
        directory
    }

    /// Add or replace an entry
    pub fn insert(&self, phone_number: &str, name: impl Into<String>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize_phone(phone_number), name.into());
    }
}

#[async_trait]
impl ContactDirectory for MemoryDirectory {
    async fn lookup(&self, phone_number: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&normalize_phone(phone_number)).cloned())
    }

    async fn bulk_snapshot(&self) -> Result<HashMap<String, String>> {
        Ok(self.entries.read().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryRow {
    name: String,
    phone: String,
}

/// Directory backed by a `name,phone` CSV file, re-read on every call
#[derive(Debug, Clone)]
pub struct CsvDirectory {
    path: PathBuf,
}

impl CsvDirectory {
    /// Directory reading `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, String>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            ShieldError::SourceUnavailable(format!("contact directory {}: {e}", self.path.display()))
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(bytes.as_slice());

        let mut entries = HashMap::new();
        for (line, row) in reader.deserialize::<DirectoryRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(line = line + 2, error = %e, "Skipping malformed directory row");
                    continue;
                },
            };

            let phone = normalize_phone(&row.phone);
            if phone.is_empty() || row.name.is_empty() {
                continue;
            }
            entries.insert(phone, row.name);
        }

        debug!(path = %self.path.display(), entries = entries.len(), "Contact directory read");
        Ok(entries)
    }
}

#[async_trait]
impl ContactDirectory for CsvDirectory {
    async fn lookup(&self, phone_number: &str) -> Result<Option<String>> {
        let mut entries = self.read_all().await?;
        Ok(entries.remove(&normalize_phone(phone_number)))
    }

    async fn bulk_snapshot(&self) -> Result<HashMap<String, String>> {
        self.read_all().await
    }
}
