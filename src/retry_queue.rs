//! Durable queue of message ids whose classification was deferred.
//!
//! Ids live in a sled tree named after the configured namespace, so the
//! queue survives restarts. Each entry records how many attempts were made
//! and when the next one becomes due; delays double from the base backoff up
//! to the configured cap.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::RetryQueueConfig;
use crate::error::{Result, ShieldError};
use crate::metrics;

/// Persisted state of one queued id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEntry {
    /// Failed attempts so far
    pub attempts: u32,
    /// When the id was first queued
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the next attempt may run
    pub next_attempt_at: DateTime<Utc>,
}

/// Attempt limits and backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before the final, local-only attempt
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_backoff: Duration,
    /// Upper bound on any delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryQueueConfig::default())
    }
}

impl From<&RetryQueueConfig> for RetryPolicy {
    fn from(config: &RetryQueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff: Duration::from_secs(config.base_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay after `attempts` failures
    #[must_use]
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let doublings = attempts.saturating_sub(1).min(31);
        self.base_backoff
            .checked_mul(1_u32 << doublings)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    /// True when the next attempt for an entry with `attempts` failures is
    /// the last one
    #[must_use]
    pub const fn is_final_attempt(&self, attempts: u32) -> bool {
        attempts.saturating_add(1) >= self.max_attempts
    }
}

/// What the drain callback receives for each due id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedEntry {
    /// Queued message id
    pub message_id: i64,
    /// Failed attempts so far
    pub attempts: u32,
    /// The callback must settle the message without the network
    pub final_attempt: bool,
}

/// Outcome reported by the drain callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainAction {
    /// Classified; remove the id
    Done,
    /// Nothing left to do (message deleted or blocked); remove the id
    Dropped,
    /// Still unclassified; keep the id with a later due time
    Retry,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Ids handed to the callback
    pub attempted: usize,
    /// Ids classified and removed
    pub completed: usize,
    /// Ids removed without classification
    pub dropped: usize,
    /// Ids kept for a later pass
    pub rescheduled: usize,
    /// Ids skipped because their backoff has not elapsed
    pub not_due: usize,
}

/// Durable, idempotent set of message ids
#[derive(Debug, Clone)]
pub struct RetryQueue {
    db: sled::Db,
    tree: sled::Tree,
    policy: RetryPolicy,
}

impl RetryQueue {
    /// Open (or create) the queue stored at `path`
    pub fn open(path: impl AsRef<Path>, namespace: &str, policy: RetryPolicy) -> Result<Self> {
        std::fs::create_dir_all(path.as_ref())?;
        let db = sled::open(path.as_ref())?;
        Self::with_db(db, namespace, policy)
    }

    /// Open the queue inside an already opened sled database
    pub fn with_db(db: sled::Db, namespace: &str, policy: RetryPolicy) -> Result<Self> {
        if namespace.is_empty() {
            return Err(ShieldError::InvalidConfig("retry queue namespace must not be empty".into()));
        }
        let tree = db.open_tree(namespace)?;
        Ok(Self { db, tree, policy })
    }

    /// Queue backed by a throwaway database
    pub fn temporary(policy: RetryPolicy) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db, "message_check_queue", policy)
    }

    /// Policy applied by this queue
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    const fn key(message_id: i64) -> [u8; 8] {
        message_id.to_be_bytes()
    }

    fn decode_key(key: &[u8]) -> Result<i64> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| ShieldError::Other(format!("malformed retry queue key of {} bytes", key.len())))?;
        Ok(i64::from_be_bytes(bytes))
    }

    fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        metrics::set_retry_queue_size(self.tree.len());
        Ok(())
    }

    /// Add an id. Returns false when it was already queued, in which case
    /// its attempt count and due time are left alone.
    pub fn enqueue(&self, message_id: i64) -> Result<bool> {
        self.enqueue_at(message_id, Utc::now())
    }

    /// [`RetryQueue::enqueue`] with an explicit clock
    pub fn enqueue_at(&self, message_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let entry = RetryEntry {
            attempts: 0,
            enqueued_at: now,
            next_attempt_at: now,
        };
        let data = bincode::serialize(&entry)?;

        let inserted = self
            .tree
            .compare_and_swap(Self::key(message_id), None as Option<&[u8]>, Some(data))?
            .is_ok();
        self.flush()?;

        if inserted {
            debug!(message_id, "Queued for retry");
        }
        Ok(inserted)
    }

    /// Remove an id. Returns false when it was not queued.
    pub fn remove(&self, message_id: i64) -> Result<bool> {
        let removed = self.tree.remove(Self::key(message_id))?.is_some();
        self.flush()?;
        Ok(removed)
    }

    /// True when the id is queued
    pub fn contains(&self, message_id: i64) -> Result<bool> {
        Ok(self.tree.contains_key(Self::key(message_id))?)
    }

    /// Persisted state of a queued id
    pub fn get(&self, message_id: i64) -> Result<Option<RetryEntry>> {
        match self.tree.get(Self::key(message_id))? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Number of queued ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// True when nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// All queued ids with their state, in id order
    pub fn entries(&self) -> Result<BTreeMap<i64, RetryEntry>> {
        let mut entries = BTreeMap::new();
        for item in &self.tree {
            let (key, value) = item?;
            let message_id = Self::decode_key(&key)?;
            match bincode::deserialize::<RetryEntry>(&value) {
                Ok(entry) => {
                    entries.insert(message_id, entry);
                },
                Err(e) => {
                    // Unreadable state is reset rather than dropping the id
                    warn!(message_id, error = %e, "Resetting unreadable retry entry");
                    let now = Utc::now();
                    entries.insert(
                        message_id,
                        RetryEntry {
                            attempts: 0,
                            enqueued_at: now,
                            next_attempt_at: now,
                        },
                    );
                },
            }
        }
        Ok(entries)
    }

    /// Count a failed attempt and push the due time back. Returns the new
    /// state, or `None` if the id is no longer queued.
    pub fn record_failure(&self, message_id: i64, now: DateTime<Utc>) -> Result<Option<RetryEntry>> {
        let Some(mut entry) = self.get(message_id)? else {
            return Ok(None);
        };

        entry.attempts = entry.attempts.saturating_add(1);
        let delay = chrono::Duration::from_std(self.policy.backoff_for(entry.attempts))
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        entry.next_attempt_at = now + delay;

        self.tree.insert(Self::key(message_id), bincode::serialize(&entry)?)?;
        self.flush()?;
        Ok(Some(entry))
    }

    /// Hand every due id to `classify` concurrently and apply the outcomes.
    ///
    /// The caller checks connectivity first. Ids whose backoff has not
    /// elapsed are left untouched; a callback that panics leaves its id
    /// queued as it was.
    pub async fn drain<F, Fut>(&self, now: DateTime<Utc>, classify: F) -> Result<DrainReport>
    where
        F: Fn(QueuedEntry) -> Fut,
        Fut: Future<Output = DrainAction> + Send + 'static,
    {
        let mut report = DrainReport::default();
        let mut tasks = JoinSet::new();

        for (message_id, entry) in self.entries()? {
            if entry.next_attempt_at > now {
                report.not_due += 1;
                continue;
            }

            let queued = QueuedEntry {
                message_id,
                attempts: entry.attempts,
                final_attempt: self.policy.is_final_attempt(entry.attempts),
            };
            let attempt = classify(queued);
            tasks.spawn(async move { (message_id, attempt.await) });
            report.attempted += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            let (message_id, action) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Retry attempt aborted");
                    continue;
                },
            };

            match action {
                DrainAction::Done => {
                    self.remove(message_id)?;
                    report.completed += 1;
                },
                DrainAction::Dropped => {
                    self.remove(message_id)?;
                    report.dropped += 1;
                },
                DrainAction::Retry => {
                    if let Some(entry) = self.record_failure(message_id, now)? {
                        debug!(message_id, attempts = entry.attempts, next = %entry.next_attempt_at, "Retry rescheduled");
                    }
                    report.rescheduled += 1;
                },
            }
        }

        info!(
            attempted = report.attempted,
            completed = report.completed,
            dropped = report.dropped,
            rescheduled = report.rescheduled,
            not_due = report.not_due,
            remaining = self.len(),
            "Retry queue drained"
        );
        Ok(report)
    }

    /// Underlying sled database (shared with other trees)
    #[must_use]
    pub const fn database(&self) -> &sled::Db {
        &self.db
    }
}
