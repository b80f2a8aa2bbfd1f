//! Ingestion of external message records into the store.
//!
//! Two entry points share one per-record path: the first-run bulk import
//! and the live arrival of a (possibly multi-part) message.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::directory::ContactDirectory;
use crate::error::{Result, ShieldError};
use crate::logging::OperationTimer;
use crate::metrics;
use crate::models::{Contact, DedupKey, Direction, Message, MessageStatus, NewMessage, SourceRecord, TrustStatus};
use crate::source::MessageSource;
use crate::validation::normalize_address;

/// Limits of a bulk import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Maximum records scanned
    pub bulk_limit: usize,
    /// Records between progress reports
    pub progress_interval: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            bulk_limit: 500,
            progress_interval: 50,
        }
    }
}

/// Counts from one bulk import pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Records delivered by the source
    pub scanned: usize,
    /// New rows written
    pub inserted: usize,
    /// Records already seen in this pass or already stored
    pub duplicates: usize,
    /// Records without an address or body
    pub malformed: usize,
    /// Records whose contact or insert failed
    pub failed: usize,
    /// Contacts created for unseen numbers
    pub contacts_created: usize,
}

/// A record that made it into the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Stored row (pre-existing when `created` is false)
    pub message: Message,
    /// Owning contact
    pub contact: Contact,
    /// A new row was written
    pub created: bool,
    /// The contact was created for this record
    pub contact_created: bool,
}

impl StoredMessage {
    /// A new incoming message from a non-blocked contact, waiting for a verdict
    #[must_use]
    pub fn should_classify(&self) -> bool {
        self.created
            && self.message.direction == Direction::Incoming
            && self.message.status == MessageStatus::Unchecked
            && !self.contact.is_blocked()
    }
}

/// Writes records from the external source into the message store
#[derive(Clone)]
pub struct Ingestor {
    db: Database,
    directory: Arc<dyn ContactDirectory>,
    options: IngestOptions,
}

impl Ingestor {
    /// Ingestor writing to `db` and resolving names through `directory`
    pub fn new(db: Database, directory: Arc<dyn ContactDirectory>, options: IngestOptions) -> Self {
        Self { db, directory, options }
    }

    /// Scan up to the bulk limit of records, newest first, and store them.
    ///
    /// The directory is snapshotted once for the whole pass. An unreadable
    /// source or directory aborts the pass before anything is written;
    /// individual bad records are skipped.
    pub async fn bulk_import(&self, source: &dyn MessageSource) -> Result<ImportReport> {
        let timer = OperationTimer::new("bulk_import");

        let names = self.directory.bulk_snapshot().await.map_err(as_source_unavailable)?;
        let records = source
            .scan_newest_first(self.options.bulk_limit)
            .await
            .map_err(as_source_unavailable)?;

        let mut report = ImportReport {
            scanned: records.len(),
            ..ImportReport::default()
        };
        let mut seen: HashSet<DedupKey> = HashSet::with_capacity(records.len());
        let interval = self.options.progress_interval.max(1);

        info!(records = records.len(), directory_entries = names.len(), "Bulk import started");

        for (index, record) in records.iter().enumerate() {
            if index > 0 && index % interval == 0 {
                info!(processed = index, total = records.len(), inserted = report.inserted, "Bulk import progress");
            }

            let Some(phone) = well_formed_sender(record) else {
                report.malformed += 1;
                metrics::record_skipped("malformed");
                continue;
            };

            if !seen.insert(DedupKey::new(&phone, record.timestamp_millis, &record.body)) {
                report.duplicates += 1;
                metrics::record_skipped("duplicate");
                continue;
            }

            let name = names.get(&phone).map(String::as_str);
            match self.store(&phone, record, name) {
                Ok(stored) => {
                    if stored.created {
                        report.inserted += 1;
                    } else {
                        report.duplicates += 1;
                        metrics::record_skipped("duplicate");
                    }
                    if stored.contact_created {
                        report.contacts_created += 1;
                    }
                },
                Err(e) => {
                    warn!(phone = %phone, timestamp = record.timestamp_millis, error = %e, "Skipping record");
                    metrics::record_error(e.kind(), "bulk_import");
                    report.failed += 1;
                },
            }
        }

        timer.finish();
        info!(
            scanned = report.scanned,
            inserted = report.inserted,
            duplicates = report.duplicates,
            malformed = report.malformed,
            failed = report.failed,
            contacts_created = report.contacts_created,
            "Bulk import finished"
        );
        Ok(report)
    }

    /// Store one live arrival made of one or more fragments from the same
    /// sender. Fragment bodies are joined in order; the first fragment gives
    /// the address, timestamp and direction.
    ///
    /// Returns `None` when the combined record is malformed.
    pub async fn live_arrival(&self, fragments: &[SourceRecord]) -> Result<Option<StoredMessage>> {
        let Some(first) = fragments.first() else {
            return Err(ShieldError::InvalidInput("live arrival without fragments".into()));
        };

        let body: String = fragments.iter().map(|f| f.body.as_str()).collect();
        let record = SourceRecord {
            body,
            ..first.clone()
        };

        let Some(phone) = well_formed_sender(&record) else {
            debug!(fragments = fragments.len(), "Skipping malformed live message");
            metrics::record_skipped("malformed");
            return Ok(None);
        };

        if fragments.iter().any(|f| normalize_address(&f.sender) != phone) {
            warn!(phone = %phone, "Fragments carry different senders, using the first");
        }

        let name = match self.directory.lookup(&phone).await {
            Ok(name) => name,
            Err(e) => {
                warn!(phone = %phone, error = %e, "Directory lookup failed, using the number as name");
                None
            },
        };

        let stored = self.store(&phone, &record, name.as_deref())?;
        if !stored.created {
            metrics::record_skipped("duplicate");
        }
        Ok(Some(stored))
    }

    fn store(&self, phone: &str, record: &SourceRecord, name: Option<&str>) -> Result<StoredMessage> {
        let (contact, contact_created) = self.db.resolve_or_create_contact(phone, name, TrustStatus::Unknown)?;
        if contact_created {
            metrics::record_contact_created();
        }

        let outcome = self.db.insert_message(&NewMessage {
            contact_id: contact.id,
            content: record.body.clone(),
            timestamp: record.timestamp_millis,
            direction: record.direction,
            phone_number: phone.to_string(),
        })?;
        if outcome.created {
            metrics::record_ingested(record.direction.as_str(), 1);
        }

        let message = self
            .db
            .get_message(outcome.id)?
            .ok_or_else(|| ShieldError::NotFound(format!("message {}", outcome.id)))?;

        Ok(StoredMessage {
            message,
            contact,
            created: outcome.created,
            contact_created,
        })
    }
}

/// Normalized address of a record that has both an address and a body.
/// Alphanumeric sender ids count as addresses.
fn well_formed_sender(record: &SourceRecord) -> Option<String> {
    let phone = normalize_address(&record.sender);
    (!phone.is_empty() && !record.body.is_empty()).then_some(phone)
}

fn as_source_unavailable(err: ShieldError) -> ShieldError {
    match err {
        ShieldError::SourceUnavailable(_) => err,
        other => ShieldError::SourceUnavailable(other.to_string()),
    }
}

/// Group fragments by normalized sender, preserving arrival order. Used when
/// one delivery carries parts of messages from several senders.
#[must_use]
pub fn group_fragments(fragments: Vec<SourceRecord>) -> Vec<Vec<SourceRecord>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<SourceRecord>> = HashMap::new();

    for fragment in fragments {
        let key = normalize_address(&fragment.sender);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(fragment);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect()
}
