use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::{RemoteClassifier, SpamClassifier};
use crate::config::{AppConfig, PagingConfig};
use crate::connectivity::{self, Connectivity};
use crate::db::Database;
use crate::directory::{ContactDirectory, CsvDirectory};
use crate::error::{Result, ShieldError};
use crate::ingest::{ImportReport, IngestOptions, Ingestor, StoredMessage};
use crate::models::{
    Contact, ContactUpdate, Direction, Message, MessageStatus, NewContact, NewMessage, PageCursor, SourceRecord,
    StoreStats, TrustStatus,
};
use crate::notify::{LogNotifier, Notifier};
use crate::pipeline::{AttemptMode, BatchReport, ClassificationPipeline, ClassifyOutcome, PipelineOptions};
use crate::retry_queue::{DrainReport, RetryPolicy, RetryQueue};
use crate::schema::app_state;
use crate::sender::{LogSender, OutboundSender};
use crate::source::{JsonFileSource, MessageSource};
use crate::validation::InputValidator;

/// Collaborators the service is assembled from
pub struct ServiceParts {
    /// Message store
    pub db: Database,
    /// Retry queue for deferred classification
    pub queue: RetryQueue,
    /// Remote classifier
    pub classifier: Arc<dyn SpamClassifier>,
    /// Connectivity check
    pub connectivity: Arc<dyn Connectivity>,
    /// External message source
    pub source: Arc<dyn MessageSource>,
    /// External contact directory
    pub directory: Arc<dyn ContactDirectory>,
    /// Event sink
    pub notifier: Arc<dyn Notifier>,
    /// Outbound transport
    pub sender: Arc<dyn OutboundSender>,
}

/// Result of the first-run import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstRunReport {
    /// Bulk import counts
    pub import: ImportReport,
    /// Classification batch triggered after the import
    pub batch: BatchReport,
}

/// Result of a live arrival
#[derive(Debug)]
pub struct ReceiveOutcome {
    /// What was stored
    pub stored: StoredMessage,
    /// Background classification, when the message needs one
    pub classification: Option<JoinHandle<Result<ClassifyOutcome>>>,
}

/// Store counts plus the retry queue length
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    /// Message and contact counts
    #[serde(flatten)]
    pub store: StoreStats,
    /// Ids waiting in the retry queue
    pub queued_for_retry: usize,
}

/// Entry point tying ingestion, storage and classification together
#[derive(Clone)]
pub struct ShieldService {
    db: Database,
    ingestor: Ingestor,
    pipeline: ClassificationPipeline,
    source: Arc<dyn MessageSource>,
    directory: Arc<dyn ContactDirectory>,
    notifier: Arc<dyn Notifier>,
    sender: Arc<dyn OutboundSender>,
    paging: PagingConfig,
}

impl ShieldService {
    /// Assemble the service from explicit collaborators
    pub fn new(parts: ServiceParts, config: &AppConfig) -> Result<Self> {
        let ingestor = Ingestor::new(
            parts.db.clone(),
            Arc::clone(&parts.directory),
            IngestOptions {
                bulk_limit: config.ingestion.bulk_limit,
                progress_interval: config.ingestion.progress_interval,
            },
        );

        let pipeline = ClassificationPipeline::new(
            parts.db.clone(),
            parts.classifier,
            parts.queue,
            parts.connectivity,
            Arc::clone(&parts.notifier),
            PipelineOptions {
                batch_cap: config.pipeline.batch_cap,
                fallback_on_transport_error: config.classifier.fallback_on_transport_error,
            },
        )?;

        Ok(Self {
            db: parts.db,
            ingestor,
            pipeline,
            source: parts.source,
            directory: parts.directory,
            notifier: parts.notifier,
            sender: parts.sender,
            paging: config.paging.clone(),
        })
    }

    /// Wire the service from configuration: SQLite store, sled retry queue,
    /// HTTP classifier, JSON file source and CSV directory.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let db = Database::open(&config.get_database_url(), &config.database)?;
        let queue = RetryQueue::open(
            &config.retry_queue.path,
            &config.retry_queue.namespace,
            RetryPolicy::from(&config.retry_queue),
        )?;
        let classifier = RemoteClassifier::new(&config.classifier)?;
        let connectivity = connectivity::from_config(&config.connectivity)?;

        Self::new(
            ServiceParts {
                db,
                queue,
                classifier: Arc::new(classifier),
                connectivity,
                source: Arc::new(JsonFileSource::new(&config.ingestion.source_path)),
                directory: Arc::new(CsvDirectory::new(&config.ingestion.directory_path)),
                notifier: Arc::new(LogNotifier),
                sender: Arc::new(LogSender),
            },
            config,
        )
    }

    /// Message store
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Classification pipeline
    #[must_use]
    pub const fn pipeline(&self) -> &ClassificationPipeline {
        &self.pipeline
    }

    // -- ingestion ------------------------------------------------------------

    /// Run the bulk import once per store, then classify the first batch.
    /// Returns `None` when the import already happened.
    pub async fn first_run_import(&self) -> Result<Option<FirstRunReport>> {
        if self.db.get_state(app_state::BULK_IMPORT_DONE)?.as_deref() == Some("true") {
            debug!("Bulk import already done");
            return Ok(None);
        }

        let import = self.ingestor.bulk_import(self.source.as_ref()).await?;
        self.db.set_state(app_state::BULK_IMPORT_DONE, "true")?;
        let batch = self.pipeline.trigger_batch().await?;

        Ok(Some(FirstRunReport { import, batch }))
    }

    /// Bulk import regardless of the first-run flag
    pub async fn bulk_import(&self) -> Result<ImportReport> {
        self.ingestor.bulk_import(self.source.as_ref()).await
    }

    /// Store a live arrival, notify, and start its classification in the
    /// background. Messages from blocked contacts are stored silently.
    pub async fn receive(&self, fragments: &[SourceRecord]) -> Result<Option<ReceiveOutcome>> {
        let Some(stored) = self.ingestor.live_arrival(fragments).await? else {
            return Ok(None);
        };

        if stored.contact.is_blocked() {
            debug!(message_id = stored.message.id, "Message from blocked contact stored");
            return Ok(Some(ReceiveOutcome {
                stored,
                classification: None,
            }));
        }

        if stored.created && stored.message.direction == Direction::Incoming {
            self.notifier.message_received(&stored.message, &stored.contact.name);
        }

        let classification = stored
            .should_classify()
            .then(|| self.pipeline.classify_detached(stored.message.id, AttemptMode::Remote));

        Ok(Some(ReceiveOutcome { stored, classification }))
    }

    // -- classification -------------------------------------------------------

    /// Classify the next batch of unchecked messages
    pub async fn trigger_batch(&self) -> Result<BatchReport> {
        self.pipeline.trigger_batch().await
    }

    /// Classify one message
    pub async fn classify(&self, message_id: i64) -> Result<ClassifyOutcome> {
        self.pipeline.classify_message(message_id).await
    }

    /// Drain the retry queue if online. Call on process resume.
    pub async fn resume(&self) -> Result<Option<DrainReport>> {
        self.pipeline.drain_retry_queue().await
    }

    /// Explicitly set a message's status, the only way to change a verdict
    pub fn override_status(&self, message_id: i64, status: MessageStatus) -> Result<Message> {
        if !self.db.update_status(message_id, status)? {
            return Err(ShieldError::NotFound(format!("message {message_id}")));
        }
        if status != MessageStatus::Unchecked {
            self.pipeline.queue().remove(message_id)?;
        }
        info!(message_id, status = %status, "Status overridden");

        self.db
            .get_message(message_id)?
            .ok_or_else(|| ShieldError::NotFound(format!("message {message_id}")))
    }

    // -- messages -------------------------------------------------------------

    /// One page of the timeline, newest first
    pub fn page(&self, offset: usize, limit: usize) -> Result<Vec<Message>> {
        self.db.page(offset, self.clamp(limit))
    }

    /// One page of the timeline after `cursor`
    pub fn page_after(&self, cursor: Option<PageCursor>, limit: usize) -> Result<Vec<Message>> {
        self.db.page_after(cursor, self.clamp(limit))
    }

    fn clamp(&self, limit: usize) -> usize {
        InputValidator::clamp_page_limit(limit, self.paging.default_limit, self.paging.max_limit)
    }

    /// Message by id
    pub fn get_message(&self, message_id: i64) -> Result<Option<Message>> {
        self.db.get_message(message_id)
    }

    /// Messages with a status, newest first
    pub fn messages_by_status(&self, status: MessageStatus, limit: usize) -> Result<Vec<Message>> {
        self.db.messages_by_status(status, self.clamp(limit))
    }

    /// Content search, newest first
    pub fn search_messages(&self, query: &str, limit: usize) -> Result<Vec<Message>> {
        self.db.search_messages(query, self.clamp(limit))
    }

    /// Conversation with a contact, oldest first
    pub fn conversation(&self, contact_id: i64) -> Result<Vec<Message>> {
        self.db.messages_for_contact(contact_id)
    }

    /// Latest message with a contact
    pub fn latest_for_contact(&self, contact_id: i64) -> Result<Option<Message>> {
        self.db.latest_for_contact(contact_id)
    }

    /// Delete a message and mirror the delete to the source. The mirror is
    /// best-effort: failures are logged only.
    pub async fn delete_message(&self, message_id: i64) -> Result<bool> {
        let Some(message) = self.db.delete_message(message_id)? else {
            return Ok(false);
        };
        self.pipeline.queue().remove(message_id)?;

        match self
            .source
            .delete(&message.phone_number, message.timestamp, &message.content)
            .await
        {
            Ok(0) => debug!(message_id, "No matching record in message source"),
            Ok(removed) => debug!(message_id, removed, "Deleted from message source"),
            Err(e) => warn!(message_id, error = %e, "Could not delete from message source"),
        }

        info!(message_id, "Message deleted");
        Ok(true)
    }

    /// Hand a message to the outbound sender and store it as a trusted
    /// outgoing message. A contact is created as `known` if needed.
    pub async fn send_message(&self, phone_number: &str, body: &str) -> Result<Message> {
        let phone_number = InputValidator::validate_phone(phone_number)?;
        InputValidator::validate_body(body)?;

        self.sender.send(&phone_number, body).await?;

        let name = match self.directory.lookup(&phone_number).await {
            Ok(name) => name,
            Err(e) => {
                warn!(phone = %phone_number, error = %e, "Directory lookup failed");
                None
            },
        };
        let (contact, _) = self
            .db
            .resolve_or_create_contact(&phone_number, name.as_deref(), TrustStatus::Known)?;

        let outcome = self.db.insert_message(&NewMessage {
            contact_id: contact.id,
            content: body.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            direction: Direction::Outgoing,
            phone_number,
        })?;

        self.db
            .get_message(outcome.id)?
            .ok_or_else(|| ShieldError::NotFound(format!("message {}", outcome.id)))
    }

    // -- contacts -------------------------------------------------------------

    /// Add a known contact
    pub fn add_contact(&self, name: &str, phone_number: &str) -> Result<Contact> {
        self.db.add_contact(&NewContact {
            name: name.to_string(),
            phone_number: phone_number.to_string(),
            status: TrustStatus::Known,
        })
    }

    /// Edit a contact
    pub fn edit_contact(&self, contact_id: i64, update: &ContactUpdate) -> Result<Contact> {
        self.db.update_contact(contact_id, update)
    }

    /// Block a contact: its messages are kept but never classified
    pub fn block_contact(&self, contact_id: i64) -> Result<Contact> {
        let contact = self.db.set_contact_status(contact_id, TrustStatus::Blocked)?;
        info!(contact_id, "Contact blocked");
        Ok(contact)
    }

    /// Unblock a contact, making it known
    pub fn unblock_contact(&self, contact_id: i64) -> Result<Contact> {
        let contact = self.db.set_contact_status(contact_id, TrustStatus::Known)?;
        info!(contact_id, "Contact unblocked");
        Ok(contact)
    }

    /// Delete a contact together with its messages
    pub fn delete_contact(&self, contact_id: i64) -> Result<bool> {
        let messages = self.db.messages_for_contact(contact_id)?;
        if !self.db.delete_contact(contact_id)? {
            return Ok(false);
        }
        for message in &messages {
            self.pipeline.queue().remove(message.id)?;
        }
        info!(contact_id, messages = messages.len(), "Contact deleted");
        Ok(true)
    }

    /// All contacts, or those matching `query` by name or number
    pub fn contacts(&self, query: Option<&str>) -> Result<Vec<Contact>> {
        match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(query) => self.db.search_contacts(query),
            None => self.db.list_contacts(),
        }
    }

    /// Contact by number
    pub fn contact_by_phone(&self, phone_number: &str) -> Result<Option<Contact>> {
        self.db.get_contact_by_phone(phone_number)
    }

    /// Number of messages exchanged with a contact
    pub fn message_count(&self, contact_id: i64) -> Result<usize> {
        self.db.message_count_for_contact(contact_id)
    }

    /// Merge directory names into stored contacts
    pub async fn sync_directory(&self) -> Result<usize> {
        let snapshot = self.directory.bulk_snapshot().await?;
        let changed = self.db.merge_directory_names(&snapshot)?;
        info!(directory_entries = snapshot.len(), changed, "Directory synced");
        Ok(changed)
    }

    /// Store and queue counts
    pub fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            store: self.db.stats()?,
            queued_for_retry: self.pipeline.queue().len(),
        })
    }
}
