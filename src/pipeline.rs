//! Classification pipeline.
//!
//! Drives unchecked messages to `safe` or `spam`. The remote classifier is
//! tried first; the local heuristic decides when it cannot be reached. While
//! offline, attempts are deferred to the retry queue instead.
//!
//! Every attempt runs in its own spawned task, so a caller that goes away
//! never cancels a state transition halfway. At most one attempt per message
//! id runs at any time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::SpamClassifier;
use crate::connectivity::Connectivity;
use crate::db::Database;
use crate::error::{Result, ShieldError};
use crate::heuristic::HeuristicScorer;
use crate::metrics;
use crate::models::{Classification, MessageStatus, Verdict};
use crate::notify::Notifier;
use crate::retry_queue::{DrainAction, DrainReport, QueuedEntry, RetryQueue};

/// How an attempt may reach a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptMode {
    /// Remote classifier, falling back to the heuristic
    Remote,
    /// Heuristic only, no network
    LocalOnly,
}

/// Result of asking the pipeline to classify one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyOutcome {
    /// The message moved out of `unchecked`
    Classified(Classification),
    /// The message already had a final status; nothing changed
    AlreadyClassified(MessageStatus),
    /// The message (or its contact) no longer exists
    Missing,
    /// The contact is blocked; the message stays `unchecked`
    Blocked,
    /// No verdict was possible; the id is in the retry queue
    Deferred,
    /// Another attempt for this id is running
    InFlight,
}

/// Counts from one batch trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Messages picked for this trigger
    pub selected: usize,
    /// Messages classified
    pub classified: usize,
    /// Messages deferred to the retry queue
    pub deferred: usize,
    /// Messages skipped (already classified, blocked, missing, in flight)
    pub skipped: usize,
    /// Attempts that failed with an error
    pub failed: usize,
}

/// Tunables of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Oldest unchecked messages classified per trigger
    pub batch_cap: usize,
    /// Use the heuristic when the classifier fails while online
    pub fallback_on_transport_error: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_cap: 10,
            fallback_on_transport_error: true,
        }
    }
}

/// Removes its id from the in-flight set on drop
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<i64>>>,
    message_id: i64,
}

impl InFlightGuard {
    fn acquire(in_flight: &Arc<Mutex<HashSet<i64>>>, message_id: i64) -> Option<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message_id);

        inserted.then(|| Self {
            in_flight: Arc::clone(in_flight),
            message_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.message_id);
    }
}

/// Classification state machine over the message store
#[derive(Clone)]
pub struct ClassificationPipeline {
    db: Database,
    classifier: Arc<dyn SpamClassifier>,
    heuristic: Arc<HeuristicScorer>,
    queue: RetryQueue,
    connectivity: Arc<dyn Connectivity>,
    notifier: Arc<dyn Notifier>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    options: PipelineOptions,
}

impl ClassificationPipeline {
    /// Assemble a pipeline from its collaborators
    pub fn new(
        db: Database,
        classifier: Arc<dyn SpamClassifier>,
        queue: RetryQueue,
        connectivity: Arc<dyn Connectivity>,
        notifier: Arc<dyn Notifier>,
        options: PipelineOptions,
    ) -> Result<Self> {
        if options.batch_cap == 0 {
            return Err(ShieldError::InvalidConfig("batch cap must be greater than 0".into()));
        }

        Ok(Self {
            db,
            classifier,
            heuristic: Arc::new(HeuristicScorer::new()?),
            queue,
            connectivity,
            notifier,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            options,
        })
    }

    /// Retry queue used for deferred attempts
    #[must_use]
    pub const fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    /// Local scorer used as the fallback
    #[must_use]
    pub fn heuristic(&self) -> &HeuristicScorer {
        &self.heuristic
    }

    /// Classify one message and wait for the outcome.
    ///
    /// The attempt runs in its own task: dropping this future does not stop
    /// the status write or the completion notification.
    pub async fn classify_message(&self, message_id: i64) -> Result<ClassifyOutcome> {
        self.classify_detached(message_id, AttemptMode::Remote)
            .await
            .map_err(|e| ShieldError::Other(format!("classification task failed: {e}")))?
    }

    /// Start an attempt in the background
    #[must_use = "the handle reports the outcome; drop it to detach"]
    pub fn classify_detached(&self, message_id: i64, mode: AttemptMode) -> JoinHandle<Result<ClassifyOutcome>> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.attempt(message_id, mode).await })
    }

    /// Classify up to the batch cap of the oldest unchecked incoming
    /// messages from non-blocked contacts. Each message gets its own task, so
    /// one slow request does not hold up the others.
    pub async fn trigger_batch(&self) -> Result<BatchReport> {
        let candidates = self.db.oldest_unchecked_incoming(self.options.batch_cap)?;
        let mut report = BatchReport {
            selected: candidates.len(),
            ..BatchReport::default()
        };

        let handles: Vec<_> = candidates
            .iter()
            .map(|message| (message.id, self.classify_detached(message.id, AttemptMode::Remote)))
            .collect();

        for (message_id, handle) in handles {
            match handle.await {
                Ok(Ok(ClassifyOutcome::Classified(_))) => report.classified += 1,
                Ok(Ok(ClassifyOutcome::Deferred)) => report.deferred += 1,
                Ok(Ok(_)) => report.skipped += 1,
                Ok(Err(e)) => {
                    warn!(message_id, error = %e, "Classification attempt failed");
                    metrics::record_error(e.kind(), "classify");
                    report.failed += 1;
                },
                Err(e) => {
                    warn!(message_id, error = %e, "Classification task aborted");
                    report.failed += 1;
                },
            }
        }

        info!(
            selected = report.selected,
            classified = report.classified,
            deferred = report.deferred,
            skipped = report.skipped,
            failed = report.failed,
            "Classification batch finished"
        );
        Ok(report)
    }

    /// Retry every due id in the queue. Returns `None` without touching the
    /// queue while offline.
    pub async fn drain_retry_queue(&self) -> Result<Option<DrainReport>> {
        if !self.connectivity.is_online().await {
            info!(queued = self.queue.len(), "Offline, retry queue left for later");
            return Ok(None);
        }

        let pipeline = self.clone();
        let report = self
            .queue
            .drain(Utc::now(), move |entry| {
                let pipeline = pipeline.clone();
                async move { pipeline.retry_attempt(entry).await }
            })
            .await?;
        Ok(Some(report))
    }

    async fn retry_attempt(&self, entry: QueuedEntry) -> DrainAction {
        let mode = if entry.final_attempt {
            AttemptMode::LocalOnly
        } else {
            AttemptMode::Remote
        };

        match self.attempt(entry.message_id, mode).await {
            Ok(ClassifyOutcome::Classified(_) | ClassifyOutcome::AlreadyClassified(_)) => DrainAction::Done,
            Ok(ClassifyOutcome::Missing | ClassifyOutcome::Blocked) => DrainAction::Dropped,
            Ok(ClassifyOutcome::Deferred | ClassifyOutcome::InFlight) => DrainAction::Retry,
            Err(e) => {
                warn!(message_id = entry.message_id, error = %e, "Retry attempt failed");
                metrics::record_error(e.kind(), "drain");
                DrainAction::Retry
            },
        }
    }

    async fn attempt(&self, message_id: i64, mode: AttemptMode) -> Result<ClassifyOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, message_id) else {
            debug!(message_id, "Classification already in flight");
            return Ok(ClassifyOutcome::InFlight);
        };

        let Some(message) = self.db.get_message(message_id)? else {
            debug!(message_id, "Message vanished before classification");
            return Ok(ClassifyOutcome::Missing);
        };
        if message.status != MessageStatus::Unchecked {
            return Ok(ClassifyOutcome::AlreadyClassified(message.status));
        }

        let Some(contact) = self.db.get_contact(message.contact_id)? else {
            return Ok(ClassifyOutcome::Missing);
        };
        if contact.is_blocked() {
            debug!(message_id, contact_id = contact.id, "Sender blocked, not classifying");
            return Ok(ClassifyOutcome::Blocked);
        }

        let verdict = match mode {
            AttemptMode::LocalOnly => self.heuristic.classify(&message.content),
            AttemptMode::Remote => match self.remote_verdict(&message.content, &message.phone_number).await {
                Some(verdict) => verdict,
                None => {
                    self.queue.enqueue(message_id)?;
                    return Ok(ClassifyOutcome::Deferred);
                },
            },
        };

        self.apply(message_id, verdict)
    }

    /// Ask the remote classifier. `None` means no verdict should be written
    /// now and the attempt must be deferred.
    async fn remote_verdict(&self, content: &str, sender: &str) -> Option<Verdict> {
        if !self.connectivity.is_online().await {
            debug!("Offline, deferring classification");
            metrics::record_deferred("offline");
            return None;
        }

        match self.classifier.classify(content, sender).await {
            Ok(verdict) => Some(verdict),
            Err(e) if self.options.fallback_on_transport_error => {
                warn!(error = %e, "Classifier unavailable, using local analysis");
                metrics::record_error(e.kind(), "classify");
                Some(self.heuristic.classify(content))
            },
            Err(e) => {
                warn!(error = %e, "Classifier unavailable, deferring");
                metrics::record_deferred("transport");
                None
            },
        }
    }

    fn apply(&self, message_id: i64, verdict: Verdict) -> Result<ClassifyOutcome> {
        let status = MessageStatus::from_verdict(verdict.is_spam);

        if !self.db.mark_classified(message_id, status)? {
            // Deleted or overridden while the verdict was being computed
            return Ok(match self.db.get_message(message_id)? {
                Some(message) => ClassifyOutcome::AlreadyClassified(message.status),
                None => ClassifyOutcome::Missing,
            });
        }

        self.queue.remove(message_id)?;
        metrics::record_classification(verdict.source, status);
        info!(message_id, status = %status, source = verdict.source.as_str(), "Message classified");

        let classification = Classification {
            message_id,
            is_spam: verdict.is_spam,
            explanation: verdict.explanation,
            source: verdict.source,
        };
        self.notifier.classification_completed(&classification);

        Ok(ClassifyOutcome::Classified(classification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::MockSpamClassifier;
    use crate::connectivity::StaticConnectivity;
    use crate::models::{Direction, NewMessage, TrustStatus, VerdictSource};
    use crate::notify::LogNotifier;
    use crate::retry_queue::RetryPolicy;

    fn seeded_store(content: &str) -> (Database, i64) {
        let db = Database::in_memory().unwrap();
        let (contact, _) = db
            .resolve_or_create_contact("5550001", None, TrustStatus::Unknown)
            .unwrap();
        let inserted = db
            .insert_message(&NewMessage {
                contact_id: contact.id,
                content: content.to_string(),
                timestamp: 1_000,
                direction: Direction::Incoming,
                phone_number: contact.phone_number,
            })
            .unwrap();
        (db, inserted.id)
    }

    fn pipeline_with(db: Database, classifier: MockSpamClassifier) -> ClassificationPipeline {
        ClassificationPipeline::new(
            db,
            Arc::new(classifier),
            RetryQueue::temporary(RetryPolicy::default()).unwrap(),
            Arc::new(StaticConnectivity::new(true)),
            Arc::new(LogNotifier),
            PipelineOptions::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn transport_error_falls_back_to_heuristic() {
        let (db, id) = seeded_store("URGENT: verify your bank login at www.example.com");
        let mut classifier = MockSpamClassifier::new();
        classifier
            .expect_classify()
            .times(1)
            .returning(|_, _| Err(ShieldError::Transport("timed out".into())));

        let pipeline = pipeline_with(db.clone(), classifier);
        let outcome = pipeline.classify_message(id).await.unwrap();

        let ClassifyOutcome::Classified(classification) = outcome else {
            panic!("expected a classification, got {outcome:?}");
        };
        assert!(classification.is_spam);
        assert_eq!(classification.source, VerdictSource::Heuristic);
        assert_eq!(db.get_message(id).unwrap().unwrap().status, MessageStatus::Spam);
    }

    #[tokio::test]
    async fn classified_message_is_not_sent_again() {
        let (db, id) = seeded_store("see you at six");
        let mut classifier = MockSpamClassifier::new();
        classifier.expect_classify().times(1).returning(|_, _| {
            Ok(Verdict {
                is_spam: false,
                explanation: "ok".into(),
                source: VerdictSource::Remote,
            })
        });

        let pipeline = pipeline_with(db, classifier);
        assert!(matches!(
            pipeline.classify_message(id).await.unwrap(),
            ClassifyOutcome::Classified(_)
        ));
        assert_eq!(
            pipeline.classify_message(id).await.unwrap(),
            ClassifyOutcome::AlreadyClassified(MessageStatus::Safe)
        );
    }
}
