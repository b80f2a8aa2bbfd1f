use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use sms_shield::classifier::SpamClassifier;
use sms_shield::config::AppConfig;
use sms_shield::connectivity::StaticConnectivity;
use sms_shield::db::Database;
use sms_shield::directory::MemoryDirectory;
use sms_shield::error::{Result, ShieldError};
use sms_shield::models::{ContactUpdate, Direction, MessageStatus, SourceRecord, TrustStatus, Verdict, VerdictSource};
use sms_shield::notify::{ChannelNotifier, ShieldEvent};
use sms_shield::pipeline::ClassifyOutcome;
use sms_shield::retry_queue::{RetryPolicy, RetryQueue};
use sms_shield::sender::RecordingSender;
use sms_shield::service::{ServiceParts, ShieldService};
use sms_shield::source::MemorySource;

/// Calls anything mentioning "prize" spam
struct KeywordClassifier;

#[async_trait]
impl SpamClassifier for KeywordClassifier {
    async fn classify(&self, content: &str, _sender: &str) -> Result<Verdict> {
        Ok(Verdict {
            is_spam: content.contains("prize"),
            explanation: "keyword check".to_string(),
            source: VerdictSource::Remote,
        })
    }
}

struct Fixture {
    service: ShieldService,
    source: Arc<MemorySource>,
    directory: Arc<MemoryDirectory>,
    sender: Arc<RecordingSender>,
    connectivity: Arc<StaticConnectivity>,
    events: UnboundedReceiver<ShieldEvent>,
}

fn fixture(records: Vec<SourceRecord>) -> Fixture {
    let source = Arc::new(MemorySource::new(records));
    let directory = Arc::new(MemoryDirectory::new());
    let sender = Arc::new(RecordingSender::default());
    let connectivity = Arc::new(StaticConnectivity::new(true));
    let (notifier, events) = ChannelNotifier::new();

    let service = ShieldService::new(
        ServiceParts {
            db: Database::in_memory().expect("Failed to create database"),
            queue: RetryQueue::temporary(RetryPolicy::default()).expect("Failed to open queue"),
            classifier: Arc::new(KeywordClassifier),
            connectivity: connectivity.clone(),
            source: source.clone(),
            directory: directory.clone(),
            notifier: Arc::new(notifier),
            sender: sender.clone(),
        },
        &AppConfig::default(),
    )
    .expect("Failed to build service");

    Fixture {
        service,
        source,
        directory,
        sender,
        connectivity,
        events,
    }
}

fn drain_events(events: &mut UnboundedReceiver<ShieldEvent>) -> Vec<ShieldEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test]
async fn test_first_run_import_happens_once() {
    let f = fixture(vec![
        SourceRecord::incoming("5550100", "you won a prize", 1),
        SourceRecord::incoming("5550200", "lunch?", 2),
    ]);

    let report = f
        .service
        .first_run_import()
        .await
        .unwrap()
        .expect("First run should import");
    assert_eq!(report.import.inserted, 2);
    assert_eq!(report.batch.classified, 2);

    let spam = f.service.messages_by_status(MessageStatus::Spam, 0).unwrap();
    assert_eq!(spam.len(), 1);
    assert_eq!(spam[0].content, "you won a prize");

    f.source.push(SourceRecord::incoming("5550300", "new", 3));
    assert!(f.service.first_run_import().await.unwrap().is_none());
    assert_eq!(f.service.stats().unwrap().store.total_messages, 2);
}

#[tokio::test]
async fn test_failed_first_run_is_retried() {
    let f = fixture(vec![SourceRecord::incoming("5550100", "hello", 1)]);
    f.source.set_available(false);

    assert!(matches!(
        f.service.first_run_import().await,
        Err(ShieldError::SourceUnavailable(_))
    ));

    f.source.set_available(true);
    let report = f.service.first_run_import().await.unwrap().unwrap();
    assert_eq!(report.import.inserted, 1);
}

#[tokio::test]
async fn test_receive_notifies_and_classifies() {
    let mut f = fixture(Vec::new());
    f.directory.insert("5550100", "Alice");

    let outcome = f
        .service
        .receive(&[SourceRecord::incoming("555-0100", "claim your prize", 10)])
        .await
        .unwrap()
        .expect("Message should be stored");
    let classified = outcome
        .classification
        .expect("Classification should start")
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(classified, ClassifyOutcome::Classified(ref c) if c.is_spam));

    let events = drain_events(&mut f.events);
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        ShieldEvent::MessageReceived {
            message_id: outcome.stored.message.id,
            sender_name: "Alice".to_string(),
            content: "claim your prize".to_string(),
        }
    );
    assert!(matches!(events[1], ShieldEvent::ClassificationCompleted(_)));
}

#[tokio::test]
async fn test_receive_from_blocked_contact_is_silent() {
    let mut f = fixture(Vec::new());
    let (contact, _) = f
        .service
        .database()
        .resolve_or_create_contact("5550666", None, TrustStatus::Unknown)
        .unwrap();
    f.service.block_contact(contact.id).unwrap();

    let outcome = f
        .service
        .receive(&[SourceRecord::incoming("5550666", "prize inside", 1)])
        .await
        .unwrap()
        .unwrap();

    assert!(outcome.classification.is_none());
    assert!(drain_events(&mut f.events).is_empty());
    assert_eq!(
        f.service.get_message(outcome.stored.message.id).unwrap().unwrap().status,
        MessageStatus::Unchecked
    );

    // Unblocking makes the backlog eligible for the next batch
    let unblocked = f.service.unblock_contact(contact.id).unwrap();
    assert_eq!(unblocked.status, TrustStatus::Known);
    let batch = f.service.trigger_batch().await.unwrap();
    assert_eq!(batch.classified, 1);
}

#[tokio::test]
async fn test_receive_offline_queues_message() {
    let f = fixture(Vec::new());
    f.connectivity.set_online(false);

    let outcome = f
        .service
        .receive(&[SourceRecord::incoming("5550100", "hello", 1)])
        .await
        .unwrap()
        .unwrap();
    let result = outcome.classification.unwrap().await.unwrap().unwrap();
    assert_eq!(result, ClassifyOutcome::Deferred);
    assert_eq!(f.service.stats().unwrap().queued_for_retry, 1);

    assert!(f.service.resume().await.unwrap().is_none());

    f.connectivity.set_online(true);
    let report = f.service.resume().await.unwrap().unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(f.service.stats().unwrap().queued_for_retry, 0);
}

#[tokio::test]
async fn test_override_status_clears_retry_entry() {
    let f = fixture(Vec::new());
    f.connectivity.set_online(false);

    let outcome = f
        .service
        .receive(&[SourceRecord::incoming("5550100", "hello", 1)])
        .await
        .unwrap()
        .unwrap();
    outcome.classification.unwrap().await.unwrap().unwrap();
    let id = outcome.stored.message.id;

    let message = f.service.override_status(id, MessageStatus::Spam).unwrap();
    assert_eq!(message.status, MessageStatus::Spam);
    assert!(!f.service.pipeline().queue().contains(id).unwrap());

    assert!(matches!(
        f.service.override_status(9_999, MessageStatus::Safe),
        Err(ShieldError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_message_mirrors_to_source() {
    let f = fixture(vec![
        SourceRecord::incoming("+1 555 0100", "delete me", 1_000),
        SourceRecord::incoming("+1 555 0100", "keep me", 2_000),
    ]);
    f.service.bulk_import().await.unwrap();

    let target = f
        .service
        .search_messages("delete me", 0)
        .unwrap()
        .pop()
        .expect("Message should be stored");

    assert!(f.service.delete_message(target.id).await.unwrap());
    assert!(f.service.get_message(target.id).unwrap().is_none());
    assert_eq!(f.source.records().len(), 1);
    assert_eq!(f.source.records()[0].body, "keep me");

    assert!(!f.service.delete_message(target.id).await.unwrap());
}

#[tokio::test]
async fn test_delete_survives_unavailable_source() {
    let f = fixture(vec![SourceRecord::incoming("5550100", "hello", 1)]);
    f.service.bulk_import().await.unwrap();
    let id = f.service.page(0, 0).unwrap()[0].id;

    f.source.set_available(false);
    assert!(f.service.delete_message(id).await.unwrap());
    assert!(f.service.get_message(id).unwrap().is_none());
}

#[tokio::test]
async fn test_send_message_stores_trusted_outgoing() {
    let f = fixture(Vec::new());
    f.directory.insert("+15550100", "Dana");

    let message = f.service.send_message("+1 555-0100", "on my way").await.unwrap();
    assert_eq!(message.direction, Direction::Outgoing);
    assert_eq!(message.status, MessageStatus::Safe);
    assert_eq!(f.sender.sent(), vec![("+15550100".to_string(), "on my way".to_string())]);

    let contact = f.service.contact_by_phone("+15550100").unwrap().unwrap();
    assert_eq!(contact.name, "Dana");
    assert_eq!(contact.status, TrustStatus::Known);
    assert_eq!(f.service.latest_for_contact(contact.id).unwrap().unwrap().id, message.id);

    assert!(f.service.send_message("5550100", "").await.is_err());
    assert!(f.service.send_message("nope", "hi").await.is_err());
    assert_eq!(f.sender.sent().len(), 1);
}

#[tokio::test]
async fn test_contact_operations() {
    let f = fixture(Vec::new());

    let added = f.service.add_contact("Eve", "555 0100").unwrap();
    assert_eq!(added.status, TrustStatus::Known);
    assert!(f.service.add_contact("Eve again", "5550100").is_err());

    let edited = f
        .service
        .edit_contact(
            added.id,
            &ContactUpdate {
                name: Some("Eve Adams".to_string()),
                ..ContactUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(edited.name, "Eve Adams");
    assert_eq!(f.service.contacts(Some("adams")).unwrap().len(), 1);
    assert_eq!(f.service.contacts(Some("  ")).unwrap().len(), 1);
    assert_eq!(f.service.contacts(None).unwrap().len(), 1);

    f.service
        .receive(&[SourceRecord::incoming("5550100", "hi eve", 1)])
        .await
        .unwrap();
    assert_eq!(f.service.message_count(added.id).unwrap(), 1);
    assert_eq!(f.service.conversation(added.id).unwrap().len(), 1);

    assert!(f.service.delete_contact(added.id).unwrap());
    assert!(f.service.contacts(None).unwrap().is_empty());
    assert_eq!(f.service.stats().unwrap().store.total_messages, 0);
    assert!(!f.service.delete_contact(added.id).unwrap());
}

#[tokio::test]
async fn test_sync_directory_promotes_unknown_contacts() {
    let f = fixture(vec![SourceRecord::incoming("5550100", "hello", 1)]);
    f.service.bulk_import().await.unwrap();
    assert_eq!(
        f.service.contact_by_phone("5550100").unwrap().unwrap().status,
        TrustStatus::Unknown
    );

    f.directory.insert("555-0100", "Frank");
    assert_eq!(f.service.sync_directory().await.unwrap(), 1);

    let contact = f.service.contact_by_phone("5550100").unwrap().unwrap();
    assert_eq!(contact.name, "Frank");
    assert_eq!(contact.status, TrustStatus::Known);
}

#[tokio::test]
async fn test_paging_is_clamped() {
    let f = fixture(
        (0..600)
            .map(|n| SourceRecord::incoming("5550100", format!("m{n}"), n))
            .collect(),
    );
    f.service.bulk_import().await.unwrap();

    // Bulk import stops at the configured limit
    assert_eq!(f.service.stats().unwrap().store.total_messages, 500);
    assert_eq!(f.service.page(0, 0).unwrap().len(), 50);
    assert_eq!(f.service.page(0, 10_000).unwrap().len(), 500);

    let first = f.service.page_after(None, 0).unwrap();
    let next = f.service.page_after(first.last().map(|m| m.cursor()), 0).unwrap();
    assert_eq!(next.len(), 50);
    assert!(next[0].timestamp < first[49].timestamp);
}
