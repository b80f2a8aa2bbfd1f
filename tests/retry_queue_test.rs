use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::tempdir;

use sms_shield::retry_queue::{DrainAction, QueuedEntry, RetryPolicy, RetryQueue};

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_backoff: Duration::from_secs(30),
        max_backoff: Duration::from_secs(120),
    }
}

fn at(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[test]
fn test_enqueue_is_idempotent() {
    let queue = RetryQueue::temporary(policy()).expect("Failed to open queue");

    assert!(queue.enqueue_at(7, at(0)).unwrap());
    queue.record_failure(7, at(0)).unwrap();
    assert!(!queue.enqueue_at(7, at(10)).unwrap());

    assert_eq!(queue.len(), 1);
    // A second enqueue leaves the attempt count alone
    assert_eq!(queue.get(7).unwrap().unwrap().attempts, 1);
}

#[test]
fn test_remove_and_contains() {
    let queue = RetryQueue::temporary(policy()).unwrap();
    queue.enqueue(1).unwrap();
    queue.enqueue(2).unwrap();

    assert!(queue.contains(1).unwrap());
    assert!(queue.remove(1).unwrap());
    assert!(!queue.remove(1).unwrap());
    assert!(!queue.contains(1).unwrap());
    assert_eq!(queue.entries().unwrap().keys().copied().collect::<Vec<_>>(), vec![2]);
}

#[test]
fn test_queue_survives_reopen() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let path = temp_dir.path().join("queue");

    {
        let queue = RetryQueue::open(&path, "message_check_queue", policy()).unwrap();
        queue.enqueue_at(11, at(0)).unwrap();
        queue.enqueue_at(12, at(0)).unwrap();
        queue.record_failure(12, at(0)).unwrap();
    }

    let queue = RetryQueue::open(&path, "message_check_queue", policy()).unwrap();
    let entries = queue.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[&11].attempts, 0);
    assert_eq!(entries[&12].attempts, 1);
}

#[test]
fn test_namespaces_are_separate() {
    let db = sled::Config::new().temporary(true).open().unwrap();
    let checks = RetryQueue::with_db(db.clone(), "message_check_queue", policy()).unwrap();
    let other = RetryQueue::with_db(db, "other_queue", policy()).unwrap();

    checks.enqueue(1).unwrap();
    assert!(other.is_empty());
    assert!(RetryQueue::with_db(other.database().clone(), "", policy()).is_err());
}

#[test]
fn test_backoff_schedule() {
    let policy = policy();
    assert_eq!(policy.backoff_for(0), Duration::ZERO);
    assert_eq!(policy.backoff_for(1), Duration::from_secs(30));
    assert_eq!(policy.backoff_for(2), Duration::from_secs(60));
    assert_eq!(policy.backoff_for(3), Duration::from_secs(120));
    assert_eq!(policy.backoff_for(10), Duration::from_secs(120));
    assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(120));

    assert!(!policy.is_final_attempt(0));
    assert!(!policy.is_final_attempt(1));
    assert!(policy.is_final_attempt(2));
}

#[test]
fn test_record_failure_pushes_due_time() {
    let queue = RetryQueue::temporary(policy()).unwrap();
    queue.enqueue_at(5, at(0)).unwrap();

    let entry = queue.record_failure(5, at(100)).unwrap().unwrap();
    assert_eq!(entry.attempts, 1);
    assert_eq!(entry.next_attempt_at, at(130));
    assert_eq!(entry.enqueued_at, at(0));

    assert!(queue.record_failure(99, at(100)).unwrap().is_none());
}

#[tokio::test]
async fn test_drain_applies_actions() {
    let queue = RetryQueue::temporary(policy()).unwrap();
    for id in [1, 2, 3] {
        queue.enqueue_at(id, at(0)).unwrap();
    }

    let report = queue
        .drain(at(0), |entry: QueuedEntry| async move {
            match entry.message_id {
                1 => DrainAction::Done,
                2 => DrainAction::Dropped,
                _ => DrainAction::Retry,
            }
        })
        .await
        .unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.completed, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.rescheduled, 1);
    assert_eq!(queue.entries().unwrap().keys().copied().collect::<Vec<_>>(), vec![3]);
    assert_eq!(queue.get(3).unwrap().unwrap().attempts, 1);
}

#[tokio::test]
async fn test_drain_skips_entries_not_due() {
    let queue = RetryQueue::temporary(policy()).unwrap();
    queue.enqueue_at(1, at(0)).unwrap();
    queue.record_failure(1, at(0)).unwrap();
    queue.enqueue_at(2, at(0)).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let report = queue
        .drain(at(10), move |entry| {
            recorder.lock().unwrap().push(entry.message_id);
            async { DrainAction::Done }
        })
        .await
        .unwrap();

    assert_eq!(report.not_due, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(*seen.lock().unwrap(), vec![2]);
    assert!(queue.contains(1).unwrap());

    // Once the backoff has elapsed the entry is handed out again
    let report = queue.drain(at(31), |_| async { DrainAction::Done }).await.unwrap();
    assert_eq!(report.completed, 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_drain_flags_final_attempt() {
    let queue = RetryQueue::temporary(policy()).unwrap();
    queue.enqueue_at(1, at(0)).unwrap();

    let finals = Arc::new(Mutex::new(Vec::new()));
    let mut now = at(0);
    for _ in 0..3 {
        let finals = Arc::clone(&finals);
        queue
            .drain(now, move |entry| {
                finals.lock().unwrap().push((entry.attempts, entry.final_attempt));
                async { DrainAction::Retry }
            })
            .await
            .unwrap();
        now += chrono::Duration::seconds(600);
    }

    assert_eq!(*finals.lock().unwrap(), vec![(0, false), (1, false), (2, true)]);
}
