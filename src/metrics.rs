//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade and is a no-op until the host
//! installs a recorder.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::models::{MessageStatus, VerdictSource};

/// Messages written to the store by ingestion
pub const MESSAGES_INGESTED_TOTAL: &str = "sms_shield_messages_ingested_total";
/// Records skipped as duplicates or malformed
pub const MESSAGES_SKIPPED_TOTAL: &str = "sms_shield_messages_skipped_total";
/// Contacts auto-created by ingestion
pub const CONTACTS_CREATED_TOTAL: &str = "sms_shield_contacts_created_total";
/// Completed classifications
pub const CLASSIFICATIONS_TOTAL: &str = "sms_shield_classifications_total";
/// Classification attempts deferred to the retry queue
pub const CLASSIFICATIONS_DEFERRED_TOTAL: &str = "sms_shield_classifications_deferred_total";
/// Remote classifier round-trip time
pub const CLASSIFIER_REQUEST_DURATION: &str = "sms_shield_classifier_request_duration_seconds";
/// Ids currently held by the retry queue
pub const RETRY_QUEUE_SIZE: &str = "sms_shield_retry_queue_size";
/// Errors by kind and operation
pub const ERRORS_TOTAL: &str = "sms_shield_errors_total";
/// Duration of timed operations
pub const OPERATION_DURATION: &str = "sms_shield_operation_duration_seconds";

/// Record stored messages by direction
pub fn record_ingested(direction: &'static str, count: u64) {
    counter!(MESSAGES_INGESTED_TOTAL, "direction" => direction).increment(count);
}

/// Record a skipped record with its reason ("duplicate", "malformed", ...)
pub fn record_skipped(reason: &'static str) {
    counter!(MESSAGES_SKIPPED_TOTAL, "reason" => reason).increment(1);
}

/// Record an auto-created contact
pub fn record_contact_created() {
    counter!(CONTACTS_CREATED_TOTAL).increment(1);
}

/// Record a completed classification
pub fn record_classification(source: VerdictSource, status: MessageStatus) {
    counter!(
        CLASSIFICATIONS_TOTAL,
        "source" => source.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
}

/// Record a deferred classification
pub fn record_deferred(reason: &'static str) {
    counter!(CLASSIFICATIONS_DEFERRED_TOTAL, "reason" => reason).increment(1);
}

/// Record one remote classifier request
pub fn record_classifier_request(duration: Duration, success: bool) {
    histogram!(
        CLASSIFIER_REQUEST_DURATION,
        "status" => if success { "success" } else { "error" }
    )
    .record(duration.as_secs_f64());
}

/// Publish the retry queue length
#[allow(clippy::cast_precision_loss)]
pub fn set_retry_queue_size(size: usize) {
    gauge!(RETRY_QUEUE_SIZE).set(size as f64);
}

/// Record an error by kind
pub fn record_error(kind: &'static str, operation: &'static str) {
    counter!(ERRORS_TOTAL, "type" => kind, "operation" => operation).increment(1);
}

/// Record a timed operation
pub fn record_operation_duration(operation: &'static str, duration: Duration) {
    histogram!(OPERATION_DURATION, "operation" => operation).record(duration.as_secs_f64());
}
