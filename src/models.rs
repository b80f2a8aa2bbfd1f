//! Data models for message handling and storage
//!
//! This module contains the message and contact records kept by the store,
//! the records exchanged with external sources, and the outcome types of the
//! classification pipeline.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::ShieldError;

/// Direction of a message relative to the device owner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from the sender
    #[default]
    Incoming,
    /// Sent by the device owner
    Outgoing,
}

/// Classification status of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Not yet classified
    Unchecked,
    /// Classified as legitimate
    Safe,
    /// Classified as spam
    Spam,
}

/// Trust status of a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustStatus {
    /// Present in the user's directory or added explicitly
    Known,
    /// Auto-created from an unseen number
    Unknown,
    /// Messages are stored but never classified or surfaced
    Blocked,
}

impl Direction {
    /// Database and wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

impl MessageStatus {
    /// Database and wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unchecked => "unchecked",
            Self::Safe => "safe",
            Self::Spam => "spam",
        }
    }

    /// Status written by the pipeline for a verdict
    #[must_use]
    pub const fn from_verdict(is_spam: bool) -> Self {
        if is_spam {
            Self::Spam
        } else {
            Self::Safe
        }
    }
}

impl TrustStatus {
    /// Database and wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Known => "known",
            Self::Unknown => "unknown",
            Self::Blocked => "blocked",
        }
    }
}

macro_rules! string_enum_impls {
    ($ty:ty, $label:literal, [$($text:literal => $variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = ShieldError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($variant),)+
                    other => Err(ShieldError::InvalidInput(format!("unknown {}: {other}", $label))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value.as_str()?.parse().map_err(|_| FromSqlError::InvalidType)
            }
        }
    };
}

string_enum_impls!(Direction, "direction", [
    "incoming" => Direction::Incoming,
    "outgoing" => Direction::Outgoing,
]);

string_enum_impls!(MessageStatus, "message status", [
    "unchecked" => MessageStatus::Unchecked,
    "safe" => MessageStatus::Safe,
    "spam" => MessageStatus::Spam,
]);

string_enum_impls!(TrustStatus, "trust status", [
    "known" => TrustStatus::Known,
    "unknown" => TrustStatus::Unknown,
    "blocked" => TrustStatus::Blocked,
]);

/// A stored message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Database primary key, also the insertion sequence
    pub id: i64,
    /// Foreign key to the owning contact
    pub contact_id: i64,
    /// Message text content
    pub content: String,
    /// Source clock timestamp in milliseconds
    pub timestamp: i64,
    /// Incoming or outgoing
    pub direction: Direction,
    /// Classification status
    pub status: MessageStatus,
    /// Normalized phone number of the other party
    pub phone_number: String,
}

impl Message {
    /// Dedup key of this message
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.phone_number, self.timestamp, &self.content)
    }

    /// Cursor pointing just past this message in timeline order
    #[must_use]
    pub const fn cursor(&self) -> PageCursor {
        PageCursor {
            timestamp: self.timestamp,
            id: self.id,
        }
    }
}

/// Data for inserting a new message
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Foreign key to the owning contact
    pub contact_id: i64,
    /// Message text content
    pub content: String,
    /// Source clock timestamp in milliseconds
    pub timestamp: i64,
    /// Incoming or outgoing
    pub direction: Direction,
    /// Normalized phone number of the other party
    pub phone_number: String,
}

impl NewMessage {
    /// Dedup key of this message
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.phone_number, self.timestamp, &self.content)
    }

    /// Status a freshly inserted row starts with. Outgoing messages are
    /// implicitly trusted and never enter the pipeline.
    #[must_use]
    pub const fn initial_status(&self) -> MessageStatus {
        match self.direction {
            Direction::Incoming => MessageStatus::Unchecked,
            Direction::Outgoing => MessageStatus::Safe,
        }
    }
}

/// Natural key identifying a message regardless of its row id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    /// Normalized phone number
    pub phone_number: String,
    /// Source clock timestamp in milliseconds
    pub timestamp: i64,
    /// Message text content
    pub content: String,
}

impl DedupKey {
    /// Build a key from its parts
    #[must_use]
    pub fn new(phone_number: &str, timestamp: i64, content: &str) -> Self {
        Self {
            phone_number: phone_number.to_string(),
            timestamp,
            content: content.to_string(),
        }
    }
}

/// Result of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Id of the stored row (new or pre-existing)
    pub id: i64,
    /// False when the dedup key already existed
    pub created: bool,
}

/// Keyset position in the timeline (timestamp DESC, id DESC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// Timestamp of the last message already returned
    pub timestamp: i64,
    /// Id of the last message already returned
    pub id: i64,
}

/// A stored contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Database primary key
    pub id: i64,
    /// Display name
    pub name: String,
    /// Normalized phone number, unique across contacts
    pub phone_number: String,
    /// Trust status
    pub status: TrustStatus,
}

impl Contact {
    /// True when messages from this contact must stay out of the pipeline
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.status == TrustStatus::Blocked
    }
}

/// Data for creating a new contact
#[derive(Debug, Clone)]
pub struct NewContact {
    /// Display name
    pub name: String,
    /// Phone number (normalized by the store)
    pub phone_number: String,
    /// Trust status
    pub status: TrustStatus,
}

/// Partial edit of a contact
#[derive(Debug, Clone, Default)]
pub struct ContactUpdate {
    /// New display name
    pub name: Option<String>,
    /// New phone number (normalized by the store)
    pub phone_number: Option<String>,
    /// New trust status
    pub status: Option<TrustStatus>,
}

/// A raw record as delivered by the external message source.
///
/// Missing fields deserialize to empty values; ingestion treats a record
/// without an address or body as malformed and skips it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    /// Originating or destination address, unnormalized
    #[serde(default)]
    pub sender: String,
    /// Message body
    #[serde(default)]
    pub body: String,
    /// Source clock timestamp in milliseconds
    #[serde(default)]
    pub timestamp_millis: i64,
    /// Incoming or outgoing
    #[serde(default)]
    pub direction: Direction,
}

impl SourceRecord {
    /// Incoming record
    pub fn incoming(sender: impl Into<String>, body: impl Into<String>, timestamp_millis: i64) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            timestamp_millis,
            direction: Direction::Incoming,
        }
    }

    /// Outgoing record
    pub fn outgoing(recipient: impl Into<String>, body: impl Into<String>, timestamp_millis: i64) -> Self {
        Self {
            direction: Direction::Outgoing,
            ..Self::incoming(recipient, body, timestamp_millis)
        }
    }
}

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictSource {
    /// The remote classifier answered
    Remote,
    /// The local heuristic scorer decided
    Heuristic,
}

impl VerdictSource {
    /// Label used in logs and metrics
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Heuristic => "heuristic",
        }
    }
}

/// Outcome of one classification attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Spam indicator
    pub is_spam: bool,
    /// Explanatory text from the classifier or the fallback
    pub explanation: String,
    /// Which classifier produced the verdict
    pub source: VerdictSource,
}

/// Completion payload delivered once per classified message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Classified message
    pub message_id: i64,
    /// Spam indicator
    pub is_spam: bool,
    /// Explanatory text
    pub explanation: String,
    /// Which classifier produced the verdict
    pub source: VerdictSource,
}

/// Aggregate counts for the stats command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Total stored messages
    pub total_messages: usize,
    /// Messages awaiting classification
    pub unchecked: usize,
    /// Messages classified safe
    pub safe: usize,
    /// Messages classified spam
    pub spam: usize,
    /// Total stored contacts
    pub total_contacts: usize,
    /// Contacts with blocked status
    pub blocked_contacts: usize,
}
