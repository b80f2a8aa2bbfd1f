//! Notification seam.
//!
//! The pipeline reports "new incoming message" and "classification
//! completed" events through a [`Notifier`]. Presentation is left to the
//! host.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::models::{Classification, Message};

/// Events emitted to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ShieldEvent {
    /// An incoming message from a non-blocked contact was stored
    MessageReceived {
        /// Stored message id
        message_id: i64,
        /// Contact display name
        sender_name: String,
        /// Message text
        content: String,
    },
    /// A message left `unchecked`. Emitted exactly once per message.
    ClassificationCompleted(Classification),
}

/// Receiver of pipeline events
pub trait Notifier: Send + Sync {
    /// A new incoming message was stored for a non-blocked contact
    fn message_received(&self, message: &Message, sender_name: &str);

    /// A message was classified by the pipeline
    fn classification_completed(&self, classification: &Classification);
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn message_received(&self, message: &Message, sender_name: &str) {
        info!(message_id = message.id, sender = sender_name, "New message");
    }

    fn classification_completed(&self, classification: &Classification) {
        info!(
            message_id = classification.message_id,
            is_spam = classification.is_spam,
            source = classification.source.as_str(),
            explanation = %classification.explanation,
            "Message classified"
        );
    }
}

/// Forwards events into an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<ShieldEvent>,
}

impl ChannelNotifier {
    /// Notifier plus the receiving end of its channel
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ShieldEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ShieldEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

impl Notifier for ChannelNotifier {
    fn message_received(&self, message: &Message, sender_name: &str) {
        self.send(ShieldEvent::MessageReceived {
            message_id: message.id,
            sender_name: sender_name.to_string(),
            content: message.content.clone(),
        });
    }

    fn classification_completed(&self, classification: &Classification) {
        self.send(ShieldEvent::ClassificationCompleted(classification.clone()));
    }
}
