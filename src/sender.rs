use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;

/// Fire-and-forget transport for outbound messages. Delivery is not
/// confirmed.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// Hand `body` to the transport for `phone_number`
    async fn send(&self, phone_number: &str, body: &str) -> Result<()>;
}

/// Logs outbound messages instead of sending them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

#[async_trait]
impl OutboundSender for LogSender {
    async fn send(&self, phone_number: &str, body: &str) -> Result<()> {
        info!(to = phone_number, chars = body.chars().count(), "Outbound message handed off");
        Ok(())
    }
}

/// Records outbound messages in memory
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    /// Everything sent so far as `(phone, body)` pairs
    #[must_use]
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl OutboundSender for RecordingSender {
    async fn send(&self, phone_number: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((phone_number.to_string(), body.to_string()));
        Ok(())
    }
}
