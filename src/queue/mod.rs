//! Message queue boundary for the queue strategy.
//!
//! Delivery is at-least-once: a received message is hidden from other
//! consumers for a visibility window and reappears if it is not
//! acknowledged in time (worker crash, lost lease). The conditional claim
//! against the request store, not the queue, is what makes redelivery
//! safe, so the queue contract stays deliberately small.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::JobConfiguration;

pub mod in_memory;

pub use in_memory::InMemoryWorkQueue;

/// Queue-boundary error with retry classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueError {
    pub operation: String,
    pub message: String,
    pub retryable: bool,
}

impl QueueError {
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

impl std::error::Error for QueueError {}

/// Payload of one queued job. Carries a copy of the configuration so a
/// worker can begin without a store read; status still flows through the
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub request_id: String,
    pub configuration: JobConfiguration,
}

/// A received message plus the lease token needed to acknowledge it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: JobMessage,
    /// Opaque lease token; valid until the visibility window lapses.
    pub token: String,
}

#[async_trait::async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a message, optionally invisible for `delay` (retry backoff).
    async fn enqueue(&self, message: JobMessage, delay: Option<Duration>) -> Result<(), QueueError>;

    /// Receive one message, long-polling up to `wait`. The message stays
    /// invisible to other receivers for `visibility_timeout`; if it is not
    /// acked within that window it becomes receivable again.
    async fn receive(
        &self,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError>;

    /// Delete a received message. Fails permanently if the lease already
    /// lapsed (the message may have been redelivered).
    async fn ack(&self, token: &str) -> Result<(), QueueError>;

    /// Publish a message to the dead-letter holding area for offline
    /// inspection. Does not ack the original.
    async fn send_to_dead_letter(&self, message: JobMessage) -> Result<(), QueueError>;
}
