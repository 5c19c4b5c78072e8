#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Durable queue abstractions used to schedule collection and delivery events.
//!
//! The contract mirrors a hosted message queue: messages may be delayed on send,
//! become invisible for a visibility timeout once received, and must be deleted
//! explicitly with the receipt handle of the latest receive. Delivery is
//! at-least-once.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Append-only journal decorator.
pub mod journal;
/// In-memory queue implementation.
pub mod memory;
/// Exponential backoff helper.
pub mod retry;

pub use journal::JournaledQueue;
pub use memory::MemoryQueue;
pub use retry::RetryPolicy;

/// Longest delay a queue accepts on send.
pub const MAX_DELAY: Duration = Duration::from_secs(900);

/// Errors surfaced by queue implementations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The receipt handle does not match any in-flight message.
    #[error("receipt handle {receipt} not found on queue {queue}")]
    ReceiptNotFound {
        /// Queue name.
        queue: String,
        /// Receipt handle supplied by the caller.
        receipt: String,
    },
    /// Network or service failure talking to the queue.
    #[error("queue transport error: {0}")]
    Transport(String),
    /// Local journal could not be written.
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
    /// Message could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}

/// Parameters for a long-poll receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveOptions {
    /// Upper bound on messages returned.
    pub max_messages: usize,
    /// How long to wait for the first visible message.
    pub wait: Duration,
    /// How long received messages stay hidden from other receivers.
    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

/// Message handed to a receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// Stable id assigned on send.
    pub message_id: String,
    /// Raw body as sent.
    pub body: String,
    /// Handle required to delete this delivery.
    pub receipt_handle: String,
    /// Number of times the message has been received, including this one.
    pub receive_count: u32,
}

/// Queue service contract.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Enqueues a body that becomes visible after `delay`. Returns the message id.
    async fn send(&self, queue: &str, body: &str, delay: Duration) -> Result<String, QueueError>;

    /// Long-polls for visible messages.
    async fn receive(
        &self,
        queue: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Acknowledges a message so it is never redelivered.
    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError>;
}
