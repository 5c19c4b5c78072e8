use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::{
    sync::Notify,
    time::{sleep_until, Instant},
};
use uuid::Uuid;

use crate::{QueueError, QueueService, ReceiveOptions, ReceivedMessage};

/// Snapshot of a queued message, for inspection in tests and diagnostics.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Message id.
    pub message_id: String,
    /// Raw body.
    pub body: String,
    /// Wall-clock instant the message was sent.
    pub sent_at: DateTime<Utc>,
    /// Delay requested on send.
    pub delay: Duration,
    /// Deliveries so far.
    pub receive_count: u32,
    /// Whether a receiver currently holds it.
    pub in_flight: bool,
}

struct Entry {
    message_id: String,
    body: String,
    sent_at: DateTime<Utc>,
    delay: Duration,
    visible_at: Instant,
    receipt: Option<String>,
    receive_count: u32,
}

/// In-process queue with delay and visibility-timeout semantics.
///
/// Time is measured with `tokio::time::Instant`, so paused-clock tests can
/// advance through delays without sleeping.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    queues: Arc<Mutex<HashMap<String, Vec<Entry>>>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    /// Creates an empty queue service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently stored on `queue`, delayed and in-flight included.
    #[must_use]
    pub fn snapshot(&self, queue: &str) -> Vec<QueuedMessage> {
        let now = Instant::now();
        self.queues
            .lock()
            .get(queue)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| QueuedMessage {
                        message_id: entry.message_id.clone(),
                        body: entry.body.clone(),
                        sent_at: entry.sent_at,
                        delay: entry.delay,
                        receive_count: entry.receive_count,
                        in_flight: entry.receipt.is_some() && entry.visible_at > now,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of messages stored on `queue`.
    #[must_use]
    pub fn depth(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, Vec::len)
    }

    fn take_visible(&self, queue: &str, options: ReceiveOptions) -> (Vec<ReceivedMessage>, Option<Instant>) {
        let now = Instant::now();
        let mut queues = self.queues.lock();
        let entries = queues.entry(queue.to_string()).or_default();
        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;
        for entry in entries.iter_mut() {
            if entry.visible_at > now {
                next_visible = Some(next_visible.map_or(entry.visible_at, |t| t.min(entry.visible_at)));
                continue;
            }
            if batch.len() >= options.max_messages.max(1) {
                break;
            }
            let receipt = Uuid::new_v4().to_string();
            entry.receipt = Some(receipt.clone());
            entry.receive_count += 1;
            entry.visible_at = now + options.visibility_timeout;
            batch.push(ReceivedMessage {
                message_id: entry.message_id.clone(),
                body: entry.body.clone(),
                receipt_handle: receipt,
                receive_count: entry.receive_count,
            });
        }
        (batch, next_visible)
    }
}

#[async_trait]
impl QueueService for MemoryQueue {
    async fn send(&self, queue: &str, body: &str, delay: Duration) -> Result<String, QueueError> {
        let message_id = Uuid::new_v4().to_string();
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push(Entry {
                message_id: message_id.clone(),
                body: body.to_string(),
                sent_at: Utc::now(),
                delay,
                visible_at: Instant::now() + delay,
                receipt: None,
                receive_count: 0,
            });
        self.notify.notify_waiters();
        Ok(message_id)
    }

    async fn receive(
        &self,
        queue: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + options.wait;
        loop {
            // registered before inspecting so a concurrent send cannot be missed
            let notified = self.notify.notified();
            let (batch, next_visible) = self.take_visible(queue, options);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if Instant::now() >= deadline {
                return Ok(batch);
            }
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                () = notified => {}
                () = sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock();
        let entries = queues.entry(queue.to_string()).or_default();
        let position = entries
            .iter()
            .position(|entry| entry.receipt.as_deref() == Some(receipt_handle));
        match position {
            Some(index) => {
                entries.remove(index);
                Ok(())
            }
            None => Err(QueueError::ReceiptNotFound {
                queue: queue.to_string(),
                receipt: receipt_handle.to_string(),
            }),
        }
    }
}
