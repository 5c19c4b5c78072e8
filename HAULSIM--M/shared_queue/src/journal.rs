use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};

use crate::{QueueError, QueueService, ReceiveOptions, ReceivedMessage};

/// Queue decorator appending every successful send to a JSON-lines file.
///
/// The journal is an audit trail of scheduled events; receives and deletes
/// pass straight through.
pub struct JournaledQueue<Q> {
    inner: Q,
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl<Q: QueueService> JournaledQueue<Q> {
    /// Wraps `inner`, creating the journal's parent directory.
    pub fn new(inner: Q, path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            inner,
            path,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Journal location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The wrapped queue.
    #[must_use]
    pub const fn inner(&self) -> &Q {
        &self.inner
    }

    async fn append(&self, queue: &str, message_id: &str, body: &str, delay: Duration) -> Result<(), QueueError> {
        let line = json!({
            "ts": Utc::now(),
            "queue": queue,
            "message_id": message_id,
            "delay_secs": delay.as_secs(),
            "body": serde_json::from_str::<serde_json::Value>(body)
                .unwrap_or_else(|_| serde_json::Value::String(body.to_string())),
        });
        let data = serde_json::to_vec(&line)?;
        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&data).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<Q: QueueService> QueueService for JournaledQueue<Q> {
    async fn send(&self, queue: &str, body: &str, delay: Duration) -> Result<String, QueueError> {
        let message_id = self.inner.send(queue, body, delay).await?;
        // the message is already enqueued; a journal failure must not trigger a resend
        let _ = self.append(queue, &message_id, body, delay).await;
        Ok(message_id)
    }

    async fn receive(
        &self,
        queue: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.inner.receive(queue, options).await
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError> {
        self.inner.delete(queue, receipt_handle).await
    }
}
