use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use haulsim_planning::LogisticsDetail;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::{LogLevel, Telemetry};
use shared_queue::RetryPolicy;
use thiserror::Error;

/// Lifecycle milestone being announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Goods were collected.
    Collection,
    /// Goods were delivered.
    Delivery,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Collection => "collection",
            Self::Delivery => "delivery",
        })
    }
}

/// Webhook payload describing a detail after a milestone.
#[must_use]
pub fn notification_payload(detail: &LogisticsDetail) -> Value {
    json!({
        "logisticsDetailsId": detail.id,
        "pickupId": detail.pickup_id,
        "status": detail.status,
        "serviceKind": detail.service_kind,
        "quantity": detail.quantity,
        "simulationDate": detail.schedule.as_ref().map(|schedule| schedule.simulation_date),
        "updatedAt": detail.updated_at,
    })
}

/// Errors surfaced by notifiers.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The request never produced a response.
    #[error("notifier transport error: {0}")]
    Transport(String),
    /// The endpoint answered with a non-success status.
    #[error("notifier endpoint returned {0}")]
    Rejected(u16),
}

impl NotifyError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected(status) => *status == 429 || *status >= 500,
        }
    }
}

/// Outbound notification capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announces a milestone. Implementations retry on their own.
    async fn notify(&self, kind: NotificationKind, payload: Value) -> Result<(), NotifyError>;
}

/// Posts `{"kind": .., "payload": ..}` to a webhook with capped exponential backoff.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    retry: RetryPolicy,
    telemetry: Telemetry,
}

impl WebhookNotifier {
    /// Builds a notifier with a per-request timeout.
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
        telemetry: Telemetry,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            retry,
            telemetry,
        })
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, body: &Value, attempt: u32) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let _ = self.telemetry.log(
            LogLevel::Warn,
            "notifier.attempt_rejected",
            json!({ "attempt": attempt, "status": status.as_u16() }),
        );
        Err(NotifyError::Rejected(status.as_u16()))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, kind: NotificationKind, payload: Value) -> Result<(), NotifyError> {
        let body = json!({ "kind": kind, "payload": payload });
        let result = self
            .retry
            .run_if(|attempt| self.post(&body, attempt), NotifyError::is_transient)
            .await;
        let (level, message) = match &result {
            Ok(()) => (LogLevel::Debug, "notifier.sent"),
            Err(_) => (LogLevel::Error, "notifier.gave_up"),
        };
        let _ = self.telemetry.log(
            level,
            message,
            json!({
                "kind": kind,
                "url": self.url,
                "error": result.as_ref().err().map(ToString::to_string),
            }),
        );
        result
    }
}

/// Notifier used when no webhook is configured; accepts and drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _kind: NotificationKind, _payload: Value) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// In-memory notifier that records every call, optionally failing them.
#[derive(Debug, Default, Clone)]
pub struct LoopbackNotifier {
    sent: Arc<Mutex<Vec<(NotificationKind, Value)>>>,
    fail_with: Option<u16>,
}

impl LoopbackNotifier {
    /// Records and accepts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records and rejects every call with `status`.
    #[must_use]
    pub fn failing(status: u16) -> Self {
        Self {
            fail_with: Some(status),
            ..Self::default()
        }
    }

    /// Calls received so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(NotificationKind, Value)> {
        self.sent.lock().clone()
    }

    /// Calls of one kind received so far.
    #[must_use]
    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent.lock().iter().filter(|(sent, _)| *sent == kind).count()
    }
}

#[async_trait]
impl Notifier for LoopbackNotifier {
    async fn notify(&self, kind: NotificationKind, payload: Value) -> Result<(), NotifyError> {
        self.sent.lock().push((kind, payload));
        match self.fail_with {
            Some(status) => Err(NotifyError::Rejected(status)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use haulsim_planning::{LogisticsStatus, ServiceKind};

    #[test]
    fn only_throttling_and_server_errors_are_retried() {
        assert!(NotifyError::Transport("reset".into()).is_transient());
        assert!(NotifyError::Rejected(503).is_transient());
        assert!(NotifyError::Rejected(429).is_transient());
        assert!(!NotifyError::Rejected(400).is_transient());
    }

    #[test]
    fn payload_carries_detail_identity() {
        let detail = LogisticsDetail {
            id: 7,
            pickup_id: 11,
            service_kind: ServiceKind::Delivery,
            quantity: 5,
            status: LogisticsStatus::Delivered,
            schedule: None,
            updated_at: Utc::now(),
        };
        let payload = notification_payload(&detail);
        assert_eq!(payload["logisticsDetailsId"], 7);
        assert_eq!(payload["pickupId"], 11);
        assert_eq!(payload["status"], "DELIVERED");
        assert_eq!(payload["serviceKind"], "delivery");
        assert!(payload["simulationDate"].is_null());
    }

    #[tokio::test]
    async fn loopback_records_failures_too() {
        let notifier = LoopbackNotifier::failing(500);
        let err = notifier
            .notify(NotificationKind::Delivery, json!({ "id": 1 }))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(notifier.count(NotificationKind::Delivery), 1);
        assert_eq!(notifier.count(NotificationKind::Collection), 0);
    }

    #[tokio::test]
    async fn webhook_gives_up_after_capped_attempts() {
        let notifier = WebhookNotifier::new(
            "http://127.0.0.1:9/unreachable",
            Duration::from_millis(200),
            RetryPolicy::fixed(2, Duration::from_millis(10)),
            Telemetry::disabled(),
        )
        .unwrap();
        assert_eq!(notifier.url(), "http://127.0.0.1:9/unreachable");
        let err = notifier
            .notify(NotificationKind::Collection, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
    }
}
