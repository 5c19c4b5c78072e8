use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::clock::ClockError;

/// External authority for the current simulated time.
#[async_trait]
pub trait TimeSyncSource: Send + Sync {
    /// Fetches the authoritative simulated instant.
    async fn fetch(&self) -> Result<DateTime<Utc>, ClockError>;

    /// Label used in logs.
    fn describe(&self) -> String;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
    #[serde(default)]
    simulation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    epoch_millis: Option<i64>,
}

impl SyncResponse {
    fn instant(&self) -> Result<DateTime<Utc>, ClockError> {
        if let Some(time) = self.simulation_time {
            return Ok(time);
        }
        self.epoch_millis
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| {
                ClockError::SyncPayload("expected simulationTime or epochMillis".into())
            })
    }
}

/// Polls an HTTP endpoint returning `{"simulationTime": "<rfc3339>"}` or `{"epochMillis": n}`.
#[derive(Debug, Clone)]
pub struct HttpTimeSync {
    client: Client,
    endpoint: String,
}

impl HttpTimeSync {
    /// Builds a client with the given request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ClockError> {
        let client = Client::builder()
            .user_agent("haulsim-clock/0.1")
            .timeout(timeout)
            .build()
            .map_err(|err| ClockError::SyncTransport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Target endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TimeSyncSource for HttpTimeSync {
    async fn fetch(&self) -> Result<DateTime<Utc>, ClockError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| ClockError::SyncTransport(err.to_string()))?;
        let body: SyncResponse = response
            .json()
            .await
            .map_err(|err| ClockError::SyncPayload(err.to_string()))?;
        body.instant()
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}
