use std::time::Duration;

use serde::Deserialize;
use shared_queue::MAX_DELAY;

use crate::{assignment::DEFAULT_HORIZON_DAYS, model::ServiceKind};

/// Planning knobs; deserializable from a `[planning]` TOML table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PlanningSettings {
    /// Days the assignment engine searches.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    /// Items re-planned concurrently by the sweep.
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
    /// Ceiling on queue message delays, in seconds.
    #[serde(default = "default_max_queue_delay_secs")]
    pub max_queue_delay_secs: u64,
}

impl Default for PlanningSettings {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            sweep_batch_size: default_sweep_batch_size(),
            max_queue_delay_secs: default_max_queue_delay_secs(),
        }
    }
}

impl PlanningSettings {
    /// Delay ceiling, never above what the queue accepts.
    #[must_use]
    pub fn max_queue_delay(&self) -> Duration {
        Duration::from_secs(self.max_queue_delay_secs).min(MAX_DELAY)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.horizon_days > 0, "horizon_days must be > 0");
        anyhow::ensure!(self.sweep_batch_size > 0, "sweep_batch_size must be > 0");
        Ok(())
    }
}

const fn default_horizon_days() -> u32 {
    DEFAULT_HORIZON_DAYS
}

const fn default_sweep_batch_size() -> usize {
    5
}

const fn default_max_queue_delay_secs() -> u64 {
    MAX_DELAY.as_secs()
}

/// Names of the two event queues.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct QueueNames {
    /// Queue carrying `COLLECTION_SCHEDULED`.
    #[serde(default = "default_pickup_queue")]
    pub pickup: String,
    /// Queue carrying `DELIVERY_SCHEDULED`.
    #[serde(default = "default_delivery_queue")]
    pub delivery: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            pickup: default_pickup_queue(),
            delivery: default_delivery_queue(),
        }
    }
}

impl QueueNames {
    /// Queue for the leg.
    #[must_use]
    pub fn for_kind(&self, kind: ServiceKind) -> &str {
        match kind {
            ServiceKind::Collection => &self.pickup,
            ServiceKind::Delivery => &self.delivery,
        }
    }
}

fn default_pickup_queue() -> String {
    "pickup-ready".into()
}

fn default_delivery_queue() -> String {
    "delivery-ready".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_ceiling_never_exceeds_queue_limit() {
        let settings = PlanningSettings {
            max_queue_delay_secs: 5_000,
            ..PlanningSettings::default()
        };
        assert_eq!(settings.max_queue_delay(), MAX_DELAY);
        assert_eq!(PlanningSettings::default().horizon_days, 365);
    }

    #[test]
    fn queue_names_route_by_leg() {
        let names = QueueNames::default();
        assert_eq!(names.for_kind(ServiceKind::Collection), "pickup-ready");
        assert_eq!(names.for_kind(ServiceKind::Delivery), "delivery-ready");
    }
}
