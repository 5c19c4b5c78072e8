use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::calendar::MS_PER_DAY;

/// Settings for a [`crate::SimulationClock`]; deserializable from a `[clock]` TOML table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClockConfig {
    /// Simulated instant to anchor at on start; the default epoch when absent.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Real milliseconds that make up one simulated day.
    #[serde(default = "default_real_ms_per_sim_day")]
    pub real_ms_per_sim_day: u64,
    /// Tick period in real milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// External time source polled for re-sync.
    #[serde(default)]
    pub sync_endpoint: Option<String>,
    /// Period between sync attempts.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Timeout for a single sync request.
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// Consecutive failures after which sync disables itself.
    #[serde(default = "default_sync_failure_threshold")]
    pub sync_failure_threshold: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            start_time: None,
            real_ms_per_sim_day: default_real_ms_per_sim_day(),
            tick_interval_ms: default_tick_interval_ms(),
            sync_endpoint: None,
            sync_interval_ms: default_sync_interval_ms(),
            sync_timeout_ms: default_sync_timeout_ms(),
            sync_failure_threshold: default_sync_failure_threshold(),
        }
    }
}

impl ClockConfig {
    /// Anchor used by `reset` and by `start` without an explicit time.
    #[must_use]
    pub fn default_epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2050, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Simulated milliseconds elapsing per real millisecond.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn speed_factor(&self) -> f64 {
        MS_PER_DAY as f64 / self.real_ms_per_sim_day.max(1) as f64
    }

    /// Tick period.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Sync period.
    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Sync request timeout.
    #[must_use]
    pub const fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.real_ms_per_sim_day > 0, "real_ms_per_sim_day must be > 0");
        anyhow::ensure!(self.tick_interval_ms > 0, "tick_interval_ms must be > 0");
        anyhow::ensure!(
            self.sync_failure_threshold > 0,
            "sync_failure_threshold must be > 0"
        );
        Ok(())
    }
}

const fn default_real_ms_per_sim_day() -> u64 {
    120_000
}

const fn default_tick_interval_ms() -> u64 {
    1_000
}

const fn default_sync_interval_ms() -> u64 {
    30_000
}

const fn default_sync_timeout_ms() -> u64 {
    5_000
}

const fn default_sync_failure_threshold() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_speed_maps_one_day_to_two_minutes() {
        let config = ClockConfig::default();
        assert!((config.speed_factor() - 720.0).abs() < f64::EPSILON);
        assert_eq!(config.sync_interval(), Duration::from_secs(30));
        assert_eq!(config.sync_timeout(), Duration::from_secs(5));
        assert_eq!(config.sync_failure_threshold, 3);
    }

    #[test]
    fn epoch_is_2050() {
        assert_eq!(
            ClockConfig::default_epoch(),
            "2050-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn rejects_zero_day_length() {
        let config = ClockConfig {
            real_ms_per_sim_day: 0,
            ..ClockConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
