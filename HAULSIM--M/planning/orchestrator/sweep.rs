use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;

use super::LogisticsOrchestrator;
use crate::{
    error::PlanningError,
    model::{LogisticsDetail, LogisticsId, LogisticsStatus, ServiceKind},
};

/// Per-item failure recorded by a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    /// Detail that could not be re-planned.
    pub logistics_id: LogisticsId,
    /// Status before the attempt.
    pub status: LogisticsStatus,
    /// Error text.
    pub error: String,
    /// Whether the next sweep may succeed.
    pub recoverable: bool,
}

/// Outcome of one re-planning sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Details picked up by the sweep.
    pub attempted: usize,
    /// Details re-planned successfully.
    pub recovered: usize,
    /// Details still stuck.
    pub failed: usize,
    /// Failure details.
    pub failures: Vec<SweepFailure>,
}

/// Whether re-planning should book a delivery rather than a collection.
#[must_use]
pub fn needs_alternative_delivery(detail: &LogisticsDetail) -> bool {
    matches!(
        detail.status,
        LogisticsStatus::StuckInTransit | LogisticsStatus::AlternativeDeliveryPlanned
    ) || detail.service_kind == ServiceKind::Delivery
}

impl LogisticsOrchestrator {
    /// Re-plans every detail in a recoverable status.
    ///
    /// Items run concurrently in batches of `sweep_batch_size`. A failing item
    /// is recorded and does not stop the rest.
    pub async fn reattempt_recoverable(&self) -> Result<SweepReport, PlanningError> {
        let stuck = self
            .repos
            .logistics
            .find_by_statuses(&LogisticsStatus::RECOVERABLE, None)
            .await?;
        let mut report = SweepReport::default();
        if stuck.is_empty() {
            return Ok(report);
        }
        self.log(
            LogLevel::Info,
            "planning.sweep.started",
            json!({ "candidates": stuck.len(), "batch_size": self.settings.sweep_batch_size }),
        );
        for batch in stuck.chunks(self.settings.sweep_batch_size.max(1)) {
            let outcomes = join_all(batch.iter().map(|detail| self.reattempt_one(detail))).await;
            for (detail, outcome) in batch.iter().zip(outcomes) {
                report.attempted += 1;
                match outcome {
                    Ok(updated) => {
                        report.recovered += 1;
                        self.log(
                            LogLevel::Info,
                            "planning.sweep.recovered",
                            json!({
                                "logistics_id": detail.id,
                                "from": detail.status,
                                "to": updated.status,
                            }),
                        );
                    }
                    Err(err) => {
                        report.failed += 1;
                        self.log(
                            LogLevel::Warn,
                            "planning.sweep.item_failed",
                            json!({
                                "logistics_id": detail.id,
                                "status": detail.status,
                                "error": err.to_string(),
                            }),
                        );
                        report.failures.push(SweepFailure {
                            logistics_id: detail.id,
                            status: detail.status,
                            error: err.to_string(),
                            recoverable: err.is_recoverable(),
                        });
                    }
                }
            }
        }
        self.log(
            LogLevel::Info,
            "planning.sweep.finished",
            json!({
                "attempted": report.attempted,
                "recovered": report.recovered,
                "failed": report.failed,
            }),
        );
        Ok(report)
    }

    async fn reattempt_one(&self, detail: &LogisticsDetail) -> Result<LogisticsDetail, PlanningError> {
        if needs_alternative_delivery(detail) {
            self.plan_alternative_delivery(detail.id, None).await
        } else {
            self.reassign_truck(detail.id, None).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Utc};
    use haulsim_clock::{ClockConfig, ManualTimeSource, SimulationClock};
    use shared_logging::Telemetry;
    use shared_queue::{MemoryQueue, RetryPolicy};

    use super::*;
    use crate::{
        model::{Pickup, PickupStatus, Truck},
        orchestrator::{PlanningSettings, QueueNames},
        store::{MemoryStore, Repositories},
    };

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn setup(trucks: Vec<Truck>, pickups: i64) -> (LogisticsOrchestrator, Arc<MemoryStore>, MemoryQueue) {
        let store = Arc::new(MemoryStore::with_fleet(trucks));
        for id in 1..=pickups {
            store.upsert_pickup(Pickup {
                id,
                quantity: 5,
                status: PickupStatus::PaidToLogisticsCo,
            });
        }
        let clock = Arc::new(SimulationClock::new(
            ClockConfig::default(),
            Arc::new(ManualTimeSource::new(at("2030-01-01T00:00:00Z"))),
            Telemetry::disabled(),
        ));
        clock.set_time(at("2025-01-01T00:00:00Z"));
        let queue = MemoryQueue::new();
        let orchestrator = LogisticsOrchestrator::new(
            Repositories::from_store(store.clone()),
            clock,
            Arc::new(queue.clone()),
            QueueNames::default(),
            PlanningSettings {
                horizon_days: 2,
                sweep_batch_size: 2,
                ..PlanningSettings::default()
            },
            Telemetry::disabled(),
        )
        .with_send_retry(RetryPolicy::none());
        (orchestrator, store, queue)
    }

    #[tokio::test]
    async fn sweep_recovers_once_trucks_return() {
        let mut parked = Truck::new(1, 100, 5, 5);
        parked.is_available = false;
        let (orchestrator, store, queue) = setup(vec![parked], 3);
        for pickup in 1..=3 {
            let err = orchestrator
                .plan_after_payment(pickup, 5, at("2025-01-02T00:00:00Z"))
                .await
                .unwrap_err();
            assert!(matches!(err, PlanningError::NoTrucksAvailable { .. }));
        }
        assert_eq!(
            orchestrator.reattempt_recoverable().await.unwrap().recovered,
            0
        );

        store.set_truck_available(1, true);
        let report = orchestrator.reattempt_recoverable().await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.recovered, 3);
        assert!(report.failures.is_empty());
        assert_eq!(queue.depth("pickup-ready"), 3);
        for pickup in 1..=3 {
            let detail = orchestrator.logistics_for_pickup(pickup).await.unwrap().unwrap();
            assert_eq!(detail.status, LogisticsStatus::QueuedForCollection);
            assert_eq!(
                store.pickup(pickup).unwrap().status,
                PickupStatus::ReadyForCollection
            );
        }
    }

    #[tokio::test]
    async fn sweep_retries_exhausted_details() {
        let (orchestrator, store, _queue) = setup(vec![Truck::new(1, 100, 1, 1)], 3);
        for pickup in 1..=3 {
            let _ = orchestrator
                .plan_after_payment(pickup, 5, at("2025-01-01T00:00:00Z"))
                .await;
        }
        let stuck = orchestrator.logistics_for_pickup(3).await.unwrap().unwrap();
        assert_eq!(stuck.status, LogisticsStatus::PendingReplanning);

        store.upsert_truck(Truck::new(2, 100, 1, 1));
        let report = orchestrator.reattempt_recoverable().await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.recovered, 1);

        let extra = orchestrator
            .plan_after_payment(4, 500, at("2025-01-01T00:00:00Z"))
            .await;
        assert!(matches!(extra, Err(PlanningError::CapacityExhausted { .. })));
        let report = orchestrator.reattempt_recoverable().await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 1);
        assert!(report.failures[0].recoverable);
    }

    #[test]
    fn delivery_leg_routes_to_alternative_delivery() {
        let mut detail = LogisticsDetail {
            id: 1,
            pickup_id: 1,
            service_kind: ServiceKind::Collection,
            quantity: 1,
            status: LogisticsStatus::TruckUnavailable,
            schedule: None,
            updated_at: at("2025-01-01T00:00:00Z"),
        };
        assert!(!needs_alternative_delivery(&detail));
        detail.status = LogisticsStatus::StuckInTransit;
        assert!(needs_alternative_delivery(&detail));
        detail.status = LogisticsStatus::NoTrucksAvailable;
        detail.service_kind = ServiceKind::Delivery;
        assert!(needs_alternative_delivery(&detail));
    }
}
