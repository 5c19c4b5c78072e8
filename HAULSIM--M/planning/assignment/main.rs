use std::sync::Arc;

use chrono::{DateTime, Utc};
use haulsim_clock::{
    calendar::{next_midnight, start_of_day},
    SimulationClock,
};
use serde_json::json;
use shared_logging::{LogLevel, Telemetry};

use crate::{
    error::PlanningError,
    model::{
        LogisticsDetail, LogisticsId, LogisticsStatus, LogisticsUpdate, NewLogisticsDetail,
        PickupId, PickupStatus, ServiceKind, Truck, TruckAllocation, TruckId,
    },
    store::Repositories,
};

/// Candidate filtering and schedule helpers.
pub mod helper;

pub use helper::{candidate_trucks, initial_pickup_date, schedule_for_day};

/// Days searched before giving up on a request.
pub const DEFAULT_HORIZON_DAYS: u32 = 365;

/// Input to [`AssignmentEngine::assign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRequest {
    /// Pickup being planned.
    pub pickup_id: PickupId,
    /// Units to move; must fit one truck.
    pub quantity: u32,
    /// First simulated day to try.
    pub requested_date: DateTime<Utc>,
    /// Truck to skip (typically the one that just became unavailable).
    pub exclude_truck: Option<TruckId>,
    /// Detail to update instead of creating a new one.
    pub existing_logistics: Option<LogisticsId>,
    /// Leg to book.
    pub kind: ServiceKind,
}

impl AssignmentRequest {
    /// Collection request creating a new detail.
    #[must_use]
    pub const fn collection(
        pickup_id: PickupId,
        quantity: u32,
        requested_date: DateTime<Utc>,
    ) -> Self {
        Self {
            pickup_id,
            quantity,
            requested_date,
            exclude_truck: None,
            existing_logistics: None,
            kind: ServiceKind::Collection,
        }
    }

    /// Re-plans the given detail for the same pickup.
    #[must_use]
    pub fn for_existing(detail: &LogisticsDetail, kind: ServiceKind, requested_date: DateTime<Utc>) -> Self {
        Self {
            pickup_id: detail.pickup_id,
            quantity: detail.quantity,
            requested_date,
            exclude_truck: None,
            existing_logistics: Some(detail.id),
            kind,
        }
    }

    /// Skips `truck`.
    #[must_use]
    pub const fn excluding(mut self, truck: Option<TruckId>) -> Self {
        self.exclude_truck = truck;
        self
    }

    /// Updates `logistics` instead of creating a detail.
    #[must_use]
    pub const fn with_existing(mut self, logistics: Option<LogisticsId>) -> Self {
        self.existing_logistics = logistics;
        self
    }
}

/// Successful booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Persisted detail with its new schedule.
    pub logistics: LogisticsDetail,
    /// Selected truck.
    pub truck: Truck,
    /// Fresh allocation row.
    pub allocation: TruckAllocation,
    /// Days advanced past the requested date.
    pub days_advanced: u32,
}

/// First-fit truck selection over the fleet with day-by-day fallback.
///
/// The day-count check and the booking are separate repository calls, so two
/// concurrent assignments may both take the last slot of a truck-day.
pub struct AssignmentEngine {
    repos: Repositories,
    clock: Arc<SimulationClock>,
    horizon_days: u32,
    telemetry: Telemetry,
}

impl AssignmentEngine {
    /// Creates an engine searching [`DEFAULT_HORIZON_DAYS`] days.
    #[must_use]
    pub fn new(repos: Repositories, clock: Arc<SimulationClock>, telemetry: Telemetry) -> Self {
        Self {
            repos,
            clock,
            horizon_days: DEFAULT_HORIZON_DAYS,
            telemetry,
        }
    }

    /// Overrides the search horizon (at least one day).
    #[must_use]
    pub fn with_horizon(mut self, days: u32) -> Self {
        self.horizon_days = days.max(1);
        self
    }

    /// Days searched per request.
    #[must_use]
    pub const fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    /// Finds a truck for the request and persists the detail and allocation.
    ///
    /// With no available trucks the detail becomes `NO_TRUCKS_AVAILABLE` and a
    /// non-recoverable error is returned at once. When no truck fits within
    /// the horizon the detail becomes `PENDING_REPLANNING` and the error is
    /// recoverable. Both failures mark the pickup `FAILED`.
    pub async fn assign(&self, request: AssignmentRequest) -> Result<Assignment, PlanningError> {
        let trucks = candidate_trucks(self.repos.trucks.find_all().await?, request.exclude_truck);
        if trucks.is_empty() {
            let logistics_id = self
                .record_failure(&request, LogisticsStatus::NoTrucksAvailable)
                .await?;
            self.log(
                LogLevel::Warn,
                "planning.assign.no_trucks",
                json!({
                    "pickup_id": request.pickup_id,
                    "logistics_id": logistics_id,
                    "excluded": request.exclude_truck,
                }),
            );
            return Err(PlanningError::NoTrucksAvailable {
                pickup_id: request.pickup_id,
                logistics_id,
            });
        }

        let fitting: Vec<&Truck> = trucks
            .iter()
            .filter(|truck| truck.max_capacity >= request.quantity)
            .filter(|truck| truck.daily_limit(request.kind) > 0)
            .collect();
        let mut day = start_of_day(request.requested_date);
        if !fitting.is_empty() {
            for offset in 0..self.horizon_days {
                for truck in &fitting {
                    let booked = self
                        .repos
                        .trucks
                        .active_allocations_for_truck_on_day(truck.id, day.date_naive(), request.kind)
                        .await?;
                    if booked < truck.daily_limit(request.kind) {
                        return self.commit(&request, (*truck).clone(), day, offset).await;
                    }
                }
                day = next_midnight(day);
            }
        }

        let logistics_id = self
            .record_failure(&request, LogisticsStatus::PendingReplanning)
            .await?;
        self.log(
            LogLevel::Warn,
            "planning.assign.exhausted",
            json!({
                "pickup_id": request.pickup_id,
                "logistics_id": logistics_id,
                "quantity": request.quantity,
                "fitting_trucks": fitting.len(),
                "days": self.horizon_days,
            }),
        );
        Err(PlanningError::CapacityExhausted {
            pickup_id: request.pickup_id,
            quantity: request.quantity,
            days: self.horizon_days,
            logistics_id,
        })
    }

    async fn commit(
        &self,
        request: &AssignmentRequest,
        truck: Truck,
        day: DateTime<Utc>,
        days_advanced: u32,
    ) -> Result<Assignment, PlanningError> {
        let schedule = schedule_for_day(&self.clock, day);
        let status = match request.kind {
            ServiceKind::Collection => LogisticsStatus::PendingPlanning,
            ServiceKind::Delivery => LogisticsStatus::AlternativeDeliveryPlanned,
        };
        let logistics = match request.existing_logistics {
            Some(id) => self
                .repos
                .logistics
                .update(
                    id,
                    LogisticsUpdate::status(status)
                        .with_service_kind(request.kind)
                        .with_schedule(schedule),
                )
                .await?
                .ok_or(PlanningError::LogisticsNotFound(id))?,
            None => {
                self.repos
                    .logistics
                    .create(NewLogisticsDetail {
                        pickup_id: request.pickup_id,
                        service_kind: request.kind,
                        quantity: request.quantity,
                        status,
                        schedule: Some(schedule),
                    })
                    .await?
            }
        };
        self.repos.allocations.delete_for_logistics(logistics.id).await?;
        let allocation = self
            .repos
            .allocations
            .create(logistics.id, truck.id, request.kind, schedule.day())
            .await?;
        self.log(
            LogLevel::Info,
            "planning.assign.selected",
            json!({
                "pickup_id": request.pickup_id,
                "logistics_id": logistics.id,
                "truck_id": truck.id,
                "kind": request.kind,
                "day": schedule.day(),
                "days_advanced": days_advanced,
            }),
        );
        Ok(Assignment {
            logistics,
            truck,
            allocation,
            days_advanced,
        })
    }

    async fn record_failure(
        &self,
        request: &AssignmentRequest,
        status: LogisticsStatus,
    ) -> Result<LogisticsId, PlanningError> {
        let logistics_id = match request.existing_logistics {
            Some(id) => {
                self.repos
                    .logistics
                    .update(
                        id,
                        LogisticsUpdate::status(status).with_service_kind(request.kind),
                    )
                    .await?
                    .ok_or(PlanningError::LogisticsNotFound(id))?
                    .id
            }
            None => {
                self.repos
                    .logistics
                    .create(NewLogisticsDetail {
                        pickup_id: request.pickup_id,
                        service_kind: request.kind,
                        quantity: request.quantity,
                        status,
                        schedule: None,
                    })
                    .await?
                    .id
            }
        };
        if let Err(err) = self
            .repos
            .pickup_status
            .set_pickup_status(request.pickup_id, PickupStatus::Failed)
            .await
        {
            self.log(
                LogLevel::Warn,
                "planning.assign.pickup_status_failed",
                json!({ "pickup_id": request.pickup_id, "error": err.to_string() }),
            );
        }
        Ok(logistics_id)
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        let _ = self.telemetry.log(level, message, metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::Pickup,
        store::{MemoryStore, TruckRepository},
    };
    use haulsim_clock::{ClockConfig, ManualTimeSource};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn fixture(trucks: Vec<Truck>) -> (AssignmentEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_fleet(trucks));
        store.upsert_pickup(Pickup {
            id: 11,
            quantity: 5,
            status: PickupStatus::PaidToLogisticsCo,
        });
        let source = Arc::new(ManualTimeSource::new(at("2024-06-01T00:00:00Z")));
        let clock = Arc::new(SimulationClock::new(
            ClockConfig::default(),
            source,
            Telemetry::disabled(),
        ));
        clock.set_time(at("2025-01-01T00:00:00Z"));
        let engine = AssignmentEngine::new(
            Repositories::from_store(store.clone()),
            clock,
            Telemetry::disabled(),
        );
        (engine, store)
    }

    #[tokio::test]
    async fn assigns_same_day_when_truck_fits() {
        let (engine, store) = fixture(vec![Truck::new(1, 1_000, 25, 25)]);
        let assignment = engine
            .assign(AssignmentRequest::collection(11, 5, at("2025-01-01T00:00:00Z")))
            .await
            .unwrap();
        assert_eq!(assignment.truck.id, 1);
        assert_eq!(assignment.days_advanced, 0);
        assert_eq!(assignment.logistics.status, LogisticsStatus::PendingPlanning);
        let schedule = assignment.logistics.schedule.unwrap();
        assert_eq!(schedule.simulation_date, at("2025-01-01T00:00:00Z"));
        assert_eq!(
            schedule.simulated_delivery_timestamp,
            at("2025-01-01T23:59:59.999Z")
        );
        assert_eq!(schedule.real_pickup_timestamp, at("2024-06-01T00:00:00Z"));
        assert_eq!(store.allocation_history(assignment.logistics.id).len(), 1);
    }

    #[tokio::test]
    async fn first_fit_skips_small_and_full_trucks() {
        let (engine, store) = fixture(vec![
            Truck::new(1, 4, 25, 25),
            Truck::new(2, 100, 1, 1),
            Truck::new(3, 100, 1, 1),
        ]);
        let first = engine
            .assign(AssignmentRequest::collection(11, 5, at("2025-01-01T08:00:00Z")))
            .await
            .unwrap();
        assert_eq!(first.truck.id, 2);
        let second = engine
            .assign(AssignmentRequest::collection(11, 5, at("2025-01-01T08:00:00Z")))
            .await
            .unwrap();
        assert_eq!(second.truck.id, 3);
        let third = engine
            .assign(AssignmentRequest::collection(11, 5, at("2025-01-01T08:00:00Z")))
            .await
            .unwrap();
        assert_eq!(third.truck.id, 2);
        assert_eq!(third.days_advanced, 1);
        for assignment in [&first, &second, &third] {
            assert!(assignment.truck.max_capacity >= 5);
            let count = store
                .active_allocations_for_truck_on_day(
                    assignment.truck.id,
                    assignment.allocation.day,
                    ServiceKind::Collection,
                )
                .await
                .unwrap();
            assert!(count <= assignment.truck.max_pickups_per_day);
        }
    }

    #[tokio::test]
    async fn no_available_trucks_fails_fast() {
        let mut parked = Truck::new(1, 1_000, 25, 25);
        parked.is_available = false;
        let (engine, store) = fixture(vec![parked, Truck::new(2, 1_000, 25, 25)]);
        let err = engine
            .assign(
                AssignmentRequest::collection(11, 5, at("2025-01-01T00:00:00Z")).excluding(Some(2)),
            )
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
        let logistics_id = match err {
            PlanningError::NoTrucksAvailable { logistics_id, .. } => logistics_id,
            other => panic!("unexpected error {other}"),
        };
        assert_eq!(
            store.logistics(logistics_id).unwrap().status,
            LogisticsStatus::NoTrucksAvailable
        );
        assert_eq!(store.pickup(11).unwrap().status, PickupStatus::Failed);
    }

    #[tokio::test]
    async fn exhausting_the_horizon_is_recoverable() {
        let (engine, store) = fixture(vec![Truck::new(1, 2, 25, 25)]);
        let engine = engine.with_horizon(3);
        let err = engine
            .assign(AssignmentRequest::collection(11, 5, at("2025-01-01T00:00:00Z")))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        let (logistics_id, days) = match err {
            PlanningError::CapacityExhausted {
                logistics_id, days, ..
            } => (logistics_id, days),
            other => panic!("unexpected error {other}"),
        };
        assert_eq!(days, 3);
        assert_eq!(
            store.logistics(logistics_id).unwrap().status,
            LogisticsStatus::PendingReplanning
        );
        assert_eq!(store.pickup(11).unwrap().status, PickupStatus::Failed);
    }

    #[tokio::test]
    async fn replanning_replaces_the_allocation() {
        let (engine, store) = fixture(vec![Truck::new(1, 100, 5, 5), Truck::new(2, 100, 5, 5)]);
        let first = engine
            .assign(AssignmentRequest::collection(11, 5, at("2025-01-01T00:00:00Z")))
            .await
            .unwrap();
        let second = engine
            .assign(
                AssignmentRequest::for_existing(
                    &first.logistics,
                    ServiceKind::Collection,
                    at("2025-01-02T00:00:00Z"),
                )
                .excluding(Some(first.truck.id)),
            )
            .await
            .unwrap();
        assert_eq!(second.logistics.id, first.logistics.id);
        assert_eq!(second.truck.id, 2);
        let history = store.allocation_history(first.logistics.id);
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_active());
        assert!(history[1].is_active());
    }

    #[tokio::test]
    async fn delivery_leg_checks_dropoff_limit() {
        let (engine, _store) = fixture(vec![Truck::new(1, 100, 5, 0), Truck::new(2, 100, 0, 5)]);
        let collection = engine
            .assign(AssignmentRequest::collection(11, 5, at("2025-01-01T00:00:00Z")))
            .await
            .unwrap();
        assert_eq!(collection.truck.id, 1);
        let delivery = engine
            .assign(AssignmentRequest::for_existing(
                &collection.logistics,
                ServiceKind::Delivery,
                at("2025-01-01T00:00:00Z"),
            ))
            .await
            .unwrap();
        assert_eq!(delivery.truck.id, 2);
        assert_eq!(
            delivery.logistics.status,
            LogisticsStatus::AlternativeDeliveryPlanned
        );
        assert_eq!(delivery.logistics.service_kind, ServiceKind::Delivery);
    }
}
