use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use haulsim_clock::{calendar::start_of_day, SimulationClock};
use serde_json::json;
use shared_logging::{LogLevel, Telemetry};
use shared_queue::{QueueError, QueueService, RetryPolicy};

use crate::{
    assignment::{initial_pickup_date, AssignmentEngine, AssignmentRequest},
    error::PlanningError,
    model::{
        LogisticsDetail, LogisticsId, LogisticsStatus, LogisticsUpdate, PickupId, PickupStatus,
        ServiceKind, TruckId,
    },
    module::LogisticsPlanner,
    store::Repositories,
};

/// Queue message bodies.
pub mod events;
/// Planning and queue-name settings.
pub mod settings;
/// Day-boundary re-planning sweep.
pub mod sweep;

pub use events::{EventType, LogisticsEvent};
pub use settings::{PlanningSettings, QueueNames};
pub use sweep::{SweepFailure, SweepReport};

/// Outcome of a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The transition was performed.
    Applied(LogisticsDetail),
    /// Already at or past the target; nothing changed.
    Unchanged(LogisticsDetail),
    /// The truck was unavailable and the detail was re-planned instead.
    Replanned(LogisticsDetail),
}

impl Transition {
    /// Detail after the call.
    #[must_use]
    pub const fn detail(&self) -> &LogisticsDetail {
        match self {
            Self::Applied(detail) | Self::Unchanged(detail) | Self::Replanned(detail) => detail,
        }
    }

    /// Consumes the outcome.
    #[must_use]
    pub fn into_detail(self) -> LogisticsDetail {
        match self {
            Self::Applied(detail) | Self::Unchanged(detail) | Self::Replanned(detail) => detail,
        }
    }
}

/// Drives a pickup from payment through collection and delivery.
pub struct LogisticsOrchestrator {
    repos: Repositories,
    engine: AssignmentEngine,
    clock: Arc<SimulationClock>,
    queue: Arc<dyn QueueService>,
    queues: QueueNames,
    settings: PlanningSettings,
    send_retry: RetryPolicy,
    telemetry: Telemetry,
}

impl LogisticsOrchestrator {
    /// Wires the orchestrator and its assignment engine.
    #[must_use]
    pub fn new(
        repos: Repositories,
        clock: Arc<SimulationClock>,
        queue: Arc<dyn QueueService>,
        queues: QueueNames,
        settings: PlanningSettings,
        telemetry: Telemetry,
    ) -> Self {
        let engine = AssignmentEngine::new(
            repos.clone(),
            Arc::clone(&clock),
            telemetry.scoped("assignment"),
        )
        .with_horizon(settings.horizon_days);
        Self {
            repos,
            engine,
            clock,
            queue,
            queues,
            settings,
            send_retry: RetryPolicy::fixed(3, Duration::from_millis(200)),
            telemetry,
        }
    }

    /// Overrides the retry policy for queue sends.
    #[must_use]
    pub const fn with_send_retry(mut self, policy: RetryPolicy) -> Self {
        self.send_retry = policy;
        self
    }

    /// Assignment engine in use.
    #[must_use]
    pub const fn engine(&self) -> &AssignmentEngine {
        &self.engine
    }

    /// Clock in use.
    #[must_use]
    pub const fn clock(&self) -> &Arc<SimulationClock> {
        &self.clock
    }

    /// Queue names in use.
    #[must_use]
    pub const fn queues(&self) -> &QueueNames {
        &self.queues
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &PlanningSettings {
        &self.settings
    }

    /// Loads the pickup, derives its first day from the clock and plans it.
    ///
    /// Cancelled pickups are rejected. An unpaid (`ORDER_RECEIVED`) pickup is
    /// moved to `PAID_TO_LOGISTICS_CO` first.
    pub async fn handle_payment_confirmed(
        &self,
        pickup_id: PickupId,
    ) -> Result<LogisticsDetail, PlanningError> {
        let pickup = self
            .repos
            .pickups
            .find_by_id(pickup_id)
            .await?
            .ok_or(PlanningError::PickupNotFound(pickup_id))?;
        if pickup.status == PickupStatus::Cancelled {
            return Err(PlanningError::PickupCancelled(pickup_id));
        }
        if pickup.status == PickupStatus::OrderReceived {
            self.repos
                .pickup_status
                .set_pickup_status(pickup_id, PickupStatus::PaidToLogisticsCo)
                .await?;
        }
        let initial = initial_pickup_date(self.clock.current_time());
        self.log(
            LogLevel::Info,
            "planning.payment.confirmed",
            json!({ "pickup_id": pickup_id, "quantity": pickup.quantity, "initial_day": initial }),
        );
        self.plan_after_payment(pickup_id, pickup.quantity, initial).await
    }

    /// Assigns a truck and queues the collection event.
    ///
    /// A pickup whose detail is already queued or further along is returned
    /// unchanged. A failed enqueue leaves the detail in `PENDING_REPLANNING`.
    pub async fn plan_after_payment(
        &self,
        pickup_id: PickupId,
        quantity: u32,
        initial_sim_date: DateTime<Utc>,
    ) -> Result<LogisticsDetail, PlanningError> {
        let existing = self.repos.logistics.find_by_pickup(pickup_id).await?;
        if let Some(detail) = existing.as_ref().filter(|d| d.status.is_planned_forward()) {
            self.log(
                LogLevel::Debug,
                "planning.plan.already_planned",
                json!({ "pickup_id": pickup_id, "logistics_id": detail.id, "status": detail.status }),
            );
            return Ok(detail.clone());
        }
        let request = AssignmentRequest::collection(pickup_id, quantity, initial_sim_date)
            .with_existing(existing.map(|detail| detail.id));
        let assignment = self.engine.assign(request).await?;
        self.queue_collection(assignment.logistics).await
    }

    /// Current detail of a pickup.
    pub async fn logistics_for_pickup(
        &self,
        pickup_id: PickupId,
    ) -> Result<Option<LogisticsDetail>, PlanningError> {
        Ok(self.repos.logistics.find_by_pickup(pickup_id).await?)
    }

    /// Marks the load collected.
    ///
    /// Repeated calls after collection return [`Transition::Unchanged`]. When
    /// the allocated truck is unavailable the detail passes through
    /// `TRUCK_UNAVAILABLE` and is reassigned to another truck.
    pub async fn mark_collected(&self, id: LogisticsId) -> Result<Transition, PlanningError> {
        let detail = self.load(id).await?;
        if detail.status.is_collected_or_later() {
            return Ok(Transition::Unchanged(detail));
        }
        if detail.status == LogisticsStatus::Failed {
            return Err(invalid(&detail, "collect"));
        }
        let allocation = self
            .repos
            .allocations
            .active_for_logistics(id)
            .await?
            .ok_or(PlanningError::NoActiveAllocation(id))?;
        if !self.truck_available(allocation.truck_id).await? {
            self.set_status(id, LogisticsStatus::TruckUnavailable).await?;
            self.log(
                LogLevel::Warn,
                "planning.collect.truck_unavailable",
                json!({ "logistics_id": id, "truck_id": allocation.truck_id }),
            );
            let replanned = self.reassign_truck(id, Some(allocation.truck_id)).await?;
            return Ok(Transition::Replanned(replanned));
        }
        let updated = self.set_status(id, LogisticsStatus::Collected).await?;
        self.repos
            .pickup_status
            .set_pickup_status(detail.pickup_id, PickupStatus::Collected)
            .await?;
        self.log(
            LogLevel::Info,
            "planning.collect.done",
            json!({ "logistics_id": id, "truck_id": allocation.truck_id }),
        );
        Ok(Transition::Applied(updated))
    }

    /// Queues the delivery event for a collected load.
    ///
    /// A no-op once the delivery is queued or done. A failed enqueue leaves
    /// the detail in `STUCK_IN_TRANSIT` for the sweep.
    pub async fn schedule_delivery(&self, id: LogisticsId) -> Result<LogisticsDetail, PlanningError> {
        let detail = self.load(id).await?;
        match detail.status {
            LogisticsStatus::QueuedForDelivery | LogisticsStatus::Delivered => return Ok(detail),
            LogisticsStatus::Collected => {}
            _ => return Err(invalid(&detail, "schedule delivery")),
        }
        if let Err(err) = self.enqueue(&detail, ServiceKind::Delivery).await {
            self.set_status(id, LogisticsStatus::StuckInTransit).await?;
            return Err(err);
        }
        self.update(
            id,
            LogisticsUpdate::status(LogisticsStatus::QueuedForDelivery)
                .with_service_kind(ServiceKind::Delivery),
        )
        .await
    }

    /// Marks the load delivered.
    ///
    /// Repeated calls return [`Transition::Unchanged`]. When the allocated
    /// truck is unavailable the detail passes through `STUCK_IN_TRANSIT` and
    /// an alternative delivery is planned.
    pub async fn mark_delivered(&self, id: LogisticsId) -> Result<Transition, PlanningError> {
        let detail = self.load(id).await?;
        match detail.status {
            LogisticsStatus::Delivered => return Ok(Transition::Unchanged(detail)),
            LogisticsStatus::Collected
            | LogisticsStatus::QueuedForDelivery
            | LogisticsStatus::StuckInTransit
            | LogisticsStatus::AlternativeDeliveryPlanned => {}
            _ => return Err(invalid(&detail, "deliver")),
        }
        let allocation = self
            .repos
            .allocations
            .active_for_logistics(id)
            .await?
            .ok_or(PlanningError::NoActiveAllocation(id))?;
        if !self.truck_available(allocation.truck_id).await? {
            self.set_status(id, LogisticsStatus::StuckInTransit).await?;
            self.log(
                LogLevel::Warn,
                "planning.deliver.truck_unavailable",
                json!({ "logistics_id": id, "truck_id": allocation.truck_id }),
            );
            let replanned = self
                .plan_alternative_delivery(id, Some(allocation.truck_id))
                .await?;
            return Ok(Transition::Replanned(replanned));
        }
        let updated = self.set_status(id, LogisticsStatus::Delivered).await?;
        self.repos
            .pickup_status
            .set_pickup_status(detail.pickup_id, PickupStatus::Delivered)
            .await?;
        self.log(
            LogLevel::Info,
            "planning.deliver.done",
            json!({ "logistics_id": id, "truck_id": allocation.truck_id }),
        );
        Ok(Transition::Applied(updated))
    }

    /// Releases the current booking and assigns a collection truck from the
    /// current simulated day, then re-queues the collection event.
    pub async fn reassign_truck(
        &self,
        id: LogisticsId,
        exclude_truck: Option<TruckId>,
    ) -> Result<LogisticsDetail, PlanningError> {
        let detail = self.load(id).await?;
        if detail.status.is_terminal() {
            return Err(invalid(&detail, "reassign"));
        }
        self.repos.allocations.delete_for_logistics(id).await?;
        let today = start_of_day(self.clock.current_time());
        let assignment = self
            .engine
            .assign(
                AssignmentRequest::for_existing(&detail, ServiceKind::Collection, today)
                    .excluding(exclude_truck),
            )
            .await?;
        self.log(
            LogLevel::Info,
            "planning.reassign.assigned",
            json!({
                "logistics_id": id,
                "previous_status": detail.status,
                "truck_id": assignment.truck.id,
                "excluded": exclude_truck,
            }),
        );
        self.queue_collection(assignment.logistics).await
    }

    /// Books a delivery truck (checked against daily drop-offs) from the
    /// current simulated day and queues the delivery event.
    ///
    /// A failed enqueue leaves the detail in `ALTERNATIVE_DELIVERY_PLANNED`.
    pub async fn plan_alternative_delivery(
        &self,
        id: LogisticsId,
        exclude_truck: Option<TruckId>,
    ) -> Result<LogisticsDetail, PlanningError> {
        let detail = self.load(id).await?;
        if detail.status.is_terminal() {
            return Err(invalid(&detail, "plan alternative delivery"));
        }
        self.repos.allocations.delete_for_logistics(id).await?;
        let today = start_of_day(self.clock.current_time());
        let assignment = self
            .engine
            .assign(
                AssignmentRequest::for_existing(&detail, ServiceKind::Delivery, today)
                    .excluding(exclude_truck),
            )
            .await?;
        self.enqueue(&assignment.logistics, ServiceKind::Delivery)
            .await?;
        let updated = self
            .set_status(id, LogisticsStatus::QueuedForDelivery)
            .await?;
        self.repos
            .pickup_status
            .set_pickup_status(detail.pickup_id, PickupStatus::Collected)
            .await?;
        self.log(
            LogLevel::Info,
            "planning.alternative_delivery.queued",
            json!({ "logistics_id": id, "truck_id": assignment.truck.id, "excluded": exclude_truck }),
        );
        Ok(updated)
    }

    /// Moves the detail and its pickup to `FAILED` unless the detail is
    /// already recoverable, failed or delivered. Returns the resulting status.
    pub async fn fail_unless_recoverable(
        &self,
        id: LogisticsId,
    ) -> Result<LogisticsStatus, PlanningError> {
        let detail = self.load(id).await?;
        if detail.status.is_recoverable()
            || detail.status.is_terminal()
            || detail.status == LogisticsStatus::Failed
        {
            return Ok(detail.status);
        }
        self.set_status(id, LogisticsStatus::Failed).await?;
        if let Err(err) = self
            .repos
            .pickup_status
            .set_pickup_status(detail.pickup_id, PickupStatus::Failed)
            .await
        {
            self.log(
                LogLevel::Warn,
                "planning.fail.pickup_status_failed",
                json!({ "pickup_id": detail.pickup_id, "error": err.to_string() }),
            );
        }
        self.log(
            LogLevel::Warn,
            "planning.fail.forced",
            json!({ "logistics_id": id, "previous_status": detail.status }),
        );
        Ok(LogisticsStatus::Failed)
    }

    /// Sends `event` again when its leg's wall-clock baseline is still ahead.
    ///
    /// Queue delays are capped, so bookings further out than the cap arrive
    /// early. Returns the new delay, or `None` when the event is due or the
    /// detail is no longer waiting on that leg.
    pub async fn defer_until_due(
        &self,
        event: LogisticsEvent,
    ) -> Result<Option<Duration>, PlanningError> {
        let detail = self.load(event.logistics_details_id).await?;
        let kind = event.event_type.service_kind();
        let waiting = match kind {
            ServiceKind::Collection => detail.status == LogisticsStatus::QueuedForCollection,
            ServiceKind::Delivery => matches!(
                detail.status,
                LogisticsStatus::QueuedForDelivery | LogisticsStatus::AlternativeDeliveryPlanned
            ),
        };
        let Some(schedule) = detail.schedule.filter(|_| waiting) else {
            return Ok(None);
        };
        let remaining = self.clock.delay_until(schedule.real_timestamp_for(kind));
        if remaining.is_zero() {
            return Ok(None);
        }
        let delay = self.enqueue(&detail, kind).await?;
        self.log(
            LogLevel::Debug,
            "planning.enqueue.deferred",
            json!({
                "logistics_id": detail.id,
                "event": event.event_type,
                "remaining_secs": remaining.as_secs(),
                "delay_secs": delay.as_secs(),
            }),
        );
        Ok(Some(delay))
    }

    async fn queue_collection(
        &self,
        detail: LogisticsDetail,
    ) -> Result<LogisticsDetail, PlanningError> {
        if let Err(err) = self.enqueue(&detail, ServiceKind::Collection).await {
            self.set_status(detail.id, LogisticsStatus::PendingReplanning)
                .await?;
            return Err(err);
        }
        let updated = self
            .set_status(detail.id, LogisticsStatus::QueuedForCollection)
            .await?;
        self.repos
            .pickup_status
            .set_pickup_status(detail.pickup_id, PickupStatus::ReadyForCollection)
            .await?;
        Ok(updated)
    }

    /// Sends the leg's event delayed until its wall-clock baseline, clamped
    /// to `[0, max_queue_delay]`.
    async fn enqueue(
        &self,
        detail: &LogisticsDetail,
        kind: ServiceKind,
    ) -> Result<Duration, PlanningError> {
        let baseline = detail
            .schedule
            .map_or_else(|| self.clock.real_now(), |schedule| schedule.real_timestamp_for(kind));
        let delay = self
            .clock
            .delay_until(baseline)
            .min(self.settings.max_queue_delay());
        let event = LogisticsEvent::for_kind(kind, detail.id);
        let body = event.to_body().map_err(QueueError::from)?;
        let queue_name = self.queues.for_kind(kind);
        let queue = &self.queue;
        let payload = body.as_str();
        let sent = self
            .send_retry
            .run_if(
                move |_| queue.send(queue_name, payload, delay),
                QueueError::is_transient,
            )
            .await;
        match sent {
            Ok(message_id) => {
                self.log(
                    LogLevel::Info,
                    "planning.enqueue.sent",
                    json!({
                        "logistics_id": detail.id,
                        "queue": queue_name,
                        "event": event.event_type,
                        "delay_secs": delay.as_secs(),
                        "message_id": message_id,
                    }),
                );
                Ok(delay)
            }
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "planning.enqueue.failed",
                    json!({ "logistics_id": detail.id, "queue": queue_name, "error": err.to_string() }),
                );
                Err(err.into())
            }
        }
    }

    async fn truck_available(&self, truck_id: TruckId) -> Result<bool, PlanningError> {
        Ok(self
            .repos
            .trucks
            .find_by_id(truck_id)
            .await?
            .is_some_and(|truck| truck.is_available))
    }

    async fn load(&self, id: LogisticsId) -> Result<LogisticsDetail, PlanningError> {
        self.repos
            .logistics
            .find_by_id(id)
            .await?
            .ok_or(PlanningError::LogisticsNotFound(id))
    }

    async fn update(
        &self,
        id: LogisticsId,
        update: LogisticsUpdate,
    ) -> Result<LogisticsDetail, PlanningError> {
        self.repos
            .logistics
            .update(id, update)
            .await?
            .ok_or(PlanningError::LogisticsNotFound(id))
    }

    async fn set_status(
        &self,
        id: LogisticsId,
        status: LogisticsStatus,
    ) -> Result<LogisticsDetail, PlanningError> {
        self.update(id, LogisticsUpdate::status(status)).await
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        let _ = self.telemetry.log(level, message, metadata);
    }
}

fn invalid(detail: &LogisticsDetail, action: &'static str) -> PlanningError {
    PlanningError::InvalidTransition {
        id: detail.id,
        status: detail.status,
        action,
    }
}

#[async_trait]
impl LogisticsPlanner for LogisticsOrchestrator {
    async fn handle_payment_confirmed(
        &self,
        pickup_id: PickupId,
    ) -> Result<LogisticsDetail, PlanningError> {
        Self::handle_payment_confirmed(self, pickup_id).await
    }

    async fn plan_after_payment(
        &self,
        pickup_id: PickupId,
        quantity: u32,
        initial_sim_date: DateTime<Utc>,
    ) -> Result<LogisticsDetail, PlanningError> {
        Self::plan_after_payment(self, pickup_id, quantity, initial_sim_date).await
    }

    async fn logistics_for_pickup(
        &self,
        pickup_id: PickupId,
    ) -> Result<Option<LogisticsDetail>, PlanningError> {
        Self::logistics_for_pickup(self, pickup_id).await
    }
}
