use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Logistics detail identifier.
pub type LogisticsId = i64;
/// Pickup identifier.
pub type PickupId = i64;
/// Truck identifier.
pub type TruckId = i64;

/// Lifecycle status of a logistics detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogisticsStatus {
    /// Truck assigned, nothing queued yet.
    PendingPlanning,
    /// Collection message queued.
    QueuedForCollection,
    /// Load collected by the truck.
    Collected,
    /// Delivery message queued.
    QueuedForDelivery,
    /// Load delivered; terminal.
    Delivered,
    /// No truck in the fleet was available.
    NoTrucksAvailable,
    /// Search horizon exhausted or enqueue failed; awaiting the sweep.
    PendingReplanning,
    /// Allocated truck became unavailable before collection.
    TruckUnavailable,
    /// Allocated truck became unavailable after collection.
    StuckInTransit,
    /// A replacement delivery truck has been allocated.
    AlternativeDeliveryPlanned,
    /// Processing failed outside the recoverable branches.
    Failed,
}

impl LogisticsStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 11] = [
        Self::PendingPlanning,
        Self::QueuedForCollection,
        Self::Collected,
        Self::QueuedForDelivery,
        Self::Delivered,
        Self::NoTrucksAvailable,
        Self::PendingReplanning,
        Self::TruckUnavailable,
        Self::StuckInTransit,
        Self::AlternativeDeliveryPlanned,
        Self::Failed,
    ];

    /// Statuses the day-boundary sweep re-plans.
    pub const RECOVERABLE: [Self; 5] = [
        Self::NoTrucksAvailable,
        Self::PendingReplanning,
        Self::TruckUnavailable,
        Self::StuckInTransit,
        Self::AlternativeDeliveryPlanned,
    ];

    /// Wire literal.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingPlanning => "PENDING_PLANNING",
            Self::QueuedForCollection => "QUEUED_FOR_COLLECTION",
            Self::Collected => "COLLECTED",
            Self::QueuedForDelivery => "QUEUED_FOR_DELIVERY",
            Self::Delivered => "DELIVERED",
            Self::NoTrucksAvailable => "NO_TRUCKS_AVAILABLE",
            Self::PendingReplanning => "PENDING_REPLANNING",
            Self::TruckUnavailable => "TRUCK_UNAVAILABLE",
            Self::StuckInTransit => "STUCK_IN_TRANSIT",
            Self::AlternativeDeliveryPlanned => "ALTERNATIVE_DELIVERY_PLANNED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the sweep will retry planning from this status.
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        Self::RECOVERABLE.contains(&self)
    }

    /// Delivered is the only terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Already queued or further along the happy path; planning again would double-book.
    #[must_use]
    pub const fn is_planned_forward(self) -> bool {
        matches!(
            self,
            Self::QueuedForCollection | Self::Collected | Self::QueuedForDelivery | Self::Delivered
        )
    }

    /// The load is on (or past) a truck.
    #[must_use]
    pub const fn is_collected_or_later(self) -> bool {
        matches!(
            self,
            Self::Collected
                | Self::QueuedForDelivery
                | Self::Delivered
                | Self::StuckInTransit
                | Self::AlternativeDeliveryPlanned
        )
    }
}

impl fmt::Display for LogisticsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogisticsStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown logistics status `{s}`"))
    }
}

/// Status of the customer-facing pickup request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PickupStatus {
    /// Request received, invoice unpaid.
    OrderReceived,
    /// Truck booked and collection queued.
    ReadyForCollection,
    /// Load collected.
    Collected,
    /// Load delivered.
    Delivered,
    /// Invoice paid; planning may start.
    PaidToLogisticsCo,
    /// Cancelled by the customer.
    Cancelled,
    /// Fulfillment failed.
    Failed,
}

impl PickupStatus {
    /// Wire literal.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderReceived => "ORDER_RECEIVED",
            Self::ReadyForCollection => "READY_FOR_COLLECTION",
            Self::Collected => "COLLECTED",
            Self::Delivered => "DELIVERED",
            Self::PaidToLogisticsCo => "PAID_TO_LOGISTICS_CO",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PickupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which leg a truck is booked for; selects the daily limit checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Pickup leg, bounded by `max_pickups_per_day`.
    Collection,
    /// Drop-off leg, bounded by `max_dropoffs_per_day`.
    Delivery,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Collection => "collection",
            Self::Delivery => "delivery",
        })
    }
}

/// Fleet vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truck {
    /// Identifier.
    pub id: TruckId,
    /// Largest single load in units.
    pub max_capacity: u32,
    /// Collections per simulated day.
    pub max_pickups_per_day: u32,
    /// Deliveries per simulated day.
    pub max_dropoffs_per_day: u32,
    /// Whether the truck may be booked.
    #[serde(default = "default_available")]
    pub is_available: bool,
}

impl Truck {
    /// Creates an available truck.
    #[must_use]
    pub const fn new(id: TruckId, max_capacity: u32, max_pickups: u32, max_dropoffs: u32) -> Self {
        Self {
            id,
            max_capacity,
            max_pickups_per_day: max_pickups,
            max_dropoffs_per_day: max_dropoffs,
            is_available: true,
        }
    }

    /// Daily booking limit for `kind`.
    #[must_use]
    pub const fn daily_limit(&self, kind: ServiceKind) -> u32 {
        match kind {
            ServiceKind::Collection => self.max_pickups_per_day,
            ServiceKind::Delivery => self.max_dropoffs_per_day,
        }
    }
}

const fn default_available() -> bool {
    true
}

/// Customer pickup request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pickup {
    /// Identifier.
    pub id: PickupId,
    /// Units to move.
    pub quantity: u32,
    /// Current status.
    pub status: PickupStatus,
}

/// Scheduled day of an operation with its simulated and wall-clock bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Simulated calendar day (midnight UTC).
    pub simulation_date: DateTime<Utc>,
    /// Wall-clock instant of the day's start.
    pub real_pickup_timestamp: DateTime<Utc>,
    /// Wall-clock instant of the day's end.
    pub real_delivery_timestamp: DateTime<Utc>,
    /// Simulated start of day (`00:00:00.000`).
    pub simulated_pickup_timestamp: DateTime<Utc>,
    /// Simulated end of day (`23:59:59.999`).
    pub simulated_delivery_timestamp: DateTime<Utc>,
}

impl Schedule {
    /// Calendar day of the schedule.
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.simulation_date.date_naive()
    }

    /// Wall-clock baseline for the message of `kind`.
    #[must_use]
    pub const fn real_timestamp_for(&self, kind: ServiceKind) -> DateTime<Utc> {
        match kind {
            ServiceKind::Collection => self.real_pickup_timestamp,
            ServiceKind::Delivery => self.real_delivery_timestamp,
        }
    }
}

/// Scheduling record for one collection-then-delivery cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogisticsDetail {
    /// Identifier.
    pub id: LogisticsId,
    /// Owning pickup.
    pub pickup_id: PickupId,
    /// Leg currently planned.
    pub service_kind: ServiceKind,
    /// Units to move.
    pub quantity: u32,
    /// Lifecycle status.
    pub status: LogisticsStatus,
    /// Chosen day; absent until a truck has been found.
    pub schedule: Option<Schedule>,
    /// Last mutation (wall clock).
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a logistics detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogisticsDetail {
    /// Owning pickup.
    pub pickup_id: PickupId,
    /// Leg planned.
    pub service_kind: ServiceKind,
    /// Units to move.
    pub quantity: u32,
    /// Initial status.
    pub status: LogisticsStatus,
    /// Chosen day, if any.
    pub schedule: Option<Schedule>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogisticsUpdate {
    /// New status.
    pub status: Option<LogisticsStatus>,
    /// New leg.
    pub service_kind: Option<ServiceKind>,
    /// New schedule.
    pub schedule: Option<Schedule>,
}

impl LogisticsUpdate {
    /// Status-only update.
    #[must_use]
    pub const fn status(status: LogisticsStatus) -> Self {
        Self {
            status: Some(status),
            service_kind: None,
            schedule: None,
        }
    }

    /// Sets the leg.
    #[must_use]
    pub const fn with_service_kind(mut self, kind: ServiceKind) -> Self {
        self.service_kind = Some(kind);
        self
    }

    /// Sets the schedule.
    #[must_use]
    pub const fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Applies the set fields to `detail`.
    pub fn apply(&self, detail: &mut LogisticsDetail) {
        if let Some(status) = self.status {
            detail.status = status;
        }
        if let Some(kind) = self.service_kind {
            detail.service_kind = kind;
        }
        if let Some(schedule) = self.schedule {
            detail.schedule = Some(schedule);
        }
    }
}

/// Booking of one truck for one logistics detail on one simulated day.
///
/// Allocations are never edited. Re-planning releases the active one and
/// records a fresh row, so every attempt stays in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruckAllocation {
    /// Identifier.
    pub id: i64,
    /// Booked logistics detail.
    pub logistics_id: LogisticsId,
    /// Booked truck.
    pub truck_id: TruckId,
    /// Leg booked.
    pub service_kind: ServiceKind,
    /// Simulated day booked.
    pub day: NaiveDate,
    /// When the booking was made (wall clock).
    pub created_at: DateTime<Utc>,
    /// When the booking was released, if it has been.
    pub released_at: Option<DateTime<Utc>>,
}

impl TruckAllocation {
    /// Not yet released.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.released_at.is_none()
    }
}
