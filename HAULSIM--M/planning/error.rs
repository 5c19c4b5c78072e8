use shared_queue::QueueError;
use thiserror::Error;

use crate::model::{LogisticsId, LogisticsStatus, PickupId, TruckId};

/// Coarse classification driving retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced record is missing; surfaced, never retried.
    NotFound,
    /// No truck fits within the search horizon; the sweep retries later.
    CapacityExhausted,
    /// The fleet has no available trucks at all.
    NoTrucks,
    /// Queue or storage hiccup; safe to retry.
    Transient,
    /// The request conflicts with the record's current state.
    Invalid,
}

/// Errors raised by the assignment engine and the orchestrator.
#[derive(Debug, Error)]
pub enum PlanningError {
    /// Pickup lookup failed.
    #[error("pickup {0} not found")]
    PickupNotFound(PickupId),
    /// Logistics detail lookup failed.
    #[error("logistics detail {0} not found")]
    LogisticsNotFound(LogisticsId),
    /// Allocated truck vanished from the fleet.
    #[error("truck {0} not found")]
    TruckNotFound(TruckId),
    /// Transition requires a truck booking that does not exist.
    #[error("logistics detail {0} has no active truck allocation")]
    NoActiveAllocation(LogisticsId),
    /// Every truck is unavailable or excluded.
    #[error("no trucks available for pickup {pickup_id} (logistics {logistics_id})")]
    NoTrucksAvailable {
        /// Pickup being planned.
        pickup_id: PickupId,
        /// Detail left in `NO_TRUCKS_AVAILABLE`.
        logistics_id: LogisticsId,
    },
    /// No truck had room within the horizon.
    #[error(
        "no truck can take {quantity} units for pickup {pickup_id} within {days} days (logistics {logistics_id})"
    )]
    CapacityExhausted {
        /// Pickup being planned.
        pickup_id: PickupId,
        /// Requested units.
        quantity: u32,
        /// Days searched.
        days: u32,
        /// Detail left in `PENDING_REPLANNING`.
        logistics_id: LogisticsId,
    },
    /// Cancelled pickups are never planned.
    #[error("pickup {0} is cancelled")]
    PickupCancelled(PickupId),
    /// Operation not allowed from the current status.
    #[error("logistics detail {id} cannot {action} from {status}")]
    InvalidTransition {
        /// Detail.
        id: LogisticsId,
        /// Status at the time of the call.
        status: LogisticsStatus,
        /// Attempted operation.
        action: &'static str,
    },
    /// Queue send failed after retries.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    /// Repository failure.
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl PlanningError {
    /// Classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PickupNotFound(_)
            | Self::LogisticsNotFound(_)
            | Self::TruckNotFound(_)
            | Self::NoActiveAllocation(_) => ErrorKind::NotFound,
            Self::NoTrucksAvailable { .. } => ErrorKind::NoTrucks,
            Self::CapacityExhausted { .. } => ErrorKind::CapacityExhausted,
            Self::PickupCancelled(_) | Self::InvalidTransition { .. } => ErrorKind::Invalid,
            Self::Queue(_) | Self::Storage(_) => ErrorKind::Transient,
        }
    }

    /// Whether retrying later may succeed without outside intervention.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::CapacityExhausted | ErrorKind::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_recovery_policy() {
        let exhausted = PlanningError::CapacityExhausted {
            pickup_id: 1,
            quantity: 5,
            days: 365,
            logistics_id: 9,
        };
        assert!(exhausted.is_recoverable());
        let no_trucks = PlanningError::NoTrucksAvailable {
            pickup_id: 1,
            logistics_id: 9,
        };
        assert_eq!(no_trucks.kind(), ErrorKind::NoTrucks);
        assert!(!no_trucks.is_recoverable());
        assert!(!PlanningError::PickupNotFound(3).is_recoverable());
        let storage = PlanningError::from(anyhow::anyhow!("connection reset"));
        assert_eq!(storage.kind(), ErrorKind::Transient);
        assert!(storage.to_string().contains("connection reset"));
    }
}
