use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::PlanningError,
    model::{LogisticsDetail, PickupId, PickupStatus},
    store::PickupRepository,
};

/// Planning entry points used by the payment side of the system.
#[async_trait]
pub trait LogisticsPlanner: Send + Sync {
    /// Plans fulfillment for a freshly paid pickup, deriving the first day from the clock.
    async fn handle_payment_confirmed(
        &self,
        pickup_id: PickupId,
    ) -> Result<LogisticsDetail, PlanningError>;

    /// Plans fulfillment starting at `initial_sim_date`; returns an existing plan unchanged.
    async fn plan_after_payment(
        &self,
        pickup_id: PickupId,
        quantity: u32,
        initial_sim_date: DateTime<Utc>,
    ) -> Result<LogisticsDetail, PlanningError>;

    /// Current logistics detail of a pickup.
    async fn logistics_for_pickup(
        &self,
        pickup_id: PickupId,
    ) -> Result<Option<LogisticsDetail>, PlanningError>;
}

/// Write-only view of pickup status used by the planning side.
#[async_trait]
pub trait PickupStatusUpdater: Send + Sync {
    /// Moves the pickup to `status`.
    async fn set_pickup_status(
        &self,
        pickup_id: PickupId,
        status: PickupStatus,
    ) -> Result<(), PlanningError>;
}

#[async_trait]
impl<T> PickupStatusUpdater for T
where
    T: PickupRepository + ?Sized,
{
    async fn set_pickup_status(
        &self,
        pickup_id: PickupId,
        status: PickupStatus,
    ) -> Result<(), PlanningError> {
        if self.update_status(pickup_id, status).await? {
            Ok(())
        } else {
            Err(PlanningError::PickupNotFound(pickup_id))
        }
    }
}
