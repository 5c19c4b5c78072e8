use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    model::{
        LogisticsDetail, LogisticsId, LogisticsStatus, LogisticsUpdate, NewLogisticsDetail,
        Pickup, PickupId, PickupStatus, ServiceKind, Truck, TruckAllocation, TruckId,
    },
    module::PickupStatusUpdater,
};

/// In-memory implementation of every repository contract.
pub mod memory;

pub use memory::MemoryStore;

/// Fleet inventory and per-day load queries.
#[async_trait]
pub trait TruckRepository: Send + Sync {
    /// All trucks, any order.
    async fn find_all(&self) -> Result<Vec<Truck>>;
    /// Single truck.
    async fn find_by_id(&self, id: TruckId) -> Result<Option<Truck>>;
    /// Active bookings of `kind` for the truck on the simulated day.
    async fn active_allocations_for_truck_on_day(
        &self,
        truck_id: TruckId,
        day: NaiveDate,
        kind: ServiceKind,
    ) -> Result<u32>;
}

/// Logistics detail persistence.
#[async_trait]
pub trait LogisticsRepository: Send + Sync {
    /// Single detail.
    async fn find_by_id(&self, id: LogisticsId) -> Result<Option<LogisticsDetail>>;
    /// Detail owned by the pickup, if one exists.
    async fn find_by_pickup(&self, pickup_id: PickupId) -> Result<Option<LogisticsDetail>>;
    /// Inserts a new detail and returns it with its id.
    async fn create(&self, detail: NewLogisticsDetail) -> Result<LogisticsDetail>;
    /// Applies a partial update; `None` when the id is unknown.
    async fn update(
        &self,
        id: LogisticsId,
        update: LogisticsUpdate,
    ) -> Result<Option<LogisticsDetail>>;
    /// Details whose status is in `statuses`, id-ascending, at most `limit`.
    async fn find_by_statuses(
        &self,
        statuses: &[LogisticsStatus],
        limit: Option<usize>,
    ) -> Result<Vec<LogisticsDetail>>;
    /// Details with an active booking on the truck for the simulated day.
    async fn active_for_truck_on_day(
        &self,
        truck_id: TruckId,
        day: NaiveDate,
    ) -> Result<Vec<LogisticsDetail>>;
}

/// Truck allocation persistence.
#[async_trait]
pub trait AllocationRepository: Send + Sync {
    /// The active booking of a logistics detail.
    async fn active_for_logistics(&self, logistics_id: LogisticsId)
        -> Result<Option<TruckAllocation>>;
    /// Records a new booking.
    async fn create(
        &self,
        logistics_id: LogisticsId,
        truck_id: TruckId,
        kind: ServiceKind,
        day: NaiveDate,
    ) -> Result<TruckAllocation>;
    /// Releases every active booking of the detail; returns how many were released.
    async fn delete_for_logistics(&self, logistics_id: LogisticsId) -> Result<usize>;
}

/// Pickup persistence.
#[async_trait]
pub trait PickupRepository: Send + Sync {
    /// Single pickup.
    async fn find_by_id(&self, id: PickupId) -> Result<Option<Pickup>>;
    /// Overwrites the pickup status; `false` when the id is unknown.
    async fn update_status(&self, id: PickupId, status: PickupStatus) -> Result<bool>;
}

/// Bundle of repository handles shared by the engine and orchestrator.
#[derive(Clone)]
pub struct Repositories {
    /// Fleet.
    pub trucks: Arc<dyn TruckRepository>,
    /// Logistics details.
    pub logistics: Arc<dyn LogisticsRepository>,
    /// Truck allocations.
    pub allocations: Arc<dyn AllocationRepository>,
    /// Pickup lookups.
    pub pickups: Arc<dyn PickupRepository>,
    /// Pickup status writes.
    pub pickup_status: Arc<dyn PickupStatusUpdater>,
}

impl Repositories {
    /// Uses one backing store for every contract.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: TruckRepository
            + LogisticsRepository
            + AllocationRepository
            + PickupRepository
            + PickupStatusUpdater
            + 'static,
    {
        Self {
            trucks: store.clone(),
            logistics: store.clone(),
            allocations: store.clone(),
            pickups: store.clone(),
            pickup_status: store,
        }
    }
}
