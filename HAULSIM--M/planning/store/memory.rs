use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;

use super::{AllocationRepository, LogisticsRepository, PickupRepository, TruckRepository};
use crate::model::{
    LogisticsDetail, LogisticsId, LogisticsStatus, LogisticsUpdate, NewLogisticsDetail, Pickup,
    PickupId, PickupStatus, ServiceKind, Truck, TruckAllocation, TruckId,
};

#[derive(Debug, Default)]
struct Tables {
    trucks: BTreeMap<TruckId, Truck>,
    pickups: BTreeMap<PickupId, Pickup>,
    logistics: BTreeMap<LogisticsId, LogisticsDetail>,
    allocations: Vec<TruckAllocation>,
    next_logistics_id: LogisticsId,
    next_allocation_id: i64,
}

/// Process-local store backing all repository contracts.
///
/// Ids are assigned sequentially from 1. Released allocations are kept so the
/// booking history of a detail can be inspected.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a fleet.
    #[must_use]
    pub fn with_fleet(trucks: impl IntoIterator<Item = Truck>) -> Self {
        let store = Self::new();
        for truck in trucks {
            store.upsert_truck(truck);
        }
        store
    }

    /// Inserts or replaces a truck.
    pub fn upsert_truck(&self, truck: Truck) {
        self.tables.lock().trucks.insert(truck.id, truck);
    }

    /// Flips a truck's availability; `false` when the truck is unknown.
    pub fn set_truck_available(&self, id: TruckId, available: bool) -> bool {
        self.tables
            .lock()
            .trucks
            .get_mut(&id)
            .map(|truck| truck.is_available = available)
            .is_some()
    }

    /// Inserts or replaces a pickup.
    pub fn upsert_pickup(&self, pickup: Pickup) {
        self.tables.lock().pickups.insert(pickup.id, pickup);
    }

    /// Current pickup record.
    #[must_use]
    pub fn pickup(&self, id: PickupId) -> Option<Pickup> {
        self.tables.lock().pickups.get(&id).cloned()
    }

    /// Current logistics record.
    #[must_use]
    pub fn logistics(&self, id: LogisticsId) -> Option<LogisticsDetail> {
        self.tables.lock().logistics.get(&id).cloned()
    }

    /// Every booking ever made for the detail, oldest first.
    #[must_use]
    pub fn allocation_history(&self, logistics_id: LogisticsId) -> Vec<TruckAllocation> {
        self.tables
            .lock()
            .allocations
            .iter()
            .filter(|allocation| allocation.logistics_id == logistics_id)
            .cloned()
            .collect()
    }
}

fn is_booked(allocation: &TruckAllocation, truck_id: TruckId, day: NaiveDate) -> bool {
    allocation.is_active() && allocation.truck_id == truck_id && allocation.day == day
}

#[async_trait]
impl TruckRepository for MemoryStore {
    async fn find_all(&self) -> Result<Vec<Truck>> {
        Ok(self.tables.lock().trucks.values().cloned().collect())
    }

    async fn find_by_id(&self, id: TruckId) -> Result<Option<Truck>> {
        Ok(self.tables.lock().trucks.get(&id).cloned())
    }

    async fn active_allocations_for_truck_on_day(
        &self,
        truck_id: TruckId,
        day: NaiveDate,
        kind: ServiceKind,
    ) -> Result<u32> {
        let count = self
            .tables
            .lock()
            .allocations
            .iter()
            .filter(|allocation| is_booked(allocation, truck_id, day))
            .filter(|allocation| allocation.service_kind == kind)
            .count();
        Ok(u32::try_from(count)?)
    }
}

#[async_trait]
impl LogisticsRepository for MemoryStore {
    async fn find_by_id(&self, id: LogisticsId) -> Result<Option<LogisticsDetail>> {
        Ok(self.logistics(id))
    }

    async fn find_by_pickup(&self, pickup_id: PickupId) -> Result<Option<LogisticsDetail>> {
        Ok(self
            .tables
            .lock()
            .logistics
            .values()
            .find(|detail| detail.pickup_id == pickup_id)
            .cloned())
    }

    async fn create(&self, detail: NewLogisticsDetail) -> Result<LogisticsDetail> {
        let mut tables = self.tables.lock();
        tables.next_logistics_id += 1;
        let created = LogisticsDetail {
            id: tables.next_logistics_id,
            pickup_id: detail.pickup_id,
            service_kind: detail.service_kind,
            quantity: detail.quantity,
            status: detail.status,
            schedule: detail.schedule,
            updated_at: Utc::now(),
        };
        tables.logistics.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        id: LogisticsId,
        update: LogisticsUpdate,
    ) -> Result<Option<LogisticsDetail>> {
        let mut tables = self.tables.lock();
        Ok(tables.logistics.get_mut(&id).map(|detail| {
            update.apply(detail);
            detail.updated_at = Utc::now();
            detail.clone()
        }))
    }

    async fn find_by_statuses(
        &self,
        statuses: &[LogisticsStatus],
        limit: Option<usize>,
    ) -> Result<Vec<LogisticsDetail>> {
        Ok(self
            .tables
            .lock()
            .logistics
            .values()
            .filter(|detail| statuses.contains(&detail.status))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn active_for_truck_on_day(
        &self,
        truck_id: TruckId,
        day: NaiveDate,
    ) -> Result<Vec<LogisticsDetail>> {
        let tables = self.tables.lock();
        Ok(tables
            .allocations
            .iter()
            .filter(|allocation| is_booked(allocation, truck_id, day))
            .filter_map(|allocation| tables.logistics.get(&allocation.logistics_id).cloned())
            .collect())
    }
}

#[async_trait]
impl AllocationRepository for MemoryStore {
    async fn active_for_logistics(
        &self,
        logistics_id: LogisticsId,
    ) -> Result<Option<TruckAllocation>> {
        Ok(self
            .tables
            .lock()
            .allocations
            .iter()
            .rev()
            .find(|allocation| allocation.logistics_id == logistics_id && allocation.is_active())
            .cloned())
    }

    async fn create(
        &self,
        logistics_id: LogisticsId,
        truck_id: TruckId,
        kind: ServiceKind,
        day: NaiveDate,
    ) -> Result<TruckAllocation> {
        let mut tables = self.tables.lock();
        tables.next_allocation_id += 1;
        let allocation = TruckAllocation {
            id: tables.next_allocation_id,
            logistics_id,
            truck_id,
            service_kind: kind,
            day,
            created_at: Utc::now(),
            released_at: None,
        };
        tables.allocations.push(allocation.clone());
        Ok(allocation)
    }

    async fn delete_for_logistics(&self, logistics_id: LogisticsId) -> Result<usize> {
        let now = Utc::now();
        let mut released = 0;
        for allocation in &mut self.tables.lock().allocations {
            if allocation.logistics_id == logistics_id && allocation.is_active() {
                allocation.released_at = Some(now);
                released += 1;
            }
        }
        Ok(released)
    }
}

#[async_trait]
impl PickupRepository for MemoryStore {
    async fn find_by_id(&self, id: PickupId) -> Result<Option<Pickup>> {
        Ok(self.pickup(id))
    }

    async fn update_status(&self, id: PickupId, status: PickupStatus) -> Result<bool> {
        Ok(self
            .tables
            .lock()
            .pickups
            .get_mut(&id)
            .map(|pickup| pickup.status = status)
            .is_some())
    }
}
