#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Haulsim planning core: truck assignment and the logistics lifecycle orchestrator.

/// Assignment engine (first-fit truck selection with day-by-day fallback).
#[path = "../assignment/main.rs"]
pub mod assignment;
/// Planning errors and their recovery classification.
#[path = "../error.rs"]
pub mod error;
/// Domain records and status enums.
#[path = "../model.rs"]
pub mod model;
/// Narrow collaborator interfaces (planning entry points, pickup status updates).
#[path = "../module.rs"]
pub mod module;
/// Lifecycle orchestration entry points.
#[path = "../orchestrator/main.rs"]
pub mod orchestrator;
/// Repository contracts and the in-memory store.
#[path = "../store/main.rs"]
pub mod store;

pub use assignment::{Assignment, AssignmentEngine, AssignmentRequest};
pub use error::{ErrorKind, PlanningError};
pub use model::{
    LogisticsDetail, LogisticsId, LogisticsStatus, LogisticsUpdate, NewLogisticsDetail, Pickup,
    PickupId, PickupStatus, Schedule, ServiceKind, Truck, TruckAllocation, TruckId,
};
pub use module::{LogisticsPlanner, PickupStatusUpdater};
pub use orchestrator::{
    EventType, LogisticsEvent, LogisticsOrchestrator, PlanningSettings, QueueNames, SweepFailure,
    SweepReport, Transition,
};
pub use store::{
    AllocationRepository, LogisticsRepository, MemoryStore, PickupRepository, Repositories,
    TruckRepository,
};
