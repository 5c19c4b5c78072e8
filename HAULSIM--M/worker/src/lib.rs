#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Haulsim event queue worker: consumes scheduled collection and delivery
//! events, notifies the outside world and wires the whole stack together.

/// TOML configuration with environment overrides.
#[path = "../config.rs"]
pub mod config;
/// Outbound collection/delivery notifications.
#[path = "../notifier.rs"]
pub mod notifier;
/// Composition root shared by the binary and integration tests.
#[path = "../runtime.rs"]
pub mod runtime;
/// Poll loops, message handling and the midnight sweep loop.
#[path = "../worker.rs"]
pub mod worker;

pub use config::{
    HaulsimConfig, LoggingSettings, NotifierSettings, QueueSettings, WorkerSettings,
};
pub use notifier::{
    LoopbackNotifier, NoopNotifier, NotificationKind, Notifier, NotifyError, WebhookNotifier,
};
pub use runtime::{root_telemetry, Haulsim};
pub use worker::{
    MessageOutcome, QueueWorker, StatsSnapshot, SweepTrigger, WorkerHandle, WorkerOptions,
    WorkerStats,
};
