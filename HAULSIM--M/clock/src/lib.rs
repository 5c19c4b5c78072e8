#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Haulsim simulation clock – maps accelerated simulated days onto wall-clock time.

/// Calendar helpers for simulated days (UTC).
#[path = "../calendar.rs"]
pub mod calendar;

/// Clock configuration.
#[path = "../config.rs"]
pub mod config;

/// Wall-clock sources.
#[path = "../time_source.rs"]
pub mod time_source;

/// External time synchronization.
#[path = "../sync.rs"]
pub mod sync;

/// The simulation clock service.
#[path = "../clock.rs"]
pub mod clock;

pub use clock::{ClockCallback, ClockError, ClockStatus, SimulationClock};
pub use config::ClockConfig;
pub use sync::{HttpTimeSync, TimeSyncSource};
pub use time_source::{ManualTimeSource, SystemTimeSource, TimeSource};
