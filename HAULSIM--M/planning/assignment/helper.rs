use chrono::{DateTime, Utc};
use haulsim_clock::{
    calendar::{end_of_day, is_midnight, next_midnight, start_of_day},
    SimulationClock,
};

use crate::model::{Schedule, Truck, TruckId};

/// Available trucks other than `exclude`, id-ascending.
#[must_use]
pub fn candidate_trucks(mut trucks: Vec<Truck>, exclude: Option<TruckId>) -> Vec<Truck> {
    trucks.retain(|truck| truck.is_available && Some(truck.id) != exclude);
    trucks.sort_by_key(|truck| truck.id);
    trucks
}

/// First day a freshly paid pickup may be collected: today when `now` is
/// exactly midnight, otherwise the next midnight.
#[must_use]
pub fn initial_pickup_date(now: DateTime<Utc>) -> DateTime<Utc> {
    if is_midnight(now) {
        now
    } else {
        next_midnight(now)
    }
}

/// Simulated day bounds and their wall-clock images for the day of `day`.
#[must_use]
pub fn schedule_for_day(clock: &SimulationClock, day: DateTime<Utc>) -> Schedule {
    Schedule {
        simulation_date: start_of_day(day),
        real_pickup_timestamp: clock.real_world_pickup_timestamp(day),
        real_delivery_timestamp: clock.real_world_delivery_timestamp(day),
        simulated_pickup_timestamp: start_of_day(day),
        simulated_delivery_timestamp: end_of_day(day),
    }
}
