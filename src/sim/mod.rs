//! Tick-loop load shedding: clock, load controller and the two admission
//! gates (priority skip factor, distance frequency).

pub mod clock;
pub mod distance;
pub mod load;
pub mod priority;
pub mod unit;

use crate::sim::distance::DistanceScheduler;
use crate::sim::unit::WorkUnit;

/// Combined admission decision: a unit runs this tick only if the priority
/// gate and the distance gate both allow it.
pub fn should_process(
    unit: &WorkUnit,
    tick_counter: u64,
    skip_factor: u32,
    scheduler: &DistanceScheduler,
    nearest_observer_dist_sq: Option<f64>,
) -> bool {
    if !priority::should_run(unit, tick_counter, skip_factor) {
        return false;
    }
    let frequency = scheduler.frequency(unit, nearest_observer_dist_sq);
    scheduler.should_run(unit, tick_counter, frequency)
}
