//! Distance-based tick frequency scheduling.
//!
//! Far-away units run less often than near ones. The frequency gate is
//! independent of the load controller's skip factor: a unit runs only if
//! both gates allow it, so lag and distance degrade multiplicatively.

use crate::config::CullingConfig;
use crate::sim::unit::{UnitKind, WorkUnit};
use crate::util::vec3::Vec3;

/// Frequency used when no observers are present at all.
const NO_OBSERVER_FREQUENCY: u32 = 4;

/// Slowest band, beyond the configured quarter-tick distance.
const FAR_FREQUENCY: u32 = 8;

/// Assigns per-unit tick frequencies from observer proximity.
#[derive(Debug, Clone)]
pub struct DistanceScheduler {
    full_dist_sq: f64,
    half_dist_sq: f64,
    quarter_dist_sq: f64,
}

impl DistanceScheduler {
    pub fn new(config: &CullingConfig) -> Self {
        Self {
            full_dist_sq: config.full_tick_distance * config.full_tick_distance,
            half_dist_sq: config.half_tick_distance * config.half_tick_distance,
            quarter_dist_sq: config.quarter_tick_distance * config.quarter_tick_distance,
        }
    }

    /// Tick frequency for a unit: run once every N ticks.
    ///
    /// `nearest_observer_dist_sq` is the squared distance to the closest
    /// observer, or `None` when no observers exist.
    pub fn frequency(&self, unit: &WorkUnit, nearest_observer_dist_sq: Option<f64>) -> u32 {
        if unit.kind == UnitKind::Observer {
            return 1;
        }

        let base = match nearest_observer_dist_sq {
            None => NO_OBSERVER_FREQUENCY,
            Some(dist_sq) => {
                if dist_sq <= self.full_dist_sq {
                    1
                } else if dist_sq <= self.half_dist_sq {
                    2
                } else if dist_sq <= self.quarter_dist_sq {
                    4
                } else {
                    FAR_FREQUENCY
                }
            }
        };

        adjust_for_kind(unit, base)
    }

    /// Whether a unit should run this tick at the given frequency.
    pub fn should_run(&self, unit: &WorkUnit, tick_counter: u64, frequency: u32) -> bool {
        if frequency <= 1 {
            return true;
        }
        (u64::from(unit.id) + tick_counter) % u64::from(frequency) == 0
    }
}

fn adjust_for_kind(unit: &WorkUnit, base: u32) -> u32 {
    // Units in a fight, and anything an observer is steering, never slow down
    if unit.engaged || unit.controlled {
        return 1;
    }

    match unit.kind {
        // Drops and orbs never need full rate
        UnitKind::ItemDrop | UnitKind::ExperienceOrb => base.max(2),
        // Projectiles lose accuracy below half rate
        UnitKind::Projectile => base.min(2),
        _ => base,
    }
}

/// Squared distance from `unit` to the closest observer position, or `None`
/// when the slice is empty. Scalar per-axis math; no batch shortcut.
pub fn nearest_observer_dist_sq(unit: &WorkUnit, observers: &[Vec3]) -> Option<f64> {
    observers
        .iter()
        .map(|pos| unit.position.distance_sq_to(*pos))
        .min_by(|a, b| a.total_cmp(b))
}

/// True when the unit is farther than `max_dist_sq` from every observer.
pub fn is_beyond_all(unit: &WorkUnit, observers: &[Vec3], max_dist_sq: f64) -> bool {
    observers
        .iter()
        .all(|pos| unit.position.distance_sq_to(*pos) > max_dist_sq)
}
