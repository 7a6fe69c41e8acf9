//! Priority classification for per-tick admission control.
//!
//! Classes are recomputed on demand from the unit's kind and dynamic flags;
//! the computation is cheap enough that caching across ticks would cost more
//! than it saves.

use crate::sim::unit::{UnitKind, WorkUnit};

/// Ordered priority classes; lower values are more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityClass {
    /// Never skipped: observers, controlled mounts, engaged units.
    Critical = 0,
    /// Hostiles and projectiles.
    Combat = 1,
    /// Neutral creatures and NPCs.
    Passive = 2,
    /// Item drops and reward orbs.
    Ephemeral = 3,
    /// Scheduled for removal; lowest priority.
    Removed = 10,
}

impl UnitKind {
    /// Static class for a kind, before dynamic-flag promotion.
    pub fn base_priority(self) -> PriorityClass {
        match self {
            UnitKind::Observer => PriorityClass::Critical,
            UnitKind::Hostile | UnitKind::Projectile => PriorityClass::Combat,
            UnitKind::Passive | UnitKind::Npc => PriorityClass::Passive,
            UnitKind::ItemDrop | UnitKind::ExperienceOrb => PriorityClass::Ephemeral,
        }
    }
}

/// Classify a unit from its kind and current flags.
pub fn classify(unit: &WorkUnit) -> PriorityClass {
    if unit.removed {
        return PriorityClass::Removed;
    }
    // Engagement promotes anything to critical while the fight lasts
    if unit.engaged || unit.controlled {
        return PriorityClass::Critical;
    }
    unit.kind.base_priority()
}

/// Whether a unit should run this tick under the given skip factor.
///
/// Critical units always run. Everything else runs on ticks where
/// `(id + tick) % skip_factor == 0`; keying on the id spreads skipped units
/// across ticks instead of stalling the same ones every cycle.
pub fn should_run(unit: &WorkUnit, tick_counter: u64, skip_factor: u32) -> bool {
    if skip_factor <= 1 {
        return true;
    }
    if classify(unit) == PriorityClass::Critical {
        return true;
    }
    (u64::from(unit.id) + tick_counter) % u64::from(skip_factor) == 0
}
