use serde::{Deserialize, Serialize};

use crate::util::vec3::Vec3;

/// Stable unit identifier assigned by the simulation.
pub type UnitId = u32;

/// Closed set of unit kinds the schedulers know how to degrade.
///
/// Classification and frequency adjustment dispatch on this tag instead of
/// open-ended downcasting, so every kind has an explicit rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    /// A connected observer's avatar.
    Observer,
    /// Aggressive unit that can attack observers.
    Hostile,
    /// Neutral creature.
    Passive,
    /// Scripted non-player character.
    Npc,
    /// Dropped item waiting to be picked up.
    ItemDrop,
    /// Short-lived reward orb.
    ExperienceOrb,
    /// In-flight projectile.
    Projectile,
}

/// Read-only view of one unit of simulation work.
///
/// Produced and owned by the simulation; the shedding layer only inspects
/// the id, position and dynamic flags.
#[derive(Debug, Clone, Copy)]
pub struct WorkUnit {
    pub id: UnitId,
    pub kind: UnitKind,
    pub position: Vec3,
    /// Steered by an observer (directly, or as a controlled mount).
    pub controlled: bool,
    /// Has a recorded attacker or an active target.
    pub engaged: bool,
    /// Scheduled for removal from the world.
    pub removed: bool,
}

impl WorkUnit {
    pub fn new(id: UnitId, kind: UnitKind, position: Vec3) -> Self {
        Self {
            id,
            kind,
            position,
            controlled: false,
            engaged: false,
            removed: false,
        }
    }
}
