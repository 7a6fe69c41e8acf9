//! Adaptive skip-factor control.
//!
//! Converts observed tick durations into a discrete skip factor that
//! schedulers use to shed low-priority work. The factor moves at most one
//! step per tick and needs 10 ms of headroom below target before it relaxes,
//! so a single borderline tick cannot make it oscillate.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::config::TickConfig;

/// Headroom below target required before the skip factor steps down.
const RELAX_HEADROOM_MS: u64 = 10;

/// Skip factor a warning-level tick may climb to.
const WARNING_SKIP_CEILING: u32 = 2;

/// Tracks tick load and exposes the current skip factor.
///
/// Mutated only from the simulation thread; the fields are atomics so
/// reporting threads can read them without coordination.
#[derive(Debug)]
pub struct LoadController {
    target_mspt: u64,
    warning_mspt: u64,
    critical_mspt: u64,
    max_skip_factor: u32,
    skip_factor: AtomicU32,
    last_duration_ms: AtomicU64,
}

impl LoadController {
    pub fn new(config: &TickConfig) -> Self {
        Self {
            target_mspt: config.target_mspt,
            warning_mspt: config.warning_mspt,
            critical_mspt: config.critical_mspt,
            max_skip_factor: config.max_skip_factor.max(1),
            skip_factor: AtomicU32::new(1),
            last_duration_ms: AtomicU64::new(0),
        }
    }

    /// Feed the latest tick duration and adjust the skip factor by at most
    /// one step.
    pub fn record_tick_duration(&self, duration_ms: u64) {
        self.last_duration_ms.store(duration_ms, Ordering::Relaxed);

        let current = self.skip_factor.load(Ordering::Relaxed);
        let next = if duration_ms > self.critical_mspt {
            (current + 1).min(self.max_skip_factor)
        } else if duration_ms > self.warning_mspt {
            (current + 1).min(WARNING_SKIP_CEILING.min(self.max_skip_factor))
        } else if duration_ms < self.target_mspt.saturating_sub(RELAX_HEADROOM_MS) {
            current.saturating_sub(1).max(1)
        } else {
            current
        };

        if next != current {
            self.skip_factor.store(next, Ordering::Relaxed);
            tracing::debug!(
                "skip factor {} -> {} ({}ms tick)",
                current,
                next,
                duration_ms
            );
        }
    }

    /// Current skip factor, always within 1..=max.
    pub fn skip_factor(&self) -> u32 {
        self.skip_factor.load(Ordering::Relaxed)
    }

    pub fn last_tick_duration_ms(&self) -> u64 {
        self.last_duration_ms.load(Ordering::Relaxed)
    }

    pub fn is_lagging(&self) -> bool {
        self.last_duration_ms.load(Ordering::Relaxed) > self.warning_mspt
    }

    pub fn is_critically_lagging(&self) -> bool {
        self.last_duration_ms.load(Ordering::Relaxed) > self.critical_mspt
    }

    /// Reset to the unthrottled state.
    pub fn reset(&self) {
        self.skip_factor.store(1, Ordering::Relaxed);
        self.last_duration_ms.store(0, Ordering::Relaxed);
    }
}
