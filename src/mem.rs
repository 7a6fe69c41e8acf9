//! Heap pressure monitoring with cooldown-gated cleanup.
//!
//! The guard reads usage through an injected probe and answers threshold
//! queries from any thread. Cleanup is single-flight: one compare-and-swap
//! on the last-cleanup timestamp decides which caller wins a window, so a
//! cleanup hook can never run twice in one cooldown period.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::MemoryConfig;

const MIB: u64 = 1024 * 1024;

/// Source of heap usage numbers; supplied by the host process.
pub trait HeapProbe: Send + Sync {
    fn used_bytes(&self) -> u64;
    fn max_bytes(&self) -> u64;
}

/// Probe backed by counters the host updates explicitly. Useful when the
/// host tracks its own allocations, and for tests.
#[derive(Debug)]
pub struct CounterProbe {
    used: AtomicU64,
    max: u64,
}

impl CounterProbe {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            used: AtomicU64::new(0),
            max: max_bytes,
        }
    }

    pub fn set_used(&self, bytes: u64) {
        self.used.store(bytes, Ordering::Relaxed);
    }

    pub fn add_used(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn sub_used(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::Relaxed);
    }
}

impl HeapProbe for CounterProbe {
    fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    fn max_bytes(&self) -> u64 {
        self.max
    }
}

/// Watches heap usage and serializes cleanup attempts across threads.
pub struct MemoryGuard {
    probe: Arc<dyn HeapProbe>,
    warning_threshold: f64,
    critical_threshold: f64,
    cleanup_threshold: f64,
    cooldown: Duration,
    epoch: Instant,
    /// Milliseconds-since-epoch of the last accepted cleanup, offset by one
    /// so zero always means "never".
    last_cleanup_ms: AtomicU64,
}

impl MemoryGuard {
    pub fn new(config: &MemoryConfig, probe: Arc<dyn HeapProbe>) -> Self {
        Self {
            probe,
            warning_threshold: config.warning_threshold,
            critical_threshold: config.critical_threshold,
            cleanup_threshold: config.cleanup_threshold,
            cooldown: Duration::from_secs(config.cleanup_cooldown_secs),
            epoch: Instant::now(),
            last_cleanup_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    /// Heap usage as a fraction of the maximum (0.0 - 1.0).
    pub fn usage(&self) -> f64 {
        let max = self.probe.max_bytes();
        if max == 0 {
            return 0.0;
        }
        self.probe.used_bytes() as f64 / max as f64
    }

    pub fn used_mib(&self) -> u64 {
        self.probe.used_bytes() / MIB
    }

    pub fn max_mib(&self) -> u64 {
        self.probe.max_bytes() / MIB
    }

    pub fn free_mib(&self) -> u64 {
        self.probe.max_bytes().saturating_sub(self.probe.used_bytes()) / MIB
    }

    pub fn is_warning_level(&self) -> bool {
        self.usage() >= self.warning_threshold
    }

    pub fn is_critical_level(&self) -> bool {
        self.usage() >= self.critical_threshold
    }

    /// True when usage is past the cleanup threshold and the cooldown
    /// window is open. Does not claim the window.
    pub fn should_suggest_cleanup(&self) -> bool {
        if self.usage() < self.cleanup_threshold {
            return false;
        }
        self.window_open(self.now_ms())
    }

    fn window_open(&self, now_ms: u64) -> bool {
        let last = self.last_cleanup_ms.load(Ordering::Acquire);
        last == 0 || now_ms.saturating_sub(last) >= self.cooldown.as_millis() as u64
    }

    /// Run `cleanup` if this caller wins the current cooldown window.
    ///
    /// Exactly one of any number of concurrent callers wins; the rest get
    /// `false` and must not clean up themselves.
    pub fn perform_cleanup(&self, cleanup: impl FnOnce()) -> bool {
        let now = self.now_ms();
        let last = self.last_cleanup_ms.load(Ordering::Acquire);
        if !(last == 0 || now.saturating_sub(last) >= self.cooldown.as_millis() as u64) {
            return false;
        }
        if self
            .last_cleanup_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another caller claimed this window first
            return false;
        }

        tracing::info!("memory cleanup accepted at {:.1}% heap", self.usage() * 100.0);
        cleanup();
        true
    }

    pub fn has_memory_for(&self, required_bytes: u64) -> bool {
        self.probe.max_bytes().saturating_sub(self.probe.used_bytes()) >= required_bytes
    }

    /// One-line status for logs.
    pub fn status(&self) -> String {
        format!(
            "memory: {}MiB / {}MiB ({:.1}%)",
            self.used_mib(),
            self.max_mib(),
            self.usage() * 100.0
        )
    }
}

impl std::fmt::Debug for MemoryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGuard")
            .field("usage", &self.usage())
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn guard_with(max: u64, used: u64) -> (MemoryGuard, Arc<CounterProbe>) {
        let probe = Arc::new(CounterProbe::new(max));
        probe.set_used(used);
        let guard = MemoryGuard::new(&MemoryConfig::default(), probe.clone());
        (guard, probe)
    }

    #[test]
    fn test_usage_fraction() {
        let (guard, _) = guard_with(1000, 250);
        assert_eq!(guard.usage(), 0.25);
    }

    #[test]
    fn test_threshold_levels() {
        let (guard, probe) = guard_with(1000, 0);
        assert!(!guard.is_warning_level());

        probe.set_used(700);
        assert!(guard.is_warning_level());
        assert!(!guard.is_critical_level());

        probe.set_used(850);
        assert!(guard.is_critical_level());
    }

    #[test]
    fn test_suggest_cleanup_requires_both_conditions() {
        let (guard, probe) = guard_with(1000, 800);
        // Below the 0.90 cleanup threshold
        assert!(!guard.should_suggest_cleanup());

        probe.set_used(950);
        assert!(guard.should_suggest_cleanup());

        // Winning a window closes it for the cooldown period
        assert!(guard.perform_cleanup(|| {}));
        assert!(!guard.should_suggest_cleanup());
    }

    #[test]
    fn test_cleanup_single_flight_sequential() {
        let (guard, _) = guard_with(1000, 950);
        assert!(guard.perform_cleanup(|| {}));
        assert!(!guard.perform_cleanup(|| {}));
    }

    #[test]
    fn test_cleanup_single_flight_concurrent() {
        let (guard, _) = guard_with(1000, 950);
        let guard = Arc::new(guard);
        let wins = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = guard.clone();
            let wins = wins.clone();
            handles.push(std::thread::spawn(move || {
                if guard.perform_cleanup(|| {}) {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cleanup_hook_runs_only_for_winner() {
        let (guard, _) = guard_with(1000, 950);
        let runs = AtomicUsize::new(0);
        guard.perform_cleanup(|| {
            runs.fetch_add(1, Ordering::SeqCst);
        });
        guard.perform_cleanup(|| {
            runs.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_window_reopens_after_cooldown() {
        let probe = Arc::new(CounterProbe::new(1000));
        probe.set_used(950);
        let config = MemoryConfig {
            cleanup_cooldown_secs: 0,
            ..MemoryConfig::default()
        };
        let guard = MemoryGuard::new(&config, probe);
        assert!(guard.perform_cleanup(|| {}));
        assert!(guard.perform_cleanup(|| {}));
    }

    #[test]
    fn test_mib_accessors_and_status() {
        let (guard, _) = guard_with(4096 * MIB, 1024 * MIB);
        assert_eq!(guard.max_mib(), 4096);
        assert_eq!(guard.used_mib(), 1024);
        assert_eq!(guard.free_mib(), 3072);
        assert!(guard.status().contains("1024MiB / 4096MiB"));
    }

    #[test]
    fn test_has_memory_for() {
        let (guard, _) = guard_with(1000, 900);
        assert!(guard.has_memory_for(100));
        assert!(!guard.has_memory_for(101));
    }

    #[test]
    fn test_zero_max_reports_zero_usage() {
        let (guard, _) = guard_with(0, 0);
        assert_eq!(guard.usage(), 0.0);
    }
}
