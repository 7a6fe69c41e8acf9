//! Per-connection message-rate limiting.
//!
//! Each message class carries a cooldown; a message arriving before its
//! class's cooldown has elapsed is suppressed. State is owned by one
//! connection and only touched from its execution context.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::config::ThrottleConfig;

/// Outbound message classes with distinct cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Generic,
    /// Unit movement/state updates.
    UnitUpdate,
    /// World-cell changes.
    CellUpdate,
    Chat,
}

/// Tracks last-send times per message class for one connection.
#[derive(Debug)]
pub struct Throttler {
    enabled: bool,
    default_cooldown: Duration,
    cooldowns: FxHashMap<MessageClass, Duration>,
    last_sent: FxHashMap<MessageClass, Instant>,
    suppressed: u64,
    sent: u64,
}

impl Throttler {
    pub fn new(config: &ThrottleConfig) -> Self {
        let mut cooldowns = FxHashMap::default();
        cooldowns.insert(
            MessageClass::UnitUpdate,
            Duration::from_millis(config.unit_update_cooldown_ms),
        );
        cooldowns.insert(
            MessageClass::CellUpdate,
            Duration::from_millis(config.cell_update_cooldown_ms),
        );
        cooldowns.insert(
            MessageClass::Chat,
            Duration::from_millis(config.chat_cooldown_ms),
        );

        Self {
            enabled: config.enabled,
            default_cooldown: Duration::from_millis(config.default_cooldown_ms),
            cooldowns,
            last_sent: FxHashMap::default(),
            suppressed: 0,
            sent: 0,
        }
    }

    /// Override the cooldown for one class.
    pub fn set_cooldown(&mut self, class: MessageClass, cooldown: Duration) {
        self.cooldowns.insert(class, cooldown);
    }

    pub fn cooldown_for(&self, class: MessageClass) -> Duration {
        self.cooldowns
            .get(&class)
            .copied()
            .unwrap_or(self.default_cooldown)
    }

    /// Whether a message of `class` may be sent now. Updates the last-send
    /// time and counters accordingly.
    pub fn should_send(&mut self, class: MessageClass) -> bool {
        self.should_send_at(class, Instant::now())
    }

    fn should_send_at(&mut self, class: MessageClass, now: Instant) -> bool {
        if !self.enabled {
            self.sent += 1;
            return true;
        }

        let cooldown = self.cooldown_for(class);
        if cooldown.is_zero() {
            self.sent += 1;
            return true;
        }

        if let Some(last) = self.last_sent.get(&class) {
            if now.duration_since(*last) < cooldown {
                self.suppressed += 1;
                return false;
            }
        }

        self.last_sent.insert(class, now);
        self.sent += 1;
        true
    }

    /// Fraction of submissions that were suppressed.
    pub fn throttle_rate(&self) -> f64 {
        let total = self.sent + self.suppressed;
        if total == 0 {
            0.0
        } else {
            self.suppressed as f64 / total as f64
        }
    }

    pub fn total_suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn total_sent(&self) -> u64 {
        self.sent
    }

    /// Forget all timing state and counters.
    pub fn reset(&mut self) {
        self.last_sent.clear();
        self.suppressed = 0;
        self.sent = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttler() -> Throttler {
        Throttler::new(&ThrottleConfig::default())
    }

    #[test]
    fn test_first_send_always_allowed() {
        let mut t = throttler();
        assert!(t.should_send(MessageClass::Generic));
        assert_eq!(t.total_sent(), 1);
    }

    #[test]
    fn test_cooldown_suppresses_then_allows() {
        let mut t = throttler();
        t.set_cooldown(MessageClass::Generic, Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(t.should_send_at(MessageClass::Generic, t0));
        // 50ms later: still cooling down
        assert!(!t.should_send_at(MessageClass::Generic, t0 + Duration::from_millis(50)));
        // 60ms after that (110ms since the send that won): allowed again
        assert!(t.should_send_at(MessageClass::Generic, t0 + Duration::from_millis(110)));
    }

    #[test]
    fn test_suppressed_send_does_not_reset_cooldown() {
        let mut t = throttler();
        t.set_cooldown(MessageClass::Generic, Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(t.should_send_at(MessageClass::Generic, t0));
        assert!(!t.should_send_at(MessageClass::Generic, t0 + Duration::from_millis(90)));
        // Cooldown still runs from t0, not from the suppressed attempt
        assert!(t.should_send_at(MessageClass::Generic, t0 + Duration::from_millis(101)));
    }

    #[test]
    fn test_classes_are_independent() {
        let mut t = throttler();
        let t0 = Instant::now();
        assert!(t.should_send_at(MessageClass::UnitUpdate, t0));
        // Different class, fresh cooldown
        assert!(t.should_send_at(MessageClass::CellUpdate, t0));
        assert!(!t.should_send_at(MessageClass::UnitUpdate, t0 + Duration::from_millis(10)));
    }

    #[test]
    fn test_default_cooldowns_from_config() {
        let t = throttler();
        assert_eq!(
            t.cooldown_for(MessageClass::UnitUpdate),
            Duration::from_millis(50)
        );
        assert_eq!(
            t.cooldown_for(MessageClass::CellUpdate),
            Duration::from_millis(25)
        );
        assert_eq!(
            t.cooldown_for(MessageClass::Chat),
            Duration::from_millis(100)
        );
        assert_eq!(
            t.cooldown_for(MessageClass::Generic),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_zero_cooldown_never_throttles() {
        let mut t = throttler();
        t.set_cooldown(MessageClass::Chat, Duration::ZERO);
        let t0 = Instant::now();
        for _ in 0..10 {
            assert!(t.should_send_at(MessageClass::Chat, t0));
        }
        assert_eq!(t.total_suppressed(), 0);
    }

    #[test]
    fn test_disabled_throttler_passes_everything() {
        let config = ThrottleConfig {
            enabled: false,
            ..ThrottleConfig::default()
        };
        let mut t = Throttler::new(&config);
        let t0 = Instant::now();
        assert!(t.should_send_at(MessageClass::Generic, t0));
        assert!(t.should_send_at(MessageClass::Generic, t0));
    }

    #[test]
    fn test_throttle_rate() {
        let mut t = throttler();
        t.set_cooldown(MessageClass::Generic, Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(t.should_send_at(MessageClass::Generic, t0));
        for i in 1..=3 {
            assert!(!t.should_send_at(MessageClass::Generic, t0 + Duration::from_millis(i)));
        }
        assert_eq!(t.total_sent(), 1);
        assert_eq!(t.total_suppressed(), 3);
        assert_eq!(t.throttle_rate(), 0.75);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut t = throttler();
        let t0 = Instant::now();
        assert!(t.should_send_at(MessageClass::Generic, t0));
        t.reset();
        assert_eq!(t.total_sent(), 0);
        // Cooldown history gone: an immediate send is allowed
        assert!(t.should_send_at(MessageClass::Generic, t0));
    }
}
