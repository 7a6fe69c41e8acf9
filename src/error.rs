//! Centralized error reporting with flood control.
//!
//! The same failure repeating in a tight loop (a bad connection, a poisoned
//! message) must not bury the log. An identical context+message seen again
//! within the suppression window is counted instead of re-logged; the count
//! is emitted as a summary when a different error breaks the streak.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, warn};

/// Default window within which identical errors are collapsed.
const SUPPRESS_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct ReporterState {
    last_message: String,
    last_logged: Option<Instant>,
    repeats: u64,
}

/// Shared error sink for components that must not spam the log.
#[derive(Debug)]
pub struct ErrorReporter {
    window: Duration,
    state: Mutex<ReporterState>,
    total: AtomicU64,
    suppressed: AtomicU64,
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::with_window(SUPPRESS_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(ReporterState::default()),
            total: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Report an error; identical repeats within the window are only
    /// counted.
    pub fn handle(&self, context: &str, err: &dyn Display) {
        self.handle_at(context, err, Instant::now());
    }

    fn handle_at(&self, context: &str, err: &dyn Display, now: Instant) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let message = format!("{context}: {err}");

        let mut state = self.state.lock();
        let is_repeat = message == state.last_message
            && state
                .last_logged
                .is_some_and(|last| now.duration_since(last) < self.window);

        if is_repeat {
            state.repeats += 1;
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if state.repeats > 0 {
            warn!("previous error repeated {} times", state.repeats);
            state.repeats = 0;
        }
        state.last_message = message.clone();
        state.last_logged = Some(now);
        error!("{message}");
    }

    /// Report at warning severity, bypassing suppression.
    pub fn handle_warning(&self, context: &str, err: &dyn Display) {
        self.total.fetch_add(1, Ordering::Relaxed);
        warn!("{context}: {err}");
    }

    /// Emit the pending repeat summary, if any. Call periodically so a
    /// silent streak still gets its count reported.
    pub fn flush_repeats(&self) {
        let mut state = self.state.lock();
        if state.repeats > 0 {
            warn!("previous error repeated {} times", state.repeats);
            state.repeats = 0;
        }
    }

    /// Run a fallible action, reporting a failure instead of propagating.
    pub fn run_safe<E: Display>(&self, context: &str, action: impl FnOnce() -> Result<(), E>) {
        if let Err(err) = action() {
            self.handle(context, &err);
        }
    }

    /// Run a fallible action, substituting `fallback` on failure.
    pub fn with_fallback<T, E: Display>(
        &self,
        context: &str,
        action: impl FnOnce() -> Result<T, E>,
        fallback: T,
    ) -> T {
        match action() {
            Ok(value) => value,
            Err(err) => {
                self.handle_warning(context, &err);
                fallback
            }
        }
    }

    pub fn total_errors(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn suppressed_errors(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// Repeats counted since the last logged line or summary.
    pub fn pending_repeats(&self) -> u64 {
        self.state.lock().repeats
    }

    pub fn reset_stats(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.suppressed.store(0, Ordering::Relaxed);
        let mut state = self.state.lock();
        *state = ReporterState::default();
    }
}
