//! Tick wall-clock measurement and rolling throughput statistics.

use std::time::{Duration, Instant};

use crate::config::TickConfig;
use crate::sim::load::LoadController;

/// Ring buffer length for recent tick durations.
const SAMPLE_SIZE: usize = 100;

/// Averages are recomputed every this many ticks, not per tick.
const AVERAGE_INTERVAL: u64 = 20;

/// Average MSPT below which idle ticks get 1ms of extra sleep.
const IDLE_SLEEP_MSPT: f64 = 40.0;

/// Measures each tick and maintains average MSPT and TPS over the last
/// [`SAMPLE_SIZE`] ticks. Owned by the simulation thread.
#[derive(Debug)]
pub struct TickClock {
    target_mspt: u64,
    warning_mspt: u64,
    samples: [u64; SAMPLE_SIZE],
    sample_index: usize,
    tick_count: u64,
    tick_start: Option<Instant>,
    average_mspt: f64,
    current_tps: f64,
}

impl TickClock {
    pub fn new(config: &TickConfig) -> Self {
        let nominal_mspt = config.target_mspt.max(1) as f64;
        Self {
            target_mspt: config.target_mspt,
            warning_mspt: config.warning_mspt,
            samples: [0; SAMPLE_SIZE],
            sample_index: 0,
            tick_count: 0,
            tick_start: None,
            average_mspt: nominal_mspt,
            current_tps: 1000.0 / nominal_mspt,
        }
    }

    fn nominal_tps(&self) -> f64 {
        1000.0 / self.target_mspt.max(1) as f64
    }

    /// Record the start of a tick.
    pub fn tick_start(&mut self) {
        self.tick_start = Some(Instant::now());
    }

    /// Record the end of a tick, feed the duration to the load controller,
    /// and return it. Without a matching `tick_start` this is a no-op.
    pub fn tick_end(&mut self, load: &LoadController) -> Option<Duration> {
        let start = self.tick_start.take()?;
        let duration = start.elapsed();
        self.record(duration);
        load.record_tick_duration(duration.as_millis() as u64);
        Some(duration)
    }

    fn record(&mut self, duration: Duration) {
        self.samples[self.sample_index] = duration.as_millis() as u64;
        self.sample_index = (self.sample_index + 1) % SAMPLE_SIZE;
        self.tick_count += 1;

        if self.tick_count % AVERAGE_INTERVAL == 0 {
            self.update_averages();
        }
    }

    fn update_averages(&mut self) {
        let count = (self.tick_count.min(SAMPLE_SIZE as u64)) as usize;
        if count == 0 {
            return;
        }
        let sum: u64 = self.samples[..count].iter().sum();
        self.average_mspt = sum as f64 / count as f64;
        self.current_tps = self
            .nominal_tps()
            .min(1000.0 / self.average_mspt.max(1.0));
    }

    /// Average milliseconds per tick over the sample window.
    pub fn average_mspt(&self) -> f64 {
        self.average_mspt
    }

    /// Ticks per second, capped at the nominal rate.
    pub fn current_tps(&self) -> f64 {
        self.current_tps
    }

    /// Duration of the most recent completed tick, in milliseconds.
    pub fn last_tick_ms(&self) -> u64 {
        let last = (self.sample_index + SAMPLE_SIZE - 1) % SAMPLE_SIZE;
        self.samples[last]
    }

    pub fn total_ticks(&self) -> u64 {
        self.tick_count
    }

    /// Whether there is enough headroom to run catch-up ticks.
    pub fn should_catch_up(&self) -> bool {
        self.average_mspt < self.warning_mspt as f64
    }

    /// How long the loop should sleep after a tick of the given duration.
    ///
    /// Consistently idle servers get an extra millisecond to cut CPU use.
    pub fn recommended_sleep(&self, tick_duration: Duration) -> Duration {
        let target = Duration::from_millis(self.target_mspt);
        let mut sleep = target.saturating_sub(tick_duration);

        if self.average_mspt < IDLE_SLEEP_MSPT && sleep > Duration::from_millis(1) {
            sleep += Duration::from_millis(1);
        }
        sleep
    }

    /// Reset all samples and counters.
    pub fn reset(&mut self) {
        let nominal_mspt = self.target_mspt.max(1) as f64;
        self.samples = [0; SAMPLE_SIZE];
        self.sample_index = 0;
        self.tick_count = 0;
        self.tick_start = None;
        self.average_mspt = nominal_mspt;
        self.current_tps = 1000.0 / nominal_mspt;
    }
}
