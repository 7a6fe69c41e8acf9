//! Global byte-rate accounting with advisory rate caps.
//!
//! Counters are updated from arbitrary threads with plain atomics; the
//! once-a-second rollover is claimed by a single compare-and-swap so only
//! one thread publishes each window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::BandwidthConfig;

/// Sliding one-second byte-rate meter.
///
/// The meter only observes traffic and raises advisory signals; it never
/// delays or drops data itself.
#[derive(Debug)]
pub struct BandwidthMeter {
    tracking: bool,
    epoch: Instant,
    total_sent: AtomicU64,
    total_received: AtomicU64,
    second_sent: AtomicU64,
    second_received: AtomicU64,
    last_rollover_ms: AtomicU64,
    upload_bps: AtomicU64,
    download_bps: AtomicU64,
    max_upload_bps: AtomicU64,
    max_download_bps: AtomicU64,
}

impl BandwidthMeter {
    pub fn new(config: &BandwidthConfig) -> Self {
        Self {
            tracking: config.track_usage,
            epoch: Instant::now(),
            total_sent: AtomicU64::new(0),
            total_received: AtomicU64::new(0),
            second_sent: AtomicU64::new(0),
            second_received: AtomicU64::new(0),
            last_rollover_ms: AtomicU64::new(0),
            upload_bps: AtomicU64::new(0),
            download_bps: AtomicU64::new(0),
            max_upload_bps: AtomicU64::new(config.max_upload_bps),
            max_download_bps: AtomicU64::new(config.max_download_bps),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Record outbound bytes.
    pub fn record_sent(&self, bytes: u64) {
        if !self.tracking {
            return;
        }
        self.total_sent.fetch_add(bytes, Ordering::Relaxed);
        self.second_sent.fetch_add(bytes, Ordering::Relaxed);
        self.rollover(self.now_ms());
    }

    /// Record inbound bytes.
    pub fn record_received(&self, bytes: u64) {
        if !self.tracking {
            return;
        }
        self.total_received.fetch_add(bytes, Ordering::Relaxed);
        self.second_received.fetch_add(bytes, Ordering::Relaxed);
        self.rollover(self.now_ms());
    }

    /// Publish the current window if a second has elapsed. Called from the
    /// record paths; also safe to call from a reporting loop.
    pub fn poll(&self) {
        self.rollover(self.now_ms());
    }

    fn rollover(&self, now_ms: u64) {
        let last = self.last_rollover_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(last) < 1000 {
            return;
        }
        // One winner per window; losers leave the counters alone
        if self
            .last_rollover_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let sent = self.second_sent.swap(0, Ordering::AcqRel);
            let received = self.second_received.swap(0, Ordering::AcqRel);
            self.upload_bps.store(sent, Ordering::Release);
            self.download_bps.store(received, Ordering::Release);
        }
    }

    /// Upload rate published at the last rollover, in bytes per second.
    pub fn upload_bps(&self) -> u64 {
        self.upload_bps.load(Ordering::Acquire)
    }

    /// Download rate published at the last rollover, in bytes per second.
    pub fn download_bps(&self) -> u64 {
        self.download_bps.load(Ordering::Acquire)
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.total_received.load(Ordering::Relaxed)
    }

    /// Update the caps (0 = unlimited); takes effect immediately.
    pub fn set_caps(&self, max_upload_bps: u64, max_download_bps: u64) {
        self.max_upload_bps.store(max_upload_bps, Ordering::Relaxed);
        self.max_download_bps.store(max_download_bps, Ordering::Relaxed);
    }

    /// Advisory: the published upload rate has reached the cap.
    pub fn should_throttle_upload(&self) -> bool {
        let max = self.max_upload_bps.load(Ordering::Relaxed);
        max > 0 && self.upload_bps() >= max
    }

    /// Advisory: the published download rate has reached the cap.
    pub fn should_throttle_download(&self) -> bool {
        let max = self.max_download_bps.load(Ordering::Relaxed);
        max > 0 && self.download_bps() >= max
    }

    /// Human-readable one-line summary for logs.
    pub fn stats(&self) -> String {
        format!(
            "up {}/s, down {}/s, total \u{2191}{} \u{2193}{}",
            format_bytes(self.upload_bps()),
            format_bytes(self.download_bps()),
            format_bytes(self.total_bytes_sent()),
            format_bytes(self.total_bytes_received()),
        )
    }

    /// Zero every counter and published rate.
    pub fn reset(&self) {
        self.total_sent.store(0, Ordering::Relaxed);
        self.total_received.store(0, Ordering::Relaxed);
        self.second_sent.store(0, Ordering::Relaxed);
        self.second_received.store(0, Ordering::Relaxed);
        self.upload_bps.store(0, Ordering::Relaxed);
        self.download_bps.store(0, Ordering::Relaxed);
    }
}

/// Format a byte count with a binary unit suffix.
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;
    if bytes < KIB {
        format!("{}B", bytes)
    } else if bytes < MIB {
        format!("{:.1}KiB", bytes as f64 / KIB as f64)
    } else if bytes < GIB {
        format!("{:.1}MiB", bytes as f64 / MIB as f64)
    } else {
        format!("{:.2}GiB", bytes as f64 / GIB as f64)
    }
}
