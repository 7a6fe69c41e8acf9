//! Prometheus-compatible metrics endpoint
//!
//! Exposes shedding and shaping counters in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Rolling tick samples kept for percentile calculation.
const TICK_HISTORY: usize = 1000;

/// Metrics registry for the shedding core
#[derive(Debug)]
pub struct Metrics {
    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Shedding state
    pub skip_factor: AtomicU64,
    pub average_mspt_x100: AtomicU64,
    pub current_tps_x100: AtomicU64,

    // Unit scheduling
    pub units_total: AtomicU64,
    pub units_processed: AtomicU64,
    pub units_skipped: AtomicU64,

    // Traffic shaping
    pub connections_active: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_throttled: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub compression_bytes_saved: AtomicU64,
    pub upload_bps: AtomicU64,
    pub download_bps: AtomicU64,

    // Pools
    pub pool_hits: AtomicU64,
    pub pool_misses: AtomicU64,

    // Memory / offloading
    pub heap_usage_percent: AtomicU64,
    pub offload_submitted: AtomicU64,
    pub offload_completed: AtomicU64,

    // Server uptime
    start_time: Instant,

    // Rolling tick times for percentile calculation (VecDeque for O(1) pop_front)
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            skip_factor: AtomicU64::new(1),
            average_mspt_x100: AtomicU64::new(0),
            current_tps_x100: AtomicU64::new(0),
            units_total: AtomicU64::new(0),
            units_processed: AtomicU64::new(0),
            units_skipped: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_throttled: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            compression_bytes_saved: AtomicU64::new(0),
            upload_bps: AtomicU64::new(0),
            download_bps: AtomicU64::new(0),
            pool_hits: AtomicU64::new(0),
            pool_misses: AtomicU64::new(0),
            heap_usage_percent: AtomicU64::new(0),
            offload_submitted: AtomicU64::new(0),
            offload_completed: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us
                .store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Tick metrics
        metric!("tickshed_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("tickshed_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("tickshed_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("tickshed_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("tickshed_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        // Shedding metrics
        metric!("tickshed_skip_factor", "Current entity skip factor", "gauge",
            self.skip_factor.load(Ordering::Relaxed));
        metric!("tickshed_average_mspt", "Average milliseconds per tick (x100)", "gauge",
            self.average_mspt_x100.load(Ordering::Relaxed));
        metric!("tickshed_current_tps", "Current ticks per second (x100)", "gauge",
            self.current_tps_x100.load(Ordering::Relaxed));
        metric!("tickshed_units_total", "Units known to the scheduler", "gauge",
            self.units_total.load(Ordering::Relaxed));
        metric!("tickshed_units_processed_total", "Units processed", "counter",
            self.units_processed.load(Ordering::Relaxed));
        metric!("tickshed_units_skipped_total", "Units skipped by shedding", "counter",
            self.units_skipped.load(Ordering::Relaxed));

        // Network metrics
        metric!("tickshed_connections_active", "Active shaped connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("tickshed_messages_sent_total", "Messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("tickshed_messages_throttled_total", "Messages suppressed by throttling", "counter",
            self.messages_throttled.load(Ordering::Relaxed));
        metric!("tickshed_batches_flushed_total", "Batches flushed", "counter",
            self.batches_flushed.load(Ordering::Relaxed));
        metric!("tickshed_bytes_sent_total", "Bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("tickshed_bytes_received_total", "Bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("tickshed_compression_bytes_saved_total", "Bytes removed by compression", "counter",
            self.compression_bytes_saved.load(Ordering::Relaxed));
        metric!("tickshed_upload_bytes_per_second", "Published upload rate", "gauge",
            self.upload_bps.load(Ordering::Relaxed));
        metric!("tickshed_download_bytes_per_second", "Published download rate", "gauge",
            self.download_bps.load(Ordering::Relaxed));

        // Pool metrics
        metric!("tickshed_pool_hits_total", "Pool acquisitions served from the pool", "counter",
            self.pool_hits.load(Ordering::Relaxed));
        metric!("tickshed_pool_misses_total", "Pool acquisitions that allocated", "counter",
            self.pool_misses.load(Ordering::Relaxed));

        // Memory / offload metrics
        metric!("tickshed_heap_usage_percent", "Heap usage percentage", "gauge",
            self.heap_usage_percent.load(Ordering::Relaxed));
        metric!("tickshed_offload_submitted_total", "Tasks submitted to the offloader", "counter",
            self.offload_submitted.load(Ordering::Relaxed));
        metric!("tickshed_offload_completed_total", "Tasks completed by the offloader", "counter",
            self.offload_completed.load(Ordering::Relaxed));

        metric!("tickshed_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        format!(
            r#"{{
  "tick": {{
    "time_us": {},
    "p95_us": {},
    "p99_us": {},
    "max_us": {},
    "count": {},
    "skip_factor": {},
    "average_mspt": {},
    "current_tps": {}
  }},
  "units": {{
    "total": {},
    "processed": {},
    "skipped": {}
  }},
  "network": {{
    "connections": {},
    "messages_sent": {},
    "messages_throttled": {},
    "batches_flushed": {},
    "bytes_sent": {},
    "bytes_received": {},
    "compression_bytes_saved": {},
    "upload_bps": {},
    "download_bps": {}
  }},
  "pools": {{
    "hits": {},
    "misses": {}
  }},
  "memory": {{
    "heap_usage_percent": {}
  }},
  "offload": {{
    "submitted": {},
    "completed": {}
  }},
  "uptime_seconds": {}
}}"#,
            self.tick_time_us.load(Ordering::Relaxed),
            self.tick_time_p95_us.load(Ordering::Relaxed),
            self.tick_time_p99_us.load(Ordering::Relaxed),
            self.tick_time_max_us.load(Ordering::Relaxed),
            self.tick_count.load(Ordering::Relaxed),
            self.skip_factor.load(Ordering::Relaxed),
            self.average_mspt_x100.load(Ordering::Relaxed) as f64 / 100.0,
            self.current_tps_x100.load(Ordering::Relaxed) as f64 / 100.0,
            self.units_total.load(Ordering::Relaxed),
            self.units_processed.load(Ordering::Relaxed),
            self.units_skipped.load(Ordering::Relaxed),
            self.connections_active.load(Ordering::Relaxed),
            self.messages_sent.load(Ordering::Relaxed),
            self.messages_throttled.load(Ordering::Relaxed),
            self.batches_flushed.load(Ordering::Relaxed),
            self.bytes_sent.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
            self.compression_bytes_saved.load(Ordering::Relaxed),
            self.upload_bps.load(Ordering::Relaxed),
            self.download_bps.load(Ordering::Relaxed),
            self.pool_hits.load(Ordering::Relaxed),
            self.pool_misses.load(Ordering::Relaxed),
            self.heap_usage_percent.load(Ordering::Relaxed),
            self.offload_submitted.load(Ordering::Relaxed),
            self.offload_completed.load(Ordering::Relaxed),
            self.uptime_seconds(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    let response = if request.starts_with("GET /metrics/json")
                        || request.starts_with("GET /json")
                    {
                        let body = metrics.to_json();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") || request.starts_with("GET /") {
                        let body = "OK";
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
