//! Synthetic load driver: runs a fake world against the full shedding and
//! shaping stack with a loopback transport, so the whole pipeline can be
//! observed under load without a real simulation or network.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info, Level};

use tickshed::config::Config;
use tickshed::error::ErrorReporter;
use tickshed::mem::{CounterProbe, MemoryGuard};
use tickshed::metrics::{self, Metrics};
use tickshed::net::batch::Transport;
use tickshed::net::delta::{encode_position_delta, encode_rotation_delta, DeltaTracker};
use tickshed::net::{BandwidthMeter, ConnectionShaper, MessageClass};
#[cfg(feature = "offload")]
use tickshed::offload::TaskOffloader;
use tickshed::pool::with_thread_arena;
use tickshed::sim::clock::TickClock;
use tickshed::sim::distance::{nearest_observer_dist_sq, DistanceScheduler};
use tickshed::sim::load::LoadController;
use tickshed::sim::unit::{UnitId, UnitKind, WorkUnit};
use tickshed::sim::should_process;
use tickshed::util::grid::GridPos;
use tickshed::util::vec3::Vec3;

/// Outbound unit state message, bincode-encoded before shaping.
#[derive(Debug, Serialize, Deserialize)]
struct UnitUpdate {
    id: UnitId,
    /// Fixed-point displacement when it fits the wire format.
    delta: Option<[i16; 3]>,
    /// Absolute position when the displacement overflowed.
    absolute: Option<(f64, f64, f64)>,
    rotation: Option<[u8; 2]>,
}

/// Periodic bulk region sync; large enough to engage compression.
#[derive(Debug, Serialize, Deserialize)]
struct RegionSync {
    cells: Vec<(u64, u64)>,
}

/// Transport that terminates in counters instead of a socket.
#[derive(Debug, Default)]
struct LoopbackTransport {
    messages: u64,
    flushes: u64,
}

impl Transport for LoopbackTransport {
    fn send(&mut self, _payload: &[u8]) -> std::io::Result<()> {
        self.messages += 1;
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// One fake remote peer: shaper plus delta state.
struct Connection {
    shaper: ConnectionShaper<LoopbackTransport>,
    cells: DeltaTracker<u64>,
    last_sent: FxHashMap<UnitId, (Vec3, f32, f32)>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("tickshed load driver v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "configuration: target {}ms/tick, max skip factor {}, batch {}",
        config.tick.target_mspt, config.tick.max_skip_factor, config.batching.max_batch_size
    );

    let metrics = Arc::new(Metrics::new());
    let metrics_port: u16 = env_parse("METRICS_PORT", 9090);
    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let ticks: u64 = env_parse("SIM_TICKS", 1200);
    let unit_count: usize = env_parse("SIM_UNITS", 400);
    let connection_count: usize = env_parse("SIM_CONNECTIONS", 4);

    tokio::task::spawn_blocking(move || {
        run_simulation(config, metrics, ticks, unit_count, connection_count)
    })
    .await??;

    Ok(())
}

fn spawn_units(count: usize, observers: usize) -> (Vec<WorkUnit>, Vec<Vec3>) {
    let mut rng = rand::thread_rng();
    let mut units = Vec::with_capacity(count);
    let mut velocities = Vec::with_capacity(count);

    for i in 0..count {
        let kind = if i < observers {
            UnitKind::Observer
        } else {
            match i % 10 {
                0 | 1 => UnitKind::Hostile,
                2 => UnitKind::Projectile,
                3 => UnitKind::ItemDrop,
                4 => UnitKind::ExperienceOrb,
                5 => UnitKind::Npc,
                _ => UnitKind::Passive,
            }
        };

        let position = Vec3::new(
            rng.gen_range(-150.0..150.0),
            rng.gen_range(0.0..64.0),
            rng.gen_range(-150.0..150.0),
        );
        let mut unit = WorkUnit::new(i as UnitId, kind, position);
        // A few units start out mid-fight
        if kind == UnitKind::Hostile && rng.gen_bool(0.1) {
            unit.engaged = true;
        }
        units.push(unit);
        velocities.push(Vec3::new(
            rng.gen_range(-2.0..2.0),
            0.0,
            rng.gen_range(-2.0..2.0),
        ));
    }
    (units, velocities)
}

fn run_simulation(
    config: Config,
    metrics: Arc<Metrics>,
    ticks: u64,
    unit_count: usize,
    connection_count: usize,
) -> anyhow::Result<()> {
    let mut clock = TickClock::new(&config.tick);
    let load = LoadController::new(&config.tick);
    let scheduler = DistanceScheduler::new(&config.culling);
    let reporter = ErrorReporter::new();
    let meter = Arc::new(BandwidthMeter::new(&config.bandwidth));

    // Synthetic 256 MiB heap; usage follows how much state we track
    let probe = Arc::new(CounterProbe::new(256 * 1024 * 1024));
    let guard = MemoryGuard::new(&config.memory, probe.clone());

    #[cfg(feature = "offload")]
    let offloader = TaskOffloader::new(&config.offload);

    let (mut units, velocities) = spawn_units(unit_count, connection_count.max(1));

    let mut connections: Vec<Connection> = (0..connection_count)
        .map(|id| Connection {
            shaper: ConnectionShaper::new(
                id as u64,
                &config,
                LoopbackTransport::default(),
                meter.clone(),
            ),
            cells: DeltaTracker::new(),
            last_sent: FxHashMap::default(),
        })
        .collect();
    metrics
        .connections_active
        .store(connections.len() as u64, std::sync::atomic::Ordering::Relaxed);

    let mut rng = rand::thread_rng();
    let encode_cfg = bincode::config::standard();

    info!(
        "simulating {} ticks, {} units, {} connections",
        ticks, unit_count, connection_count
    );

    for tick in 0..ticks {
        clock.tick_start();

        let observers: Vec<Vec3> = units
            .iter()
            .filter(|u| u.kind == UnitKind::Observer)
            .map(|u| u.position)
            .collect();

        let skip_factor = load.skip_factor();
        let mut processed = 0u64;
        let mut skipped = 0u64;

        // Collect the ids that run this tick into pooled scratch
        let ran: Vec<UnitId> = with_thread_arena(&config.pools, |arena| {
            let mut ran = arena.unit_lists.acquire();
            for unit in units.iter() {
                let dist_sq = nearest_observer_dist_sq(unit, &observers);
                if should_process(unit, tick, skip_factor, &scheduler, dist_sq) {
                    ran.push(unit.id);
                } else {
                    skipped += 1;
                }
            }
            ran.clone()
        });

        for &id in &ran {
            let unit = &mut units[id as usize];
            unit.position += velocities[id as usize] * 0.05;
            processed += 1;
        }

        // Synthetic load spike so the controller has something to shed
        if (300..320).contains(&(tick % 600)) {
            std::thread::sleep(Duration::from_millis(60));
        }

        // Outbound updates, delta-reduced per connection
        for conn in connections.iter_mut() {
            for &id in &ran {
                let unit = &units[id as usize];
                let yaw = (tick as f32 * 3.0 + id as f32) % 360.0 - 180.0;

                let (last_pos, last_yaw, last_pitch) = conn
                    .last_sent
                    .get(&id)
                    .copied()
                    .unwrap_or((unit.position, 0.0, 0.0));

                let delta = encode_position_delta(last_pos, unit.position);
                let update = UnitUpdate {
                    id,
                    delta,
                    absolute: if delta.is_none() {
                        Some((unit.position.x, unit.position.y, unit.position.z))
                    } else {
                        None
                    },
                    rotation: encode_rotation_delta(last_yaw, last_pitch, yaw, 0.0, 2.0),
                };
                conn.last_sent.insert(id, (unit.position, yaw, 0.0));

                let payload = bincode::serde::encode_to_vec(&update, encode_cfg)?;
                if let Err(err) = conn.shaper.submit(MessageClass::UnitUpdate, payload) {
                    reporter.handle("unit update", &err);
                }
            }

            // A handful of world-cell changes; only genuinely new states
            // survive the delta tracker
            for _ in 0..4 {
                let pos = GridPos::new(rng.gen_range(-64..64), 64, rng.gen_range(-64..64));
                let state = rng.gen_range(0..8u64);
                if conn.cells.has_changed(pos, state) {
                    let payload =
                        bincode::serde::encode_to_vec((pos.as_key(), state), encode_cfg)?;
                    if let Err(err) = conn.shaper.submit(MessageClass::CellUpdate, payload) {
                        reporter.handle("cell update", &err);
                    }
                }
            }

            // Periodic bulk sync, big enough to compress
            if tick % 100 == 99 {
                let sync = RegionSync {
                    cells: (0..128).map(|i| (i as u64, (i % 8) as u64)).collect(),
                };
                let payload = bincode::serde::encode_to_vec(&sync, encode_cfg)?;
                if let Err(err) = conn.shaper.submit(MessageClass::Generic, payload) {
                    reporter.handle("region sync", &err);
                }
            }

            // End of tick: everything buffered goes out
            if let Err(err) = conn.shaper.flush() {
                reporter.handle("flush", &err);
            }
        }

        // Heap usage follows tracked delta state
        let tracked: usize = connections.iter().map(|c| c.cells.tracked_count()).sum();
        probe.set_used((tracked as u64) * 64 * 1024 + 64 * 1024 * 1024);
        if guard.should_suggest_cleanup() {
            guard.perform_cleanup(|| {
                for conn in connections.iter_mut() {
                    conn.cells.clear();
                }
            });
        }

        #[cfg(feature = "offload")]
        if tick % 50 == 49 {
            offloader.submit(|| {
                // Stand-in for persistence work that must not block the tick
                std::thread::sleep(Duration::from_millis(2));
            });
        }

        if let Some(duration) = clock.tick_end(&load) {
            use std::sync::atomic::Ordering;
            metrics.record_tick_time(duration);
            metrics.skip_factor.store(skip_factor as u64, Ordering::Relaxed);
            metrics
                .average_mspt_x100
                .store((clock.average_mspt() * 100.0) as u64, Ordering::Relaxed);
            metrics
                .current_tps_x100
                .store((clock.current_tps() * 100.0) as u64, Ordering::Relaxed);
            metrics.units_total.store(units.len() as u64, Ordering::Relaxed);
            metrics.units_processed.fetch_add(processed, Ordering::Relaxed);
            metrics.units_skipped.fetch_add(skipped, Ordering::Relaxed);
            metrics
                .bytes_sent
                .store(meter.total_bytes_sent(), Ordering::Relaxed);
            metrics.upload_bps.store(meter.upload_bps(), Ordering::Relaxed);
            metrics
                .heap_usage_percent
                .store((guard.usage() * 100.0) as u64, Ordering::Relaxed);

            let shaped: u64 = connections.iter().map(|c| c.shaper.stats().messages_sent).sum();
            let throttled: u64 = connections
                .iter()
                .map(|c| c.shaper.stats().messages_throttled)
                .sum();
            let saved: u64 = connections.iter().map(|c| c.shaper.stats().bytes_saved).sum();
            metrics.messages_sent.store(shaped, Ordering::Relaxed);
            metrics.messages_throttled.store(throttled, Ordering::Relaxed);
            metrics
                .compression_bytes_saved
                .store(saved, Ordering::Relaxed);

            #[cfg(feature = "offload")]
            {
                metrics
                    .offload_submitted
                    .store(offloader.total_submitted(), Ordering::Relaxed);
                metrics
                    .offload_completed
                    .store(offloader.total_completed(), Ordering::Relaxed);
            }

            if tick % 100 == 99 {
                info!(
                    "tick {}: {:.1} tps, {:.1}ms avg, skip x{}, ran {}/{} units, {}",
                    tick + 1,
                    clock.current_tps(),
                    clock.average_mspt(),
                    skip_factor,
                    processed,
                    processed + skipped,
                    meter.stats()
                );
                reporter.flush_repeats();
            }

            std::thread::sleep(clock.recommended_sleep(duration));
        }
    }

    let pool_stats = with_thread_arena(&config.pools, |arena| arena.stats());
    info!(
        "done: {} ticks, {:.1} avg mspt, pool {} hits / {} misses, {}",
        clock.total_ticks(),
        clock.average_mspt(),
        pool_stats.hits,
        pool_stats.misses,
        guard.status()
    );
    for conn in &connections {
        let stats = conn.shaper.stats();
        info!(
            "connection {}: {} msgs in {} flushes, {} throttled ({:.0}%), {} saved by compression",
            conn.shaper.connection_id(),
            conn.shaper.transport().messages,
            conn.shaper.transport().flushes,
            stats.messages_throttled,
            stats.throttle_rate * 100.0,
            stats.bytes_saved
        );
    }
    #[cfg(feature = "offload")]
    {
        info!("offloader: {}", offloader.status());
        offloader.disable();
    }

    Ok(())
}
