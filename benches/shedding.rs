//! Shedding-path benchmarks
//!
//! Measures the per-tick hot paths (classification, distance gating, delta
//! encoding, pooling) at various unit counts.
//!
//! Run with: cargo bench --bench shedding

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;

use tickshed::config::{CullingConfig, PoolConfig};
use tickshed::net::delta::{encode_position_delta, DeltaTracker};
use tickshed::pool::ScratchArena;
use tickshed::sim::distance::{nearest_observer_dist_sq, DistanceScheduler};
use tickshed::sim::priority;
use tickshed::sim::unit::{UnitKind, WorkUnit};
use tickshed::util::grid::GridPos;
use tickshed::util::vec3::Vec3;

/// Create a world with the specified number of randomly distributed units
fn create_units(count: usize) -> (Vec<WorkUnit>, Vec<Vec3>) {
    let mut rng = rand::thread_rng();
    let mut units = Vec::with_capacity(count);

    for i in 0..count {
        let kind = match i % 10 {
            0 => UnitKind::Hostile,
            1 => UnitKind::Projectile,
            2 => UnitKind::ItemDrop,
            _ => UnitKind::Passive,
        };
        let position = Vec3::new(
            rng.gen_range(-200.0..200.0),
            rng.gen_range(0.0..64.0),
            rng.gen_range(-200.0..200.0),
        );
        units.push(WorkUnit::new(i as u32, kind, position));
    }

    let observers = (0..8)
        .map(|_| {
            Vec3::new(
                rng.gen_range(-100.0..100.0),
                64.0,
                rng.gen_range(-100.0..100.0),
            )
        })
        .collect();

    (units, observers)
}

/// Benchmark the combined admission gates at various unit counts
fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    group.sample_size(50);

    let scheduler = DistanceScheduler::new(&CullingConfig::default());

    for count in [250, 500, 1000, 2000] {
        let (units, observers) = create_units(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("both_gates", count), &count, |b, _| {
            let mut tick = 0u64;
            b.iter(|| {
                tick += 1;
                let mut ran = 0usize;
                for unit in &units {
                    let dist_sq = nearest_observer_dist_sq(unit, &observers);
                    if priority::should_run(unit, tick, 4) {
                        let freq = scheduler.frequency(unit, dist_sq);
                        if scheduler.should_run(unit, tick, freq) {
                            ran += 1;
                        }
                    }
                }
                black_box(ran)
            })
        });
    }
    group.finish();
}

/// Benchmark delta encoding and change tracking
fn bench_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta");
    group.sample_size(50);

    for count in [500, 1000, 2000] {
        let mut rng = rand::thread_rng();
        let moves: Vec<(Vec3, Vec3)> = (0..count)
            .map(|_| {
                let from = Vec3::new(
                    rng.gen_range(-100.0..100.0),
                    0.0,
                    rng.gen_range(-100.0..100.0),
                );
                let to = from + Vec3::new(rng.gen_range(-1.0..1.0), 0.0, rng.gen_range(-1.0..1.0));
                (from, to)
            })
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("position", count), &count, |b, _| {
            b.iter(|| {
                let mut encoded = 0usize;
                for &(from, to) in &moves {
                    if encode_position_delta(from, to).is_some() {
                        encoded += 1;
                    }
                }
                black_box(encoded)
            })
        });

        group.bench_with_input(BenchmarkId::new("tracking", count), &count, |b, _| {
            let mut tracker: DeltaTracker<u64> = DeltaTracker::new();
            let mut state = 0u64;
            b.iter(|| {
                state += 1;
                let mut changed = 0usize;
                for i in 0..count {
                    let pos = GridPos::new(i as i32 % 64, 0, i as i32 / 64);
                    if tracker.has_changed(pos, state % 4) {
                        changed += 1;
                    }
                }
                black_box(changed)
            })
        });
    }
    group.finish();
}

/// Benchmark pooled scratch acquisition against plain allocation
fn bench_pooling(c: &mut Criterion) {
    let mut group = c.benchmark_group("pooling");
    group.sample_size(50);

    let arena = ScratchArena::new(&PoolConfig::default());

    group.bench_function("pooled_list", |b| {
        b.iter(|| {
            let mut list = arena.unit_lists.acquire();
            for i in 0..128u32 {
                list.push(i);
            }
            black_box(list.len())
        })
    });

    group.bench_function("fresh_list", |b| {
        b.iter(|| {
            let mut list: Vec<u32> = Vec::new();
            for i in 0..128u32 {
                list.push(i);
            }
            black_box(list.len())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_admission, bench_delta, bench_pooling);
criterion_main!(benches);
