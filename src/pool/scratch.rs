//! Per-thread arenas of pre-configured pools for the value kinds the hot
//! paths churn through: vectors, boxes, grid positions and transient
//! collections.

use std::cell::OnceCell;

use hashbrown::{HashMap, HashSet};

use crate::config::PoolConfig;
use crate::pool::Pool;
use crate::sim::unit::UnitId;
use crate::util::aabb::Aabb;
use crate::util::grid::GridPos;
use crate::util::vec3::Vec3;

/// Aggregate counters across every pool in an arena.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    pub hits: u64,
    pub misses: u64,
    pub retained: usize,
}

/// One worker thread's set of pools.
///
/// Constructed lazily per thread through [`with_thread_arena`], or directly
/// for workers that manage their own context. Like the pools it holds, an
/// arena never crosses threads.
pub struct ScratchArena {
    pub vec3: Pool<Vec3>,
    pub aabb: Pool<Aabb>,
    pub grid: Pool<GridPos>,
    pub unit_lists: Pool<Vec<UnitId>>,
    pub byte_bufs: Pool<Vec<u8>>,
    pub key_sets: Pool<HashSet<u64>>,
    pub key_maps: Pool<HashMap<u64, u64>>,
    pub strings: Pool<String>,
}

impl ScratchArena {
    pub fn new(config: &PoolConfig) -> Self {
        // Disabled pooling degrades to plain allocation: zero-capacity
        // pools construct on acquire and discard on release.
        let cap = |size: usize| if config.enabled { size } else { 0 };

        let list_retain = config.list_retain_capacity;
        let map_retain = config.map_retain_capacity;
        let string_retain = config.string_retain_capacity;

        Self {
            vec3: Pool::new(cap(config.vec3_pool_size), || Vec3::ZERO),
            aabb: Pool::new(cap(config.aabb_pool_size), Aabb::default),
            grid: Pool::new(cap(config.grid_pos_pool_size), GridPos::default),
            unit_lists: Pool::with_recycle(cap(config.list_pool_size), Vec::new, move |list| {
                list.clear();
                list.capacity() <= list_retain
            }),
            byte_bufs: Pool::with_recycle(cap(config.list_pool_size), Vec::new, move |buf| {
                buf.clear();
                buf.capacity() <= string_retain
            }),
            key_sets: Pool::with_recycle(cap(config.set_pool_size), HashSet::new, move |set| {
                set.clear();
                set.capacity() <= map_retain
            }),
            key_maps: Pool::with_recycle(cap(config.map_pool_size), HashMap::new, move |map| {
                map.clear();
                map.capacity() <= map_retain
            }),
            strings: Pool::with_recycle(cap(config.string_pool_size), String::new, move |s| {
                s.clear();
                s.capacity() <= string_retain
            }),
        }
    }

    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats::default();
        macro_rules! add {
            ($pool:expr) => {
                stats.hits += $pool.hits();
                stats.misses += $pool.misses();
                stats.retained += $pool.retained();
            };
        }
        add!(self.vec3);
        add!(self.aabb);
        add!(self.grid);
        add!(self.unit_lists);
        add!(self.byte_bufs);
        add!(self.key_sets);
        add!(self.key_maps);
        add!(self.strings);
        stats
    }
}

thread_local! {
    static THREAD_ARENA: OnceCell<ScratchArena> = const { OnceCell::new() };
}

/// Run `f` with the calling thread's arena, constructing it from `config`
/// on first use. Later calls on the same thread keep the original arena;
/// a config change only applies to threads that have not built one yet.
pub fn with_thread_arena<R>(config: &PoolConfig, f: impl FnOnce(&ScratchArena) -> R) -> R {
    THREAD_ARENA.with(|cell| f(cell.get_or_init(|| ScratchArena::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_pools_round_trip() {
        let arena = ScratchArena::new(&PoolConfig::default());
        {
            let mut v = arena.vec3.acquire();
            v.set(1.0, 2.0, 3.0);
            let mut list = arena.unit_lists.acquire();
            list.push(7);
        }
        assert_eq!(arena.vec3.retained(), 1);
        assert_eq!(arena.unit_lists.retained(), 1);

        // Vec3 keeps stale contents; the list comes back cleared
        let v = arena.vec3.acquire();
        assert_eq!(*v, Vec3::new(1.0, 2.0, 3.0));
        let list = arena.unit_lists.acquire();
        assert!(list.is_empty());
    }

    #[test]
    fn test_oversized_list_is_discarded() {
        let config = PoolConfig::default();
        let arena = ScratchArena::new(&config);
        {
            let mut list = arena.unit_lists.acquire();
            list.reserve(config.list_retain_capacity + 1);
        }
        assert_eq!(arena.unit_lists.retained(), 0);
    }

    #[test]
    fn test_oversized_string_is_discarded() {
        let config = PoolConfig::default();
        let arena = ScratchArena::new(&config);
        {
            let mut s = arena.strings.acquire();
            s.reserve(config.string_retain_capacity + 1);
        }
        assert_eq!(arena.strings.retained(), 0);
    }

    #[test]
    fn test_disabled_pooling_never_retains() {
        let config = PoolConfig {
            enabled: false,
            ..PoolConfig::default()
        };
        let arena = ScratchArena::new(&config);
        {
            let _v = arena.vec3.acquire();
            let _m = arena.key_maps.acquire();
        }
        assert_eq!(arena.stats().retained, 0);
    }

    #[test]
    fn test_thread_arena_is_reused() {
        let config = PoolConfig::default();
        with_thread_arena(&config, |arena| {
            let _v = arena.vec3.acquire();
        });
        let hits = with_thread_arena(&config, |arena| {
            let _v = arena.vec3.acquire();
            arena.vec3.hits()
        });
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_each_thread_gets_its_own_arena() {
        let config = PoolConfig::default();
        with_thread_arena(&config, |arena| {
            let _v = arena.vec3.acquire();
        });

        let handle = std::thread::spawn(move || {
            let config = PoolConfig::default();
            with_thread_arena(&config, |arena| (arena.vec3.hits(), arena.vec3.misses()))
        });
        let (hits, misses) = handle.join().unwrap();
        // Fresh thread, fresh arena: first acquire is a miss
        assert_eq!(hits, 0);
        assert_eq!(misses, 1);
    }

    #[test]
    fn test_stats_aggregate() {
        let arena = ScratchArena::new(&PoolConfig::default());
        {
            let _a = arena.vec3.acquire();
            let _b = arena.aabb.acquire();
        }
        let stats = arena.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.retained, 2);
    }
}
