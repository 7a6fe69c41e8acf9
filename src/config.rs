//! Runtime configuration for every shedding and shaping component.
//!
//! All thresholds, pool sizes, cooldowns and toggles live in one plain
//! structure supplied at initialization. Hot reload is re-supplying the
//! structure; nothing here is parsed from disk.

use serde::{Deserialize, Serialize};

/// Tick timing and adaptive skip-factor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    pub enabled: bool,
    /// Target milliseconds per tick (50 = 20 ticks per second).
    pub target_mspt: u64,
    /// Duration above which light throttling starts.
    pub warning_mspt: u64,
    /// Duration above which heavy throttling starts.
    pub critical_mspt: u64,
    /// Upper bound for the skip factor ladder.
    pub max_skip_factor: u32,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_mspt: 50,
            warning_mspt: 45,
            critical_mspt: 55,
            max_skip_factor: 4,
        }
    }
}

/// Distance-based tick frequency bands, in world units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CullingConfig {
    pub enabled: bool,
    /// Units within this distance run every tick.
    pub full_tick_distance: f64,
    /// Units within this distance run every 2 ticks.
    pub half_tick_distance: f64,
    /// Units within this distance run every 4 ticks; beyond, every 8.
    pub quarter_tick_distance: f64,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            full_tick_distance: 32.0,
            half_tick_distance: 64.0,
            quarter_tick_distance: 96.0,
        }
    }
}

/// Per-thread object pool capacities and retention ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub enabled: bool,
    pub vec3_pool_size: usize,
    pub aabb_pool_size: usize,
    pub grid_pos_pool_size: usize,
    pub list_pool_size: usize,
    pub map_pool_size: usize,
    pub set_pool_size: usize,
    pub string_pool_size: usize,
    /// Lists retaining more capacity than this are discarded on release.
    pub list_retain_capacity: usize,
    /// Maps/sets retaining more capacity than this are discarded on release.
    pub map_retain_capacity: usize,
    /// String buffers above this capacity are discarded on release.
    pub string_retain_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vec3_pool_size: 256,
            aabb_pool_size: 256,
            grid_pos_pool_size: 128,
            list_pool_size: 64,
            map_pool_size: 32,
            set_pool_size: 32,
            string_pool_size: 32,
            list_retain_capacity: 256,
            map_retain_capacity: 1024,
            string_retain_capacity: 8192,
        }
    }
}

/// Outbound compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Minimum payload size in bytes before compression is attempted.
    pub threshold: usize,
    /// Deflate level, 1 (fastest) to 9 (smallest).
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 256,
            level: 1,
        }
    }
}

/// Per-message-class send cooldowns, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub default_cooldown_ms: u64,
    pub unit_update_cooldown_ms: u64,
    pub cell_update_cooldown_ms: u64,
    pub chat_cooldown_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_cooldown_ms: 50,
            unit_update_cooldown_ms: 50,
            cell_update_cooldown_ms: 25,
            chat_cooldown_ms: 100,
        }
    }
}

/// Outbound message batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub enabled: bool,
    /// Buffered messages that force a flush before the end of the tick.
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 64,
        }
    }
}

/// Bandwidth accounting and advisory caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthConfig {
    pub track_usage: bool,
    /// Maximum upload rate in bytes per second (0 = unlimited).
    pub max_upload_bps: u64,
    /// Maximum download rate in bytes per second (0 = unlimited).
    pub max_download_bps: u64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            track_usage: true,
            max_upload_bps: 0,
            max_download_bps: 0,
        }
    }
}

/// Heap monitoring thresholds, as fractions of the maximum heap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub cleanup_threshold: f64,
    pub cleanup_cooldown_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 0.70,
            critical_threshold: 0.85,
            cleanup_threshold: 0.90,
            cleanup_cooldown_secs: 30,
        }
    }
}

/// Off-thread task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadConfig {
    pub enabled: bool,
    /// Worker threads (0 = one per CPU core).
    pub threads: usize,
    /// Pending tasks before submitters run work themselves.
    pub queue_capacity: usize,
    /// Grace period for in-flight work when disabling, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threads: 0,
            queue_capacity: 1024,
            shutdown_grace_secs: 5,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub tick: TickConfig,
    pub culling: CullingConfig,
    pub pools: PoolConfig,
    pub compression: CompressionConfig,
    pub throttle: ThrottleConfig,
    pub batching: BatchConfig,
    pub bandwidth: BandwidthConfig,
    pub memory: MemoryConfig,
    pub offload: OffloadConfig,
}

impl Config {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(mspt) = std::env::var("TARGET_MSPT") {
            if let Ok(parsed) = mspt.parse::<u64>() {
                if parsed > 0 {
                    config.tick.target_mspt = parsed;
                } else {
                    tracing::warn!("TARGET_MSPT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid TARGET_MSPT '{}', using default", mspt);
            }
        }

        if let Ok(factor) = std::env::var("MAX_SKIP_FACTOR") {
            if let Ok(parsed) = factor.parse::<u32>() {
                if (1..=16).contains(&parsed) {
                    config.tick.max_skip_factor = parsed;
                } else {
                    tracing::warn!("MAX_SKIP_FACTOR must be 1-16, using default");
                }
            } else {
                tracing::warn!("Invalid MAX_SKIP_FACTOR '{}', using default", factor);
            }
        }

        if let Ok(threshold) = std::env::var("COMPRESSION_THRESHOLD") {
            if let Ok(parsed) = threshold.parse::<usize>() {
                config.compression.threshold = parsed;
            } else {
                tracing::warn!(
                    "Invalid COMPRESSION_THRESHOLD '{}', using default",
                    threshold
                );
            }
        }

        if let Ok(threads) = std::env::var("OFFLOAD_THREADS") {
            if let Ok(parsed) = threads.parse::<usize>() {
                config.offload.threads = parsed;
                config.offload.enabled = parsed > 0;
            } else {
                tracing::warn!("Invalid OFFLOAD_THREADS '{}', using default", threads);
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tick.target_mspt == 0 {
            return Err("tick.target_mspt must be at least 1".to_string());
        }
        if self.tick.warning_mspt >= self.tick.critical_mspt {
            return Err("tick.warning_mspt must be below tick.critical_mspt".to_string());
        }
        if self.tick.max_skip_factor < 1 {
            return Err("tick.max_skip_factor must be at least 1".to_string());
        }
        if self.culling.full_tick_distance > self.culling.half_tick_distance
            || self.culling.half_tick_distance > self.culling.quarter_tick_distance
        {
            return Err("culling distances must be non-decreasing".to_string());
        }
        if self.compression.level < 1 || self.compression.level > 9 {
            return Err("compression.level must be 1-9".to_string());
        }
        if self.batching.max_batch_size == 0 {
            return Err("batching.max_batch_size must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.memory.warning_threshold)
            || !(0.0..=1.0).contains(&self.memory.critical_threshold)
            || !(0.0..=1.0).contains(&self.memory.cleanup_threshold)
        {
            return Err("memory thresholds must be within 0.0-1.0".to_string());
        }
        if self.memory.warning_threshold > self.memory.critical_threshold
            || self.memory.critical_threshold > self.memory.cleanup_threshold
        {
            return Err("memory thresholds must be non-decreasing".to_string());
        }
        if self.offload.queue_capacity == 0 {
            return Err("offload.queue_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tick.target_mspt, 50);
        assert_eq!(config.tick.warning_mspt, 45);
        assert_eq!(config.tick.critical_mspt, 55);
        assert_eq!(config.tick.max_skip_factor, 4);
        assert_eq!(config.compression.threshold, 256);
        assert_eq!(config.batching.max_batch_size, 64);
        assert_eq!(config.throttle.cell_update_cooldown_ms, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_mspt_thresholds() {
        let mut config = Config::default();
        config.tick.warning_mspt = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_memory_levels() {
        let mut config = Config::default();
        config.memory.critical_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.memory.warning_threshold = 0.95;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_culling_bands() {
        let mut config = Config::default();
        config.culling.half_tick_distance = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = Config::default();
        let encoded = bincode::serde::encode_to_vec(&config, bincode::config::standard()).unwrap();
        let (decoded, _): (Config, usize) =
            bincode::serde::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(decoded.tick.target_mspt, config.tick.target_mspt);
        assert_eq!(decoded.pools.list_retain_capacity, config.pools.list_retain_capacity);
    }
}
