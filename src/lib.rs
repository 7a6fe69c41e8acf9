//! Adaptive load shedding and traffic shaping for a fixed-rate tick loop.
//!
//! Keeps per-tick wall-clock cost under budget by skipping low-priority
//! work when the simulation falls behind, and keeps bandwidth down with a
//! per-connection throttle/batch/compress pipeline plus delta encoding.
//!
//! # Features
//!
//! - `offload` - Bounded worker pool for moving work off the tick thread (enabled by default)
//! - `minimal` - Build without optional features for testing/debugging

pub mod config;
pub mod error;
pub mod mem;
pub mod metrics;
pub mod net;
pub mod pool;
pub mod sim;
pub mod util;

// Feature-gated modules (enabled by default)
#[cfg(feature = "offload")]
pub mod offload;
