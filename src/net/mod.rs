//! Per-connection traffic shaping: throttling, batching, compression and
//! delta encoding, with global bandwidth accounting.
//!
//! Pipeline order for outbound data, per connection:
//! delta reduction (caller) -> throttle -> batch -> compress -> transport.

pub mod bandwidth;
pub mod batch;
pub mod compress;
pub mod delta;
pub mod shaper;
pub mod throttle;

pub use bandwidth::BandwidthMeter;
pub use batch::{Batcher, Transport};
pub use compress::Compressor;
pub use delta::DeltaTracker;
pub use shaper::{ConnectionShaper, Submit};
pub use throttle::{MessageClass, Throttler};

/// Errors raised inside the shaping pipeline.
///
/// All of these are local to a single message or connection; none of them
/// indicate a fault in the shaping layer itself.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The inflated payload did not match its declared length. The message
    /// is dropped; the connection continues.
    #[error("decompressed length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The compressed payload ended before the stream did.
    #[error("incomplete deflate stream")]
    TruncatedStream,

    #[error("deflate error: {0}")]
    Compress(#[from] flate2::CompressError),

    #[error("inflate error: {0}")]
    Decompress(#[from] flate2::DecompressError),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
