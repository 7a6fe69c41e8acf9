//! Payload compression with reusable deflate contexts.
//!
//! A `Compressor` owns its deflate/inflate state and scratch buffer and is
//! confined to whatever context owns it (one per connection). Compression is
//! opportunistic: small payloads and payloads that do not shrink are sent
//! raw, signalled by `None` rather than an error.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::config::CompressionConfig;
use crate::net::NetError;

/// Initial scratch capacity; grows with the largest payload seen.
const SCRATCH_CAPACITY: usize = 8192;

/// Room reserved per output pass when the scratch fills up.
const GROW_STEP: usize = 512;

pub struct Compressor {
    enabled: bool,
    threshold: usize,
    deflate: Compress,
    inflate: Decompress,
    scratch: Vec<u8>,
}

impl Compressor {
    pub fn new(config: &CompressionConfig) -> Self {
        Self {
            enabled: config.enabled,
            threshold: config.threshold,
            deflate: Compress::new(Compression::new(config.level), true),
            inflate: Decompress::new(true),
            scratch: Vec::with_capacity(SCRATCH_CAPACITY),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Compress `data` if it is worth it.
    ///
    /// Returns `None` when the payload is below the threshold or does not
    /// get strictly shorter; the caller sends the raw bytes instead. The
    /// returned slice borrows the internal scratch buffer and is valid until
    /// the next call.
    pub fn compress(&mut self, data: &[u8]) -> Result<Option<&[u8]>, NetError> {
        if !self.enabled || data.len() < self.threshold {
            return Ok(None);
        }

        self.deflate.reset();
        self.scratch.clear();

        loop {
            if self.scratch.len() == self.scratch.capacity() {
                self.scratch.reserve(GROW_STEP);
            }
            let consumed = self.deflate.total_in() as usize;
            let status =
                self.deflate
                    .compress_vec(&data[consumed..], &mut self.scratch, FlushCompress::Finish)?;

            // Bail as soon as the output stops being a win
            if self.scratch.len() >= data.len() {
                return Ok(None);
            }
            if status == Status::StreamEnd {
                break;
            }
        }

        Ok(Some(self.scratch.as_slice()))
    }

    /// Inflate `data`, which must expand to exactly `expected_len` bytes.
    ///
    /// A mismatch fails only this message; the compressor stays usable.
    pub fn decompress(&mut self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, NetError> {
        self.inflate.reset(true);
        let mut out = Vec::with_capacity(expected_len);

        loop {
            let consumed = self.inflate.total_in() as usize;
            let before_out = out.len();
            let status =
                self.inflate
                    .decompress_vec(&data[consumed..], &mut out, FlushDecompress::Finish)?;

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    if out.len() > expected_len {
                        // Already longer than declared; stop inflating
                        break;
                    }
                    if out.len() == out.capacity() {
                        out.reserve(GROW_STEP);
                    } else if self.inflate.total_in() as usize == consumed
                        && out.len() == before_out
                    {
                        // No progress on either side: the stream is cut short
                        return Err(NetError::TruncatedStream);
                    }
                }
            }
        }

        if out.len() != expected_len {
            return Err(NetError::LengthMismatch {
                expected: expected_len,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("enabled", &self.enabled)
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// Fraction of the original size removed by compression.
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    1.0 - (compressed as f64 / original as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressor() -> Compressor {
        Compressor::new(&CompressionConfig::default())
    }

    /// Deterministic noise that deflate cannot shrink.
    fn noise(len: usize) -> Vec<u8> {
        let mut state: u32 = 0x2545_f491;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn test_below_threshold_sends_raw() {
        let mut c = compressor();
        let data = vec![0u8; 255];
        assert!(c.compress(&data).unwrap().is_none());
    }

    #[test]
    fn test_incompressible_payload_sends_raw() {
        let mut c = compressor();
        let data = noise(300);
        assert!(c.compress(&data).unwrap().is_none());
    }

    #[test]
    fn test_compressible_payload_shrinks() {
        let mut c = compressor();
        let data = vec![0u8; 1000];
        let compressed = c.compress(&data).unwrap().expect("should compress");
        assert!(compressed.len() < 1000);
    }

    #[test]
    fn test_round_trip() {
        let mut c = compressor();
        let data: Vec<u8> = (0..2000).map(|i| (i % 7) as u8).collect();
        let compressed = c.compress(&data).unwrap().unwrap().to_vec();
        let restored = c.decompress(&compressed, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_context_is_reusable() {
        let mut c = compressor();
        for round in 0..5 {
            let data = vec![round as u8; 600];
            let compressed = c.compress(&data).unwrap().unwrap().to_vec();
            assert_eq!(c.decompress(&compressed, 600).unwrap(), data);
        }
    }

    #[test]
    fn test_length_mismatch_is_detected() {
        let mut c = compressor();
        let data = vec![7u8; 1000];
        let compressed = c.compress(&data).unwrap().unwrap().to_vec();

        let err = c.decompress(&compressed, 500).unwrap_err();
        assert!(matches!(
            err,
            NetError::LengthMismatch {
                expected: 500,
                actual: 1000
            }
        ));

        let err = c.decompress(&compressed, 2000).unwrap_err();
        assert!(matches!(err, NetError::LengthMismatch { .. }));
    }

    #[test]
    fn test_failure_is_local_to_one_message() {
        let mut c = compressor();
        let data = vec![7u8; 1000];
        let compressed = c.compress(&data).unwrap().unwrap().to_vec();
        assert!(c.decompress(&compressed, 500).is_err());
        // The same context still handles the next message
        assert_eq!(c.decompress(&compressed, 1000).unwrap(), data);
    }

    #[test]
    fn test_truncated_stream_is_detected() {
        let mut c = compressor();
        let data = vec![3u8; 1000];
        let compressed = c.compress(&data).unwrap().unwrap().to_vec();
        let cut = &compressed[..compressed.len() / 2];
        assert!(c.decompress(cut, 1000).is_err());
    }

    #[test]
    fn test_disabled_compression_sends_raw() {
        let config = CompressionConfig {
            enabled: false,
            ..CompressionConfig::default()
        };
        let mut c = Compressor::new(&config);
        let data = vec![0u8; 4096];
        assert!(c.compress(&data).unwrap().is_none());
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(1000, 250), 0.75);
        assert_eq!(compression_ratio(0, 0), 0.0);
    }
}
