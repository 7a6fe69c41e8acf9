//! Per-connection shaping pipeline: throttle -> batch -> compress ->
//! transport.
//!
//! A `ConnectionShaper` is owned by its connection and driven only from that
//! connection's execution context, so outbound order needs no locking.
//! Different connections' shapers are fully independent.

use std::sync::Arc;

use crate::config::Config;
use crate::net::bandwidth::BandwidthMeter;
use crate::net::batch::{Batcher, Transport};
use crate::net::compress::Compressor;
use crate::net::throttle::{MessageClass, Throttler};
use crate::net::NetError;

/// What happened to a submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    /// Buffered; will go out on the next flush.
    Queued,
    /// Buffering it filled the batch, which was flushed (`n` messages).
    Flushed(usize),
    /// Suppressed by the rate limiter.
    Throttled,
}

/// Counters for one connection's pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShaperStats {
    pub messages_sent: u64,
    pub messages_throttled: u64,
    pub batches_flushed: u64,
    pub bytes_out: u64,
    /// Bytes removed by compression across all sent messages.
    pub bytes_saved: u64,
    pub throttle_rate: f64,
}

/// Outbound pipeline state for one connection.
pub struct ConnectionShaper<T: Transport> {
    connection_id: u64,
    throttler: Throttler,
    batcher: Batcher,
    compressor: Compressor,
    transport: T,
    meter: Arc<BandwidthMeter>,
    messages_sent: u64,
    batches_flushed: u64,
    bytes_out: u64,
    bytes_saved: u64,
}

impl<T: Transport> ConnectionShaper<T> {
    pub fn new(connection_id: u64, config: &Config, transport: T, meter: Arc<BandwidthMeter>) -> Self {
        Self {
            connection_id,
            throttler: Throttler::new(&config.throttle),
            batcher: Batcher::new(&config.batching),
            compressor: Compressor::new(&config.compression),
            transport,
            meter,
            messages_sent: 0,
            batches_flushed: 0,
            bytes_out: 0,
            bytes_saved: 0,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Offer a message to the pipeline. Throttled messages are dropped;
    /// everything else is buffered, flushing if the batch fills up.
    pub fn submit(&mut self, class: MessageClass, payload: Vec<u8>) -> Result<Submit, NetError> {
        if !self.throttler.should_send(class) {
            return Ok(Submit::Throttled);
        }

        if self.batcher.push(payload) {
            let written = self.flush()?;
            return Ok(Submit::Flushed(written));
        }
        Ok(Submit::Queued)
    }

    /// Write out everything buffered, compressing each message that
    /// benefits. Call at the end of every tick. Returns messages written.
    pub fn flush(&mut self) -> Result<usize, NetError> {
        let pending = self.batcher.take_pending();
        if pending.is_empty() {
            return Ok(0);
        }

        let count = pending.len();
        for (index, message) in pending.iter().enumerate() {
            let wire_len = match self.compressor.compress(message)? {
                Some(compressed) => {
                    let len = compressed.len();
                    self.transport.send(compressed)?;
                    self.bytes_saved += (message.len() - len) as u64;
                    len
                }
                None => {
                    self.transport.send(message)?;
                    message.len()
                }
            };

            self.meter.record_sent(wire_len as u64);
            self.bytes_out += wire_len as u64;
            self.messages_sent += 1;

            if index + 1 == count {
                self.transport.flush()?;
            }
        }

        self.batches_flushed += 1;
        Ok(count)
    }

    /// Decode one inbound payload that was compressed to `expected_len`
    /// bytes. Errors are local to this message.
    pub fn receive(&mut self, payload: &[u8], expected_len: usize) -> Result<Vec<u8>, NetError> {
        self.meter.record_received(payload.len() as u64);
        self.compressor.decompress(payload, expected_len)
    }

    pub fn pending_messages(&self) -> usize {
        self.batcher.len()
    }

    pub fn stats(&self) -> ShaperStats {
        ShaperStats {
            messages_sent: self.messages_sent,
            messages_throttled: self.throttler.total_suppressed(),
            batches_flushed: self.batches_flushed,
            bytes_out: self.bytes_out,
            bytes_saved: self.bytes_saved,
            throttle_rate: self.throttler.throttle_rate(),
        }
    }

    pub fn throttler_mut(&mut self) -> &mut Throttler {
        &mut self.throttler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BandwidthConfig, Config};
    use std::time::Duration;

    /// Transport capturing each send and the flush positions.
    #[derive(Default)]
    struct SinkTransport {
        sends: Vec<Vec<u8>>,
        flushes: usize,
    }

    impl Transport for SinkTransport {
        fn send(&mut self, payload: &[u8]) -> std::io::Result<()> {
            self.sends.push(payload.to_vec());
            Ok(())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    fn shaper() -> ConnectionShaper<SinkTransport> {
        let meter = Arc::new(BandwidthMeter::new(&BandwidthConfig::default()));
        let mut config = Config::default();
        // Keep unit tests deterministic: no wall-clock throttling
        config.throttle.enabled = false;
        ConnectionShaper::new(1, &config, SinkTransport::default(), meter)
    }

    #[test]
    fn test_small_messages_queue_until_flush() {
        let mut s = shaper();
        assert_eq!(
            s.submit(MessageClass::Generic, vec![1, 2, 3]).unwrap(),
            Submit::Queued
        );
        assert_eq!(s.pending_messages(), 1);
        assert_eq!(s.transport().sends.len(), 0);

        assert_eq!(s.flush().unwrap(), 1);
        assert_eq!(s.transport().sends.len(), 1);
        assert_eq!(s.transport().flushes, 1);
    }

    #[test]
    fn test_full_batch_auto_flushes() {
        let meter = Arc::new(BandwidthMeter::new(&BandwidthConfig::default()));
        let mut config = Config::default();
        config.throttle.enabled = false;
        config.batching.max_batch_size = 2;
        let mut s = ConnectionShaper::new(1, &config, SinkTransport::default(), meter);

        assert_eq!(
            s.submit(MessageClass::Generic, vec![1]).unwrap(),
            Submit::Queued
        );
        assert_eq!(
            s.submit(MessageClass::Generic, vec![2]).unwrap(),
            Submit::Flushed(2)
        );
        assert_eq!(s.transport().sends.len(), 2);
        assert_eq!(s.transport().flushes, 1);
    }

    #[test]
    fn test_order_preserved_through_flush() {
        let mut s = shaper();
        for i in 0..5u8 {
            s.submit(MessageClass::Generic, vec![i]).unwrap();
        }
        s.flush().unwrap();
        let first_bytes: Vec<u8> = s.transport().sends.iter().map(|m| m[0]).collect();
        assert_eq!(first_bytes, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_large_payload_goes_out_compressed() {
        let mut s = shaper();
        let payload = vec![0u8; 2048];
        s.submit(MessageClass::UnitUpdate, payload).unwrap();
        s.flush().unwrap();

        let sent = &s.transport().sends[0];
        assert!(sent.len() < 2048);
        assert!(s.stats().bytes_saved > 0);
    }

    #[test]
    fn test_small_payload_goes_out_raw() {
        let mut s = shaper();
        s.submit(MessageClass::UnitUpdate, vec![5; 64]).unwrap();
        s.flush().unwrap();
        assert_eq!(s.transport().sends[0], vec![5; 64]);
        assert_eq!(s.stats().bytes_saved, 0);
    }

    #[test]
    fn test_throttled_message_is_dropped() {
        let meter = Arc::new(BandwidthMeter::new(&BandwidthConfig::default()));
        let config = Config::default();
        let mut s = ConnectionShaper::new(1, &config, SinkTransport::default(), meter);

        assert_eq!(
            s.submit(MessageClass::Chat, vec![1]).unwrap(),
            Submit::Queued
        );
        // Immediate second chat message is inside the 100ms cooldown
        assert_eq!(
            s.submit(MessageClass::Chat, vec![2]).unwrap(),
            Submit::Throttled
        );
        assert_eq!(s.pending_messages(), 1);
        assert_eq!(s.stats().messages_throttled, 1);
    }

    #[test]
    fn test_meter_observes_wire_bytes() {
        let meter = Arc::new(BandwidthMeter::new(&BandwidthConfig::default()));
        let mut config = Config::default();
        config.throttle.enabled = false;
        let mut s = ConnectionShaper::new(1, &config, SinkTransport::default(), meter.clone());

        s.submit(MessageClass::Generic, vec![1; 100]).unwrap();
        s.flush().unwrap();
        assert_eq!(meter.total_bytes_sent(), 100);
    }

    #[test]
    fn test_receive_round_trip_and_local_failure() {
        let mut s = shaper();
        let mut encoder = Compressor::new(&Config::default().compression);
        let original: Vec<u8> = (0..1500).map(|i| (i % 11) as u8).collect();
        let compressed = encoder.compress(&original).unwrap().unwrap().to_vec();

        // Wrong declared length fails just this message
        assert!(s.receive(&compressed, 99).is_err());
        // The connection keeps working
        assert_eq!(s.receive(&compressed, original.len()).unwrap(), original);
    }

    #[test]
    fn test_stats_roll_up() {
        let mut s = shaper();
        s.submit(MessageClass::Generic, vec![1; 10]).unwrap();
        s.submit(MessageClass::Generic, vec![2; 10]).unwrap();
        s.flush().unwrap();

        let stats = s.stats();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.batches_flushed, 1);
        assert_eq!(stats.bytes_out, 20);
    }

    #[test]
    fn test_connections_are_independent() {
        let meter = Arc::new(BandwidthMeter::new(&BandwidthConfig::default()));
        let config = Config::default();
        let mut a = ConnectionShaper::new(1, &config, SinkTransport::default(), meter.clone());
        let mut b = ConnectionShaper::new(2, &config, SinkTransport::default(), meter);

        // Chat on connection A does not consume connection B's cooldown
        assert_eq!(a.submit(MessageClass::Chat, vec![1]).unwrap(), Submit::Queued);
        assert_eq!(b.submit(MessageClass::Chat, vec![1]).unwrap(), Submit::Queued);

        a.throttler_mut()
            .set_cooldown(MessageClass::Chat, Duration::ZERO);
        assert_eq!(a.submit(MessageClass::Chat, vec![2]).unwrap(), Submit::Queued);
    }
}
