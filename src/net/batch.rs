//! Outbound message batching over a narrow transport seam.
//!
//! Messages accumulate per connection and go out together: every buffered
//! message becomes a non-flushing write except the last, which flushes.
//! Submission order is preserved because a batcher is owned by exactly one
//! connection and never touched from anywhere else.

use smallvec::SmallVec;

use crate::config::BatchConfig;

/// The only surface the shaping pipeline uses to reach the wire.
pub trait Transport {
    /// Queue one message for the peer without forcing it onto the wire.
    fn send(&mut self, payload: &[u8]) -> std::io::Result<()>;

    /// Push everything queued so far onto the wire.
    fn flush(&mut self) -> std::io::Result<()>;
}

type PendingBuf = SmallVec<[Vec<u8>; 8]>;

/// Append-only buffer of outbound messages for one connection.
#[derive(Debug)]
pub struct Batcher {
    enabled: bool,
    max_batch_size: usize,
    pending: PendingBuf,
}

impl Batcher {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_batch_size: config.max_batch_size.max(1),
            pending: SmallVec::new(),
        }
    }

    /// Buffer a message. Returns `true` when the buffer has reached its
    /// limit and must be flushed before anything else is pushed.
    #[must_use]
    pub fn push(&mut self, message: Vec<u8>) -> bool {
        self.pending.push(message);
        !self.enabled || self.pending.len() >= self.max_batch_size
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take the buffered messages in submission order, leaving the buffer
    /// empty.
    pub fn take_pending(&mut self) -> PendingBuf {
        std::mem::take(&mut self.pending)
    }

    /// Write every buffered message to the transport: non-flushing writes
    /// for all but the last, a flushing write for the last. Returns the
    /// number of messages written.
    pub fn flush_into<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> std::io::Result<usize> {
        let pending = self.take_pending();
        let count = pending.len();
        for (index, message) in pending.iter().enumerate() {
            transport.send(message)?;
            if index + 1 == count {
                transport.flush()?;
            }
        }
        Ok(count)
    }
}
