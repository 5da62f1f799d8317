//! Transport-side retention of refused receive bytes.
//!
//! When the frame ring is full the reassembler accepts only part of a chunk.
//! The rest must not be lost and must not be redelivered out of position, so
//! the host transport parks it here and replays it, oldest byte first,
//! before reading anything new from the socket.
//!
//! # Usage
//!
//! ```
//! use framebridge::backpressure::RxBacklog;
//!
//! let mut backlog = RxBacklog::new();
//! backlog.hold(b"tail");
//! assert_eq!(backlog.pending(), b"tail");
//!
//! backlog.consume(2);
//! assert_eq!(backlog.pending(), b"il");
//! ```

use bytes::{Buf, BytesMut};

/// Default initial capacity of the backlog buffer.
pub const DEFAULT_BACKLOG_CAPACITY: usize = 64 * 1024;

/// Bytes received from the peer but not yet accepted by the ring.
#[derive(Debug)]
pub struct RxBacklog {
    pending: BytesMut,
    /// Number of times bytes were parked.
    stalls: u64,
}

impl RxBacklog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BACKLOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: BytesMut::with_capacity(capacity),
            stalls: 0,
        }
    }

    /// Park bytes that were refused. Appends after anything already held.
    pub fn hold(&mut self, remainder: &[u8]) {
        if remainder.is_empty() {
            return;
        }
        self.pending.extend_from_slice(remainder);
        self.stalls += 1;
    }

    /// Bytes waiting for redelivery, oldest first.
    #[inline]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Drop the first `accepted` bytes after a successful redelivery.
    pub fn consume(&mut self, accepted: usize) {
        let n = accepted.min(self.pending.len());
        self.pending.advance(n);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// How many times bytes had to be parked.
    #[inline]
    pub fn stalls(&self) -> u64 {
        self.stalls
    }

    /// Forget held bytes (connection gone).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for RxBacklog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_backlog_is_empty() {
        let backlog = RxBacklog::default();
        assert!(backlog.is_empty());
        assert_eq!(backlog.len(), 0);
        assert_eq!(backlog.stalls(), 0);
    }

    #[test]
    fn test_hold_appends_in_order() {
        let mut backlog = RxBacklog::new();
        backlog.hold(b"abc");
        backlog.hold(b"def");

        assert_eq!(backlog.pending(), b"abcdef");
        assert_eq!(backlog.stalls(), 2);
    }

    #[test]
    fn test_hold_empty_is_not_a_stall() {
        let mut backlog = RxBacklog::new();
        backlog.hold(b"");
        assert_eq!(backlog.stalls(), 0);
    }

    #[test]
    fn test_partial_consume() {
        let mut backlog = RxBacklog::new();
        backlog.hold(b"0123456789");

        backlog.consume(4);
        assert_eq!(backlog.pending(), b"456789");

        backlog.consume(6);
        assert!(backlog.is_empty());
    }

    #[test]
    fn test_consume_more_than_held() {
        let mut backlog = RxBacklog::new();
        backlog.hold(b"ab");
        backlog.consume(10);
        assert!(backlog.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut backlog = RxBacklog::with_capacity(16);
        backlog.hold(b"leftover");
        backlog.clear();
        assert!(backlog.is_empty());
    }
}
