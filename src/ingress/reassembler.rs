//! Ingress reassembler: transport chunks in, fixed-size frames out.
//!
//! Chunk boundaries are arbitrary. A chunk may close one frame and open the
//! next, or span several frames. Each pass of the copy loop moves
//! `min(chunk remaining, slot remaining)` bytes, closes the slot if it filled
//! up, and continues in the next slot until the chunk is exhausted or the
//! ring is full.
//!
//! When the ring is full the reassembler stops and reports how many bytes it
//! actually copied. The unconsumed tail is the transport's to keep; nothing
//! is dropped.
//!
//! # Example
//!
//! ```
//! use framebridge::hal::CoherentCache;
//! use framebridge::ingress::{FrameRing, Reassembler};
//!
//! let mut ring = FrameRing::new(2, 4).unwrap();
//! let mut reassembler = Reassembler::new();
//!
//! let ingest = reassembler.ingest(&mut ring, &CoherentCache, b"ABCDEF");
//! assert_eq!(ingest.accepted, 6);
//! assert_eq!(ingest.completed, 1);
//! assert_eq!(ring.try_peek_ready().unwrap().1, b"ABCD");
//! ```

use crate::hal::CacheOps;

use super::ring::FrameRing;

/// Result of ingesting one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ingest {
    /// Bytes copied into the ring. Exactly this many may be acknowledged.
    pub accepted: usize,
    /// Frames completed while ingesting this chunk.
    pub completed: usize,
    /// The ring filled up before the chunk was exhausted.
    pub stalled: bool,
}

impl Ingest {
    /// Unconsumed bytes the transport must keep for later redelivery.
    #[inline]
    pub fn remainder<'a>(&self, chunk: &'a [u8]) -> &'a [u8] {
        &chunk[self.accepted..]
    }
}

/// Copies transport chunks into the frame ring.
#[derive(Debug, Default)]
pub struct Reassembler {
    /// Total bytes accepted since the last reset.
    received: u64,
    /// Whether the previous chunk ended in a stall.
    stalled: bool,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy as much of `chunk` as the ring can hold.
    pub fn ingest<C>(&mut self, ring: &mut FrameRing, cache: &C, chunk: &[u8]) -> Ingest
    where
        C: CacheOps + ?Sized,
    {
        let mut ingest = Ingest::default();

        while ingest.accepted < chunk.len() {
            let Some(tail) = ring.writable() else {
                ingest.stalled = true;
                break;
            };

            let n = tail.len().min(chunk.len() - ingest.accepted);
            tail[..n].copy_from_slice(&chunk[ingest.accepted..ingest.accepted + n]);
            ingest.accepted += n;

            if let Some(slot) = ring.commit(n, cache) {
                ingest.completed += 1;
                tracing::debug!(slot, count = ring.count(), "Frame ready");
            }
        }

        if ingest.stalled && !self.stalled {
            tracing::debug!(
                accepted = ingest.accepted,
                held = chunk.len() - ingest.accepted,
                "Ring full, stalling ingress"
            );
        }
        self.stalled = ingest.stalled;
        self.received += ingest.accepted as u64;
        ingest
    }

    /// Whether the last chunk was cut short by a full ring.
    #[inline]
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Total bytes accepted since the last reset.
    #[inline]
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Forget per-connection progress.
    pub fn reset(&mut self) {
        self.received = 0;
        self.stalled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::CoherentCache;
    use crate::ingress::SlotStatus;

    fn ingest(r: &mut Reassembler, ring: &mut FrameRing, chunk: &[u8]) -> Ingest {
        r.ingest(ring, &CoherentCache, chunk)
    }

    #[test]
    fn test_chunks_smaller_than_frame() {
        let mut ring = FrameRing::new(2, 4).unwrap();
        let mut r = Reassembler::new();

        assert_eq!(ingest(&mut r, &mut ring, b"AB").completed, 0);
        assert_eq!(ingest(&mut r, &mut ring, b"C").completed, 0);
        let last = ingest(&mut r, &mut ring, b"D");

        assert_eq!(last.completed, 1);
        assert_eq!(ring.try_peek_ready().unwrap(), (0, &b"ABCD"[..]));
        assert_eq!(r.received(), 4);
    }

    #[test]
    fn test_chunk_spanning_several_frames() {
        let mut ring = FrameRing::new(4, 3).unwrap();
        let mut r = Reassembler::new();

        let result = ingest(&mut r, &mut ring, b"abcdefghij");
        assert_eq!(result.accepted, 10);
        assert_eq!(result.completed, 3);
        assert!(!result.stalled);
        assert_eq!(ring.count(), 3);
        assert_eq!(ring.fill_level(), 1);

        for expected in [b"abc", b"def", b"ghi"] {
            assert_eq!(ring.try_peek_ready().unwrap().1, expected);
            ring.pop();
        }
    }

    #[test]
    fn test_stall_reports_exact_accepted() {
        let mut ring = FrameRing::new(2, 4).unwrap();
        let mut r = Reassembler::new();

        let chunk = b"0123456789";
        let result = ingest(&mut r, &mut ring, chunk);

        assert_eq!(result.accepted, 8);
        assert_eq!(result.completed, 2);
        assert!(result.stalled);
        assert!(r.is_stalled());
        assert_eq!(result.remainder(chunk), b"89");
    }

    #[test]
    fn test_full_ring_refuses_at_head() {
        let mut ring = FrameRing::new(1, 2).unwrap();
        let mut r = Reassembler::new();
        ingest(&mut r, &mut ring, b"xy");

        let result = ingest(&mut r, &mut ring, b"z");
        assert_eq!(result, Ingest { accepted: 0, completed: 0, stalled: true });
    }

    #[test]
    fn test_resume_after_pop_keeps_order() {
        let mut ring = FrameRing::new(2, 4).unwrap();
        let mut r = Reassembler::new();

        let chunk = b"AAAABBBBCCCC";
        let first = ingest(&mut r, &mut ring, chunk);
        assert!(first.stalled);

        ring.pop();
        let second = ingest(&mut r, &mut ring, first.remainder(chunk));
        assert_eq!(second.accepted, 4);
        assert!(!second.stalled);
        assert!(!r.is_stalled());

        assert_eq!(ring.try_peek_ready().unwrap().1, b"BBBB");
        ring.pop();
        assert_eq!(ring.try_peek_ready().unwrap().1, b"CCCC");
    }

    #[test]
    fn test_ring_full_exactly_at_chunk_end_is_not_a_stall() {
        let mut ring = FrameRing::new(2, 2).unwrap();
        let mut r = Reassembler::new();

        let result = ingest(&mut r, &mut ring, b"abcd");
        assert_eq!(result.accepted, 4);
        assert!(!result.stalled);
        assert!(ring.is_full());
    }

    #[test]
    fn test_empty_chunk() {
        let mut ring = FrameRing::new(2, 2).unwrap();
        let mut r = Reassembler::new();
        assert_eq!(ingest(&mut r, &mut ring, b""), Ingest::default());
        assert_eq!(ring.status(0), Some(SlotStatus::Empty));
    }

    #[test]
    fn test_straddle_every_split_point() {
        const FRAME: usize = 16;
        for split in 0..FRAME {
            let mut ring = FrameRing::new(3, FRAME).unwrap();
            let mut r = Reassembler::new();

            let stream: Vec<u8> = (0..(2 * FRAME) as u8).collect();
            let head = &stream[..split];
            let middle = &stream[split..FRAME + 10];
            let tail = &stream[FRAME + 10..];

            ingest(&mut r, &mut ring, head);
            ingest(&mut r, &mut ring, middle);
            ingest(&mut r, &mut ring, tail);

            assert_eq!(ring.count(), 2, "split {}", split);
            assert_eq!(ring.try_peek_ready().unwrap().1, &stream[..FRAME]);
            ring.pop();
            assert_eq!(ring.try_peek_ready().unwrap().1, &stream[FRAME..]);
        }
    }
}
