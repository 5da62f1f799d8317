//! Fixed-capacity ring of receive frame slots.
//!
//! Every slot buffer is allocated once at construction and addressed only by
//! index afterwards; advancing an index never moves frame bytes. Slot status
//! is a small state machine:
//!
//! ```text
//! Empty --(first byte copied)--> Filling --(last byte copied)--> Ready
//!   ^                                                              |
//!   +--------------------------(pop)-------------------------------+
//! ```
//!
//! The reassembler owns the `Empty -> Filling -> Ready` edges through the
//! crate-private writer methods; the pipeline owns `Ready -> Empty` through
//! [`FrameRing::pop`].

use crate::error::{BridgeError, Result};
use crate::hal::CacheOps;

/// Status of a single frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Empty,
    Filling,
    Ready,
}

#[derive(Debug)]
struct Slot {
    data: Box<[u8]>,
    fill: usize,
    status: SlotStatus,
}

/// Ring of fixed-size frame buffers shared by the reassembler (producer) and
/// the pipeline (consumer).
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<Slot>,
    frame_len: usize,
    write_idx: usize,
    read_idx: usize,
    /// Number of `Ready` slots.
    count: usize,
}

impl FrameRing {
    /// Allocate `capacity` slots of `frame_len` bytes each.
    ///
    /// Fails with [`BridgeError::Config`] if either value is zero.
    pub fn new(capacity: usize, frame_len: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BridgeError::Config("ring needs at least one slot".into()));
        }
        if frame_len == 0 {
            return Err(BridgeError::Config("frame length must be non-zero".into()));
        }

        let slots = (0..capacity)
            .map(|_| Slot {
                data: vec![0u8; frame_len].into_boxed_slice(),
                fill: 0,
                status: SlotStatus::Empty,
            })
            .collect();

        Ok(Self {
            slots,
            frame_len,
            write_idx: 0,
            read_idx: 0,
            count: 0,
        })
    }

    /// Peek the oldest ready frame without consuming it.
    pub fn try_peek_ready(&self) -> Option<(usize, &[u8])> {
        if self.count == 0 {
            return None;
        }
        let slot = &self.slots[self.read_idx];
        if slot.status != SlotStatus::Ready {
            return None;
        }
        Some((self.read_idx, &slot.data))
    }

    /// Release the oldest ready frame.
    ///
    /// Returns the released slot index, or `None` when nothing is ready.
    pub fn pop(&mut self) -> Option<usize> {
        if self.count == 0 || self.slots[self.read_idx].status != SlotStatus::Ready {
            return None;
        }

        let idx = self.read_idx;
        let slot = &mut self.slots[idx];
        slot.status = SlotStatus::Empty;
        slot.fill = 0;
        self.read_idx = (idx + 1) % self.slots.len();
        self.count -= 1;
        Some(idx)
    }

    /// Number of ready frames.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Size of one frame in bytes.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Whether the slot at the write index is still occupied by a ready frame.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.slots[self.write_idx].status == SlotStatus::Ready
    }

    #[inline]
    pub fn write_index(&self) -> usize {
        self.write_idx
    }

    #[inline]
    pub fn read_index(&self) -> usize {
        self.read_idx
    }

    /// Status of slot `idx`, if it exists.
    pub fn status(&self, idx: usize) -> Option<SlotStatus> {
        self.slots.get(idx).map(|s| s.status)
    }

    /// Bytes already copied into the slot being filled.
    #[inline]
    pub fn fill_level(&self) -> usize {
        self.slots[self.write_idx].fill
    }

    /// Drop the progress of a partially filled slot.
    ///
    /// Ready frames are kept. Returns the number of bytes discarded.
    pub fn discard_partial(&mut self) -> usize {
        let slot = &mut self.slots[self.write_idx];
        if slot.status != SlotStatus::Filling {
            return 0;
        }
        let dropped = slot.fill;
        slot.fill = 0;
        slot.status = SlotStatus::Empty;
        dropped
    }

    /// Writable tail of the current write slot, or `None` when the ring is
    /// full. Marks an empty slot as filling.
    pub(crate) fn writable(&mut self) -> Option<&mut [u8]> {
        let slot = &mut self.slots[self.write_idx];
        match slot.status {
            SlotStatus::Ready => None,
            SlotStatus::Empty | SlotStatus::Filling => {
                slot.status = SlotStatus::Filling;
                Some(&mut slot.data[slot.fill..])
            }
        }
    }

    /// Record `len` bytes copied into the write slot.
    ///
    /// When the slot becomes full it is flushed for the device, marked ready
    /// and the write index advances. Returns the completed slot index.
    pub(crate) fn commit<C>(&mut self, len: usize, cache: &C) -> Option<usize>
    where
        C: CacheOps + ?Sized,
    {
        let idx = self.write_idx;
        let slot = &mut self.slots[idx];
        debug_assert_eq!(slot.status, SlotStatus::Filling);
        debug_assert!(slot.fill + len <= self.frame_len);

        slot.fill += len;
        if slot.fill < self.frame_len {
            return None;
        }

        cache.flush(&slot.data);
        slot.status = SlotStatus::Ready;
        self.count += 1;
        self.write_idx = (idx + 1) % self.slots.len();
        Some(idx)
    }
}
