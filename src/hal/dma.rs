//! Transform engine and cache maintenance contracts.

use std::sync::atomic::{fence, Ordering};

use thiserror::Error;

/// DMA channel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Memory to device (MM2S): the engine reads the input frame.
    ToDevice,
    /// Device to memory (S2MM): the engine writes the output frame.
    FromDevice,
}

/// Transform engine failures. Fatal to the current frame only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaError {
    /// The engine refused a transfer descriptor.
    #[error("{direction:?} transfer submission failed")]
    Submit { direction: Direction },

    /// The channel stayed busy past the poll budget.
    #[error("{direction:?} transfer timed out after {polls} polls")]
    Timeout { direction: Direction, polls: u32 },

    /// Buffer length does not match the engine's frame geometry.
    #[error("buffer length {actual} does not match frame size {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// DMA-attached transform accelerator.
///
/// `submit` arms the device-to-memory channel with `output` first and then
/// starts the memory-to-device channel on `input`. The caller keeps both
/// buffers untouched until `is_busy` reports both directions idle.
pub trait TransformEngine {
    /// Submit one frame transform.
    fn submit(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), DmaError>;

    /// Whether the given channel still has a transfer in flight.
    ///
    /// Implementations read their completion flags with `Acquire`.
    fn is_busy(&self, direction: Direction) -> bool;
}

/// Data cache maintenance around device access.
pub trait CacheOps {
    /// Write back `buf` so the device observes CPU writes.
    fn flush(&self, buf: &[u8]);

    /// Discard cached lines of `buf` so the CPU observes device writes.
    fn invalidate(&self, buf: &[u8]);
}

/// Cache maintenance for cache-coherent hosts: only orders memory accesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoherentCache;

impl CacheOps for CoherentCache {
    #[inline]
    fn flush(&self, _buf: &[u8]) {
        fence(Ordering::Release);
    }

    #[inline]
    fn invalidate(&self, _buf: &[u8]) {
        fence(Ordering::Acquire);
    }
}

/// Busy-wait until `direction` goes idle, giving up after `limit` polls.
pub(crate) fn wait_idle<E>(engine: &E, direction: Direction, limit: u32) -> Result<(), DmaError>
where
    E: TransformEngine + ?Sized,
{
    let mut polls = 0u32;
    while engine.is_busy(direction) {
        polls += 1;
        if polls > limit {
            return Err(DmaError::Timeout { direction, polls });
        }
        std::hint::spin_loop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountdownEngine {
        remaining: Cell<u32>,
    }

    impl TransformEngine for CountdownEngine {
        fn submit(&mut self, _input: &[u8], _output: &mut [u8]) -> Result<(), DmaError> {
            Ok(())
        }

        fn is_busy(&self, _direction: Direction) -> bool {
            let left = self.remaining.get();
            if left == 0 {
                return false;
            }
            self.remaining.set(left - 1);
            true
        }
    }

    #[test]
    fn test_wait_idle_within_budget() {
        let engine = CountdownEngine {
            remaining: Cell::new(5),
        };
        assert!(wait_idle(&engine, Direction::FromDevice, 10).is_ok());
    }

    #[test]
    fn test_wait_idle_times_out() {
        let engine = CountdownEngine {
            remaining: Cell::new(u32::MAX),
        };
        let err = wait_idle(&engine, Direction::ToDevice, 100).unwrap_err();
        assert_eq!(
            err,
            DmaError::Timeout {
                direction: Direction::ToDevice,
                polls: 101
            }
        );
    }

    #[test]
    fn test_error_display() {
        let err = DmaError::LengthMismatch {
            expected: 16,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "buffer length 12 does not match frame size 16"
        );
    }
}
