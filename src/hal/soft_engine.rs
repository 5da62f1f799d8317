//! Software model of the transform accelerator.
//!
//! Performs nearest-neighbour scaling from the input geometry to the output
//! geometry. When output pixels are wider than input pixels the extra leading
//! bytes are filled with opaque alpha, so BGR24 input becomes ABGR32 output
//! (`[0xFF, B, G, R]`).
//!
//! The transform runs inside `submit`; completion is then reported after a
//! configurable number of busy polls per direction to exercise the bounded
//! wait path. Faults and hangs can be injected for testing.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::dma::{Direction, DmaError, TransformEngine};
use crate::config::FrameGeometry;

/// Nearest-neighbour scaler standing in for the PL accelerator.
#[derive(Debug)]
pub struct SoftwareEngine {
    input: FrameGeometry,
    output: FrameGeometry,
    latency_polls: u32,
    /// Remaining busy polls for S2MM.
    s2mm_busy: AtomicU32,
    /// Remaining busy polls for MM2S.
    mm2s_busy: AtomicU32,
    fail_next: AtomicBool,
    hang_next: AtomicBool,
    completed: AtomicU32,
}

impl SoftwareEngine {
    /// Create an engine that completes immediately.
    pub fn new(input: FrameGeometry, output: FrameGeometry) -> Self {
        Self::with_latency(input, output, 0)
    }

    /// Create an engine that reports busy for `latency_polls` polls per
    /// direction after each submission.
    pub fn with_latency(input: FrameGeometry, output: FrameGeometry, latency_polls: u32) -> Self {
        Self {
            input,
            output,
            latency_polls,
            s2mm_busy: AtomicU32::new(0),
            mm2s_busy: AtomicU32::new(0),
            fail_next: AtomicBool::new(false),
            hang_next: AtomicBool::new(false),
            completed: AtomicU32::new(0),
        }
    }

    /// Make the next submission fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::Release);
    }

    /// Make the next submission never complete.
    pub fn hang_next(&self) {
        self.hang_next.store(true, Ordering::Release);
    }

    /// Number of transforms performed so far.
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::Acquire)
    }

    /// Transform `input` into `output` without any device bookkeeping.
    ///
    /// Exposed so callers can compute expected results.
    pub fn render(&self, input: &[u8], output: &mut [u8]) {
        let (inp, out) = (self.input, self.output);
        let pad = out.bytes_per_pixel.saturating_sub(inp.bytes_per_pixel);
        let channels = inp.bytes_per_pixel.min(out.bytes_per_pixel - pad);

        for y in 0..out.height {
            let sy = y * inp.height / out.height;
            for x in 0..out.width {
                let sx = x * inp.width / out.width;
                let src = sy * inp.row_bytes() + sx * inp.bytes_per_pixel;
                let dst = y * out.row_bytes() + x * out.bytes_per_pixel;

                output[dst..dst + pad].fill(0xFF);
                output[dst + pad..dst + pad + channels]
                    .copy_from_slice(&input[src..src + channels]);
                output[dst + pad + channels..dst + out.bytes_per_pixel].fill(0);
            }
        }
    }

    fn counter(&self, direction: Direction) -> &AtomicU32 {
        match direction {
            Direction::ToDevice => &self.mm2s_busy,
            Direction::FromDevice => &self.s2mm_busy,
        }
    }
}

impl TransformEngine for SoftwareEngine {
    fn submit(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), DmaError> {
        if input.len() != self.input.frame_bytes() {
            return Err(DmaError::LengthMismatch {
                expected: self.input.frame_bytes(),
                actual: input.len(),
            });
        }
        if output.len() != self.output.frame_bytes() {
            return Err(DmaError::LengthMismatch {
                expected: self.output.frame_bytes(),
                actual: output.len(),
            });
        }
        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err(DmaError::Submit {
                direction: Direction::FromDevice,
            });
        }

        self.render(input, output);

        let latency = if self.hang_next.swap(false, Ordering::AcqRel) {
            u32::MAX
        } else {
            self.latency_polls
        };
        self.s2mm_busy.store(latency, Ordering::Release);
        self.mm2s_busy.store(latency, Ordering::Release);
        self.completed.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn is_busy(&self, direction: Direction) -> bool {
        let counter = self.counter(direction);
        // A hung channel never counts down.
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| match left {
                0 | u32::MAX => None,
                n => Some(n - 1),
            })
            .is_ok()
            || counter.load(Ordering::Acquire) == u32::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> SoftwareEngine {
        SoftwareEngine::new(FrameGeometry::new(2, 1, 3), FrameGeometry::new(4, 2, 4))
    }

    #[test]
    fn test_render_upscales_and_adds_alpha() {
        let engine = tiny();
        let input = [1, 2, 3, 4, 5, 6];
        let mut output = [0u8; 32];

        engine.render(&input, &mut output);

        let expected_row = [0xFF, 1, 2, 3, 0xFF, 1, 2, 3, 0xFF, 4, 5, 6, 0xFF, 4, 5, 6];
        assert_eq!(&output[..16], &expected_row);
        assert_eq!(&output[16..], &expected_row);
    }

    #[test]
    fn test_render_same_geometry_is_identity() {
        let geometry = FrameGeometry::new(3, 2, 1);
        let engine = SoftwareEngine::new(geometry, geometry);
        let input = [9, 8, 7, 6, 5, 4];
        let mut output = [0u8; 6];

        engine.render(&input, &mut output);
        assert_eq!(output, input);
    }

    #[test]
    fn test_submit_checks_lengths() {
        let mut engine = tiny();
        let mut output = [0u8; 32];

        let err = engine.submit(&[0u8; 5], &mut output).unwrap_err();
        assert_eq!(
            err,
            DmaError::LengthMismatch {
                expected: 6,
                actual: 5
            }
        );

        let err = engine.submit(&[0u8; 6], &mut [0u8; 8]).unwrap_err();
        assert!(matches!(err, DmaError::LengthMismatch { expected: 32, .. }));
    }

    #[test]
    fn test_latency_counts_down_per_direction() {
        let mut engine =
            SoftwareEngine::with_latency(FrameGeometry::new(2, 1, 3), FrameGeometry::new(4, 2, 4), 2);
        engine.submit(&[0u8; 6], &mut [0u8; 32]).unwrap();

        assert!(engine.is_busy(Direction::FromDevice));
        assert!(engine.is_busy(Direction::FromDevice));
        assert!(!engine.is_busy(Direction::FromDevice));

        assert!(engine.is_busy(Direction::ToDevice));
        assert!(engine.is_busy(Direction::ToDevice));
        assert!(!engine.is_busy(Direction::ToDevice));
        assert_eq!(engine.completed(), 1);
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let mut engine = tiny();
        engine.fail_next();

        assert!(engine.submit(&[0u8; 6], &mut [0u8; 32]).is_err());
        assert!(engine.submit(&[0u8; 6], &mut [0u8; 32]).is_ok());
        assert_eq!(engine.completed(), 1);
    }

    #[test]
    fn test_hang_never_completes() {
        let mut engine = tiny();
        engine.hang_next();
        engine.submit(&[0u8; 6], &mut [0u8; 32]).unwrap();

        for _ in 0..1000 {
            assert!(engine.is_busy(Direction::FromDevice));
        }
    }
}
