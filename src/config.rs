//! Bridge configuration.
//!
//! Defaults reproduce the reference board setup: 320x180 BGR24 frames in,
//! 1280x720 ABGR32 frames out, ten receive slots and MSS-sized egress chunks
//! on TCP port 6001.
//!
//! # Example
//!
//! ```
//! use framebridge::config::BridgeConfig;
//!
//! let config = BridgeConfig::from_json(r#"{ "ring_slots": 4 }"#).unwrap();
//! assert_eq!(config.ring_slots, 4);
//! assert_eq!(config.port, 6001);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Default listener port.
pub const DEFAULT_PORT: u16 = 6001;

/// Default number of receive frame slots.
pub const DEFAULT_RING_SLOTS: usize = 10;

/// Default maximum bytes handed to the transport per write (one Ethernet MSS).
pub const DEFAULT_TX_CHUNK: usize = 1460;

/// Default busy-poll budget for each DMA completion wait.
pub const DEFAULT_DMA_SPIN_LIMIT: u32 = 100_000_000;

/// Default window-poll budget for the blocking sender.
pub const DEFAULT_LEGACY_POLL_BUDGET: u32 = 1_000_000;

/// Default emulated transport send buffer for the host adapter.
pub const DEFAULT_SEND_BUFFER: usize = 8 * DEFAULT_TX_CHUNK;

/// Fixed frame geometry: width x height x bytes per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: usize,
    pub height: usize,
    pub bytes_per_pixel: usize,
}

impl FrameGeometry {
    pub const fn new(width: usize, height: usize, bytes_per_pixel: usize) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel,
        }
    }

    /// Size of one frame in bytes.
    #[inline]
    pub const fn frame_bytes(&self) -> usize {
        self.width * self.height * self.bytes_per_pixel
    }

    /// Size of one row in bytes.
    #[inline]
    pub const fn row_bytes(&self) -> usize {
        self.width * self.bytes_per_pixel
    }
}

/// What the pipeline does with a frame whose transform failed or timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Log the fault, release the slot and carry on with the next frame.
    #[default]
    Discard,
    /// Keep the frame in its slot and stop scheduling until the fault is
    /// acknowledged by the operator.
    Hold,
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// TCP listener port.
    pub port: u16,
    /// Geometry of frames received from the client.
    pub input: FrameGeometry,
    /// Geometry of frames produced by the transform engine.
    pub output: FrameGeometry,
    /// Number of receive frame slots.
    pub ring_slots: usize,
    /// Largest write handed to the transport in one call.
    pub tx_chunk: usize,
    /// Busy polls allowed per DMA direction before declaring a timeout.
    pub dma_spin_limit: u32,
    /// Window polls allowed per chunk in blocking send mode.
    pub legacy_poll_budget: u32,
    /// Policy for frames whose transform failed.
    pub fault_policy: FaultPolicy,
    /// Emulated transport send buffer size (host adapter only).
    pub send_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            input: FrameGeometry::new(320, 180, 3),
            output: FrameGeometry::new(1280, 720, 4),
            ring_slots: DEFAULT_RING_SLOTS,
            tx_chunk: DEFAULT_TX_CHUNK,
            dma_spin_limit: DEFAULT_DMA_SPIN_LIMIT,
            legacy_poll_budget: DEFAULT_LEGACY_POLL_BUDGET,
            fault_policy: FaultPolicy::default(),
            send_buffer: DEFAULT_SEND_BUFFER,
        }
    }
}

impl BridgeConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.input.frame_bytes() == 0 {
            return Err(BridgeError::Config("input frame size is zero".into()));
        }
        if self.output.frame_bytes() == 0 {
            return Err(BridgeError::Config("output frame size is zero".into()));
        }
        if self.ring_slots == 0 {
            return Err(BridgeError::Config("ring needs at least one slot".into()));
        }
        if self.tx_chunk == 0 {
            return Err(BridgeError::Config("tx_chunk must be non-zero".into()));
        }
        if self.dma_spin_limit == 0 {
            return Err(BridgeError::Config("dma_spin_limit must be non-zero".into()));
        }
        if self.send_buffer < self.tx_chunk {
            return Err(BridgeError::Config(format!(
                "send_buffer {} smaller than tx_chunk {}",
                self.send_buffer, self.tx_chunk
            )));
        }
        Ok(())
    }
}
