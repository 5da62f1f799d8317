//! # framebridge
//!
//! TCP to DMA frame pipeline for a streaming video accelerator.
//!
//! A single client streams fixed-size raw frames over TCP. Each frame is
//! reassembled into a slot of a bounded ring, pushed through a DMA-attached
//! transform engine into one of two output buffers, and streamed back under
//! the transport's flow-control window while the next frame is processed.
//!
//! ## Architecture
//!
//! - **Ingress**: [`ingress::Reassembler`] copies arbitrary chunks into
//!   [`ingress::FrameRing`] slots and stalls the transport when the ring is full
//! - **Pipeline**: [`pipeline::Pipeline`] runs one transform per pass and
//!   alternates between two output buffers
//! - **Egress**: [`sender::AsyncSender`] resumes partial sends on every
//!   window-available signal; [`Bridge::send_blocking`] is the legacy path
//! - **Hardware**: [`hal`] holds the transport, engine and cache contracts
//!
//! Everything runs on one thread. Transport callbacks arrive as [`Event`]s
//! and the main loop calls [`Bridge::poll`].
//!
//! ## Example
//!
//! ```ignore
//! use framebridge::config::BridgeConfig;
//! use framebridge::hal::{CoherentCache, SoftwareEngine};
//! use framebridge::BridgeBuilder;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> framebridge::Result<()> {
//!     let config = BridgeConfig::default();
//!     let engine = SoftwareEngine::new(config.input, config.output);
//!     let mut bridge = BridgeBuilder::new()
//!         .config(config.clone())
//!         .build(engine, CoherentCache)?;
//!
//!     let listener = framebridge::transport::bind(&config).await?;
//!     framebridge::transport::serve(&listener, &mut bridge).await
//! }
//! ```

pub mod backpressure;
pub mod config;
pub mod error;
pub mod hal;
pub mod ingress;
pub mod pipeline;
pub mod sender;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

mod bridge;
mod connection;

pub use bridge::{Bridge, BridgeBuilder, BridgeStats, Event, Outcome};
pub use connection::Connection;
pub use error::{BridgeError, Result};
