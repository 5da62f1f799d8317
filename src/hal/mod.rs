//! Hardware and transport contracts consumed by the pipeline.
//!
//! The pipeline never talks to registers or a TCP stack directly. It sees:
//! - [`Transport`]: one client connection with a flow-controlled send window
//! - [`TransformEngine`]: the DMA-attached accelerator (submit / poll busy)
//! - [`CacheOps`]: flush before the device reads, invalidate before the CPU
//!   reads device-written memory
//!
//! [`SoftwareEngine`] and [`CoherentCache`] are host-side stand-ins used by
//! the demo server and the tests.

mod dma;
mod soft_engine;
mod transport;

pub use dma::{CacheOps, CoherentCache, Direction, DmaError, TransformEngine};
pub(crate) use dma::wait_idle;
pub use soft_engine::SoftwareEngine;
pub use transport::{Transport, TransportError};
