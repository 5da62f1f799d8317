//! Ingress side - frame slot ring and chunk reassembly.
//!
//! This module turns the transport's byte stream into complete frames:
//! - Frame slot ring with `Empty -> Filling -> Ready` slot states
//! - Reassembler copying arbitrarily-sized chunks into the ring with
//!   backpressure when every slot is occupied

mod reassembler;
mod ring;

pub use reassembler::{Ingest, Reassembler};
pub use ring::{FrameRing, SlotStatus};
