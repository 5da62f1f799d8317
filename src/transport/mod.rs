//! Transport module - host socket handling.
//!
//! Provides a tokio TCP front end for running the bridge on a workstation
//! against a real client, with a software transform engine behind it.

mod tcp;

pub use tcp::{bind, serve, serve_one, TcpTransport};
