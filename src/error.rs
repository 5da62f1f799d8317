//! Error types for framebridge.

use thiserror::Error;

use crate::hal::{DmaError, TransportError};

/// Main error type for all bridge operations.
///
/// A full ring is not an error; it is reported through
/// [`Ingest`](crate::ingress::Ingest).
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error from the host socket layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Hard transport failure (recoverable write pressure never surfaces here).
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Transform engine submission failure or completion timeout.
    #[error("DMA error: {0}")]
    Dma(#[from] DmaError),

    /// Operation requires a connected client.
    #[error("No client connected")]
    NotConnected,

    /// An outbound send is already in flight on this connection.
    #[error("Send already in progress")]
    SendInProgress,

    /// Blocking send gave up waiting for the transport window.
    #[error("Send stalled after {0} window polls")]
    SendStalled(u32),
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
