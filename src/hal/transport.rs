//! Transport contract: one accepted client connection.
//!
//! Modelled on a raw-callback TCP stack. Inbound data arrives through
//! [`Event::Received`](crate::Event) and is acknowledged here once
//! copied; outbound data is queued with copy semantics, so the source buffer
//! is reusable as soon as `enqueue` returns.

use thiserror::Error;

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The stack could not allocate room for the write; retry on the next
    /// window-available signal.
    #[error("transport out of memory")]
    OutOfMemory,

    /// The connection is gone.
    #[error("connection closed")]
    Closed,

    /// Any other hard failure.
    #[error("transport I/O failure: {0:?}")]
    Io(std::io::ErrorKind),
}

impl TransportError {
    /// Whether the failed write may simply be retried later.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::OutOfMemory)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => TransportError::Closed,
            kind => TransportError::Io(kind),
        }
    }
}

/// A live client connection as seen by the pipeline.
pub trait Transport {
    /// Queue bytes for transmission, copying them.
    ///
    /// Returns the number of bytes queued, which may be fewer than offered.
    /// `Ok(0)` means "no room right now".
    fn enqueue(&mut self, data: &[u8]) -> std::result::Result<usize, TransportError>;

    /// Push queued bytes towards the wire.
    fn flush(&mut self) -> std::result::Result<(), TransportError>;

    /// Bytes the transport is currently willing to queue.
    fn send_window(&self) -> usize;

    /// Report that `len` received bytes were consumed, reopening the
    /// receive window by that amount.
    fn acknowledge(&mut self, len: usize);

    /// Close the connection after already-queued bytes are delivered.
    fn close(&mut self);

    /// Run one step of the stack's input processing.
    ///
    /// Only the blocking sender calls this, to let ACKs arrive while it
    /// spins on the send window.
    fn poll_input(&mut self) {}
}
