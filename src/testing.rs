//! In-memory transport for simulations and tests.
//!
//! [`MemoryTransport`] records every byte queued for the client and lets the
//! caller script the send window, inject write failures and watch
//! acknowledgements and closes. Clones share state, so a test can hand one
//! clone to the bridge and keep another to inspect it.
//!
//! Built with the `testing` feature (on by default). Firmware builds can turn
//! default features off to leave it out.
//!
//! # Example
//!
//! ```
//! use framebridge::hal::Transport;
//! use framebridge::testing::MemoryTransport;
//!
//! let observer = MemoryTransport::new(3);
//! let mut transport = observer.clone();
//!
//! assert_eq!(transport.enqueue(b"hello").unwrap(), 3);
//! assert_eq!(observer.sent(), b"hel");
//! assert_eq!(observer.window(), 0);
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use crate::hal::{Transport, TransportError};

#[derive(Debug, Default)]
struct Inner {
    sent: Vec<u8>,
    window: usize,
    acknowledged: usize,
    close_calls: usize,
    fail_next: Option<TransportError>,
    fail_next_flush: Option<TransportError>,
    refill_on_poll: usize,
    input_polls: usize,
    writes: usize,
    flushes: usize,
}

/// Shared-state in-memory [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Rc<RefCell<Inner>>,
}

impl MemoryTransport {
    /// Transport with `window` bytes of send window.
    pub fn new(window: usize) -> Self {
        let transport = Self::default();
        transport.set_window(window);
        transport
    }

    /// Transport that never runs out of window.
    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    /// Replace the current send window.
    pub fn set_window(&self, window: usize) {
        self.inner.borrow_mut().window = window;
    }

    pub fn window(&self) -> usize {
        self.inner.borrow().window
    }

    /// Fail the next `enqueue` with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.inner.borrow_mut().fail_next = Some(error);
    }

    /// Fail the next `flush` with `error`. Bytes already enqueued stay sent.
    pub fn fail_next_flush(&self, error: TransportError) {
        self.inner.borrow_mut().fail_next_flush = Some(error);
    }

    /// Grow the window by `bytes` on every `poll_input`, as if ACKs arrived.
    pub fn refill_on_poll(&self, bytes: usize) {
        self.inner.borrow_mut().refill_on_poll = bytes;
    }

    /// Everything queued so far, in order.
    pub fn sent(&self) -> Vec<u8> {
        self.inner.borrow().sent.clone()
    }

    /// Total received bytes acknowledged.
    pub fn acknowledged(&self) -> usize {
        self.inner.borrow().acknowledged
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().close_calls > 0
    }

    pub fn close_calls(&self) -> usize {
        self.inner.borrow().close_calls
    }

    pub fn input_polls(&self) -> usize {
        self.inner.borrow().input_polls
    }

    /// Number of non-empty writes.
    pub fn writes(&self) -> usize {
        self.inner.borrow().writes
    }

    pub fn flushes(&self) -> usize {
        self.inner.borrow().flushes
    }
}

impl Transport for MemoryTransport {
    fn enqueue(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut inner = self.inner.borrow_mut();
        if inner.close_calls > 0 {
            return Err(TransportError::Closed);
        }
        if let Some(error) = inner.fail_next.take() {
            return Err(error);
        }

        let n = data.len().min(inner.window);
        inner.sent.extend_from_slice(&data[..n]);
        inner.window -= n;
        if n > 0 {
            inner.writes += 1;
        }
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let mut inner = self.inner.borrow_mut();
        inner.flushes += 1;
        match inner.fail_next_flush.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn send_window(&self) -> usize {
        self.inner.borrow().window
    }

    fn acknowledge(&mut self, len: usize) {
        self.inner.borrow_mut().acknowledged += len;
    }

    fn close(&mut self) {
        self.inner.borrow_mut().close_calls += 1;
    }

    fn poll_input(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.input_polls += 1;
        inner.window = inner.window.saturating_add(inner.refill_on_poll);
    }
}
