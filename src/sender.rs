//! Outbound transfer of transform results.
//!
//! Two modes are provided:
//!
//! - [`AsyncSender`]: non-blocking. A send is started once and then advanced
//!   each time the transport reports window space. Progress is a single
//!   monotonic counter of bytes already queued, so re-entering from a window
//!   signal can neither repeat nor skip bytes.
//! - [`send_blocking`]: the earlier synchronous path. Pushes the whole buffer
//!   chunk by chunk, spinning on the send window and pumping transport input
//!   in between. Kept as a correctness baseline; it stalls ingestion for the
//!   whole transfer.
//!
//! # Architecture
//!
//! ```text
//! Pipeline ─► start_send ─┐
//!                         ├─► progress ─► Transport::enqueue / flush
//! SendWindow event ───────┘
//! ```

use crate::connection::Connection;
use crate::error::{BridgeError, Result};
use crate::hal::{Transport, TransportError};
use crate::pipeline::{OutputId, OutputPair};

/// One outbound transfer borrowing an output buffer by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSend {
    /// Output buffer being transmitted.
    pub source: OutputId,
    /// Total bytes to transmit.
    pub len: usize,
    /// Bytes already accepted by the transport.
    pub queued: usize,
}

impl PendingSend {
    #[inline]
    pub fn remaining(&self) -> usize {
        self.len - self.queued
    }
}

/// Outbound transfer state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    Sending(PendingSend),
}

impl SendState {
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, SendState::Sending(_))
    }

    /// Output buffer referenced by the active transfer.
    #[inline]
    pub fn source(&self) -> Option<OutputId> {
        match self {
            SendState::Idle => None,
            SendState::Sending(pending) => Some(pending.source),
        }
    }
}

/// Result of advancing a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendProgress {
    /// Every byte has been queued; the sender is idle again.
    Complete { bytes: usize },
    /// Out of window for now; resumes on the next window signal.
    Waiting { queued: usize, remaining: usize },
}

impl SendProgress {
    #[inline]
    pub fn is_complete(&self) -> bool {
        matches!(self, SendProgress::Complete { .. })
    }
}

/// Flow-controlled, re-entrant sender.
#[derive(Debug, Clone, Copy)]
pub struct AsyncSender {
    max_chunk: usize,
}

impl AsyncSender {
    /// Create a sender writing at most `max_chunk` bytes per transport call.
    pub fn new(max_chunk: usize) -> Self {
        Self {
            max_chunk: max_chunk.max(1),
        }
    }

    #[inline]
    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Begin transmitting the first `len` bytes of output buffer `source`.
    ///
    /// Fails without side effects when no client is connected or a send is
    /// already active. Queues as much as the window allows right away.
    pub fn start_send<T: Transport>(
        &self,
        conn: Option<&mut Connection<T>>,
        outputs: &OutputPair,
        source: OutputId,
        len: usize,
    ) -> Result<SendProgress> {
        let conn = conn.ok_or(BridgeError::NotConnected)?;
        if conn.is_sending() {
            return Err(BridgeError::SendInProgress);
        }

        let len = len.min(outputs.frame_len());
        conn.send = SendState::Sending(PendingSend {
            source,
            len,
            queued: 0,
        });
        tracing::debug!(?source, bytes = len, "Send started");

        self.progress(conn, outputs)
    }

    /// Resume the active transfer after the transport freed window space.
    ///
    /// Returns `None` when no transfer is active.
    pub fn on_window_available<T: Transport>(
        &self,
        conn: &mut Connection<T>,
        outputs: &OutputPair,
    ) -> Result<Option<SendProgress>> {
        if !conn.is_sending() {
            return Ok(None);
        }
        self.progress(conn, outputs).map(Some)
    }

    /// Drop the active transfer, releasing its buffer reference.
    ///
    /// Returns the abandoned transfer, if any.
    pub fn abort<T: Transport>(&self, conn: &mut Connection<T>) -> Option<PendingSend> {
        match std::mem::take(&mut conn.send) {
            SendState::Idle => None,
            SendState::Sending(pending) => Some(pending),
        }
    }

    fn progress<T: Transport>(
        &self,
        conn: &mut Connection<T>,
        outputs: &OutputPair,
    ) -> Result<SendProgress> {
        let Connection {
            transport, send, ..
        } = conn;
        let SendState::Sending(pending) = send else {
            return Err(BridgeError::NotConnected);
        };
        let data = &outputs.get(pending.source)[..pending.len];
        let resumed_after_last_write = pending.queued == pending.len;

        while pending.queued < pending.len {
            let window = transport.send_window();
            if window == 0 {
                return Ok(waiting(pending));
            }

            let chunk = pending.remaining().min(self.max_chunk).min(window);
            let result = match transport.enqueue(&data[pending.queued..pending.queued + chunk]) {
                Ok(n) => {
                    // Enqueued bytes are owned by the transport even if the push fails.
                    pending.queued += n.min(chunk);
                    transport.flush().map(|()| n)
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(0) => return Ok(waiting(pending)),
                Ok(_) => {}
                Err(e) => return write_failed(send, e),
            }
        }

        // The final push failed last time round; retry it before completing.
        if resumed_after_last_write {
            if let Err(e) = transport.flush() {
                return write_failed(send, e);
            }
        }

        let bytes = pending.len;
        *send = SendState::Idle;
        tracing::debug!(bytes, "Frame sent");
        Ok(SendProgress::Complete { bytes })
    }
}

/// Wait on recoverable pressure, drop the transfer on anything else.
fn write_failed(send: &mut SendState, error: TransportError) -> Result<SendProgress> {
    let SendState::Sending(pending) = send else {
        return Err(error.into());
    };
    if error.is_recoverable() {
        tracing::trace!(queued = pending.queued, "Transport busy, retry on next window");
        return Ok(waiting(pending));
    }

    tracing::error!(queued = pending.queued, "tcp write error: {}", error);
    *send = SendState::Idle;
    Err(error.into())
}

fn waiting(pending: &PendingSend) -> SendProgress {
    SendProgress::Waiting {
        queued: pending.queued,
        remaining: pending.remaining(),
    }
}

/// Push all of `data` through `transport`, blocking until it is queued.
///
/// Waits for a full chunk of window before each write, pumping transport
/// input between polls. Gives up with [`BridgeError::SendStalled`] after
/// `poll_budget` polls for a single chunk.
pub fn send_blocking<T: Transport>(
    transport: &mut T,
    data: &[u8],
    max_chunk: usize,
    poll_budget: u32,
) -> Result<usize> {
    let max_chunk = max_chunk.max(1);
    let mut offset = 0;

    while offset < data.len() {
        let chunk = (data.len() - offset).min(max_chunk);

        let mut polls = 0u32;
        while transport.send_window() < chunk {
            if polls >= poll_budget {
                tracing::warn!(offset, "Blocking send stalled");
                return Err(BridgeError::SendStalled(polls));
            }
            transport.poll_input();
            polls += 1;
            std::hint::spin_loop();
        }

        let n = transport.enqueue(&data[offset..offset + chunk]).map_err(|e| {
            tracing::error!(offset, "tcp write failed: {}", e);
            e
        })?;
        offset += n;
        if let Err(e) = transport.flush() {
            if !e.is_recoverable() {
                tracing::error!(offset, "tcp output failed: {}", e);
                return Err(e.into());
            }
            tracing::trace!(offset, "Output deferred, bytes stay queued");
        }
    }

    tracing::debug!(bytes = data.len(), "Frame sent (blocking)");
    Ok(offset)
}
