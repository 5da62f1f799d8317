//! The single live client connection.
//!
//! Send state lives inside the connection, so an active send without a
//! connection cannot be expressed. The connection is torn down once the peer
//! has closed its side and no send references an output buffer.

use crate::hal::Transport;
use crate::pipeline::OutputId;
use crate::sender::SendState;

/// A connected client and its outbound transfer state.
#[derive(Debug)]
pub struct Connection<T> {
    pub(crate) transport: T,
    pub(crate) send: SendState,
    input_closed: bool,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            send: SendState::Idle,
            input_closed: false,
        }
    }

    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[inline]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[inline]
    pub fn send_state(&self) -> &SendState {
        &self.send
    }

    /// Whether an outbound transfer is in flight.
    #[inline]
    pub fn is_sending(&self) -> bool {
        self.send.is_active()
    }

    /// Output buffer referenced by the in-flight transfer.
    #[inline]
    pub fn active_source(&self) -> Option<OutputId> {
        self.send.source()
    }

    /// Whether the peer has closed its sending side.
    #[inline]
    pub fn input_closed(&self) -> bool {
        self.input_closed
    }

    pub(crate) fn mark_input_closed(&mut self) {
        self.input_closed = true;
    }

    /// Peer is done and nothing borrows an output buffer any more.
    #[inline]
    pub fn can_close(&self) -> bool {
        self.input_closed && !self.send.is_active()
    }
}
