//! Bridge builder and event dispatcher.
//!
//! The [`BridgeBuilder`] provides a fluent API for configuring the pipeline.
//! The [`Bridge`] is a single state machine fed two ways:
//! 1. Transport notifications, delivered as [`Event`]s to [`Bridge::handle`]
//! 2. Scheduling passes from the main loop via [`Bridge::poll`]
//!
//! Both run to completion and are strictly serialized by the caller; no
//! locking is involved anywhere.
//!
//! # Example
//!
//! ```
//! use framebridge::config::FrameGeometry;
//! use framebridge::hal::{CoherentCache, SoftwareEngine};
//! use framebridge::testing::MemoryTransport;
//! use framebridge::{Bridge, BridgeBuilder, Event};
//!
//! let input = FrameGeometry::new(4, 1, 1);
//! let output = FrameGeometry::new(4, 1, 1);
//! let mut bridge: Bridge<MemoryTransport, _> = BridgeBuilder::new()
//!     .input_geometry(input)
//!     .output_geometry(output)
//!     .ring_slots(2)
//!     .build(SoftwareEngine::new(input, output), CoherentCache)
//!     .unwrap();
//!
//! let client = MemoryTransport::unlimited();
//! bridge.handle(Event::Accepted(client.clone())).unwrap();
//! bridge.handle(Event::Received(b"ABCD")).unwrap();
//! bridge.poll().unwrap();
//!
//! assert_eq!(client.sent(), b"ABCD");
//! ```

use serde::Serialize;

use crate::config::{BridgeConfig, FaultPolicy, FrameGeometry};
use crate::connection::Connection;
use crate::error::{BridgeError, Result};
use crate::hal::{CacheOps, CoherentCache, TransformEngine, Transport};
use crate::ingress::{FrameRing, Ingest, Reassembler};
use crate::pipeline::{Fault, OutputId, Pipeline, Tick};
use crate::sender::{send_blocking, AsyncSender, SendProgress};

/// Transport notification.
#[derive(Debug)]
pub enum Event<'a, T> {
    /// A client connected.
    Accepted(T),
    /// In-order bytes from the client.
    Received(&'a [u8]),
    /// The send window grew; resume any pending send.
    SendWindow,
    /// The client closed its sending side.
    PeerClosed,
    /// The connection died underneath us (reset, stack error).
    Aborted,
}

/// What the bridge did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The client became the active connection.
    Connected,
    /// A client arrived while another was active; it was closed.
    Rejected,
    /// Received bytes were ingested. Only `accepted` bytes were consumed.
    Consumed(Ingest),
    /// The pending send advanced.
    Sent(SendProgress),
    /// Close deferred until the in-flight send completes.
    Deferred,
    /// The connection was torn down.
    Closed,
    /// No connection (or nothing to do) for this event.
    Ignored,
}

/// Running counters, reported as JSON when a client disconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub connections: u64,
    pub rejected: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub stalls: u64,
    pub frames_received: u64,
    pub frames_transformed: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub transform_faults: u64,
    pub send_failures: u64,
    pub sends_aborted: u64,
}

/// Builder for configuring and creating a [`Bridge`].
#[derive(Debug, Clone, Default)]
pub struct BridgeBuilder {
    config: BridgeConfig,
}

impl BridgeBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Geometry of frames arriving from the client.
    pub fn input_geometry(mut self, geometry: FrameGeometry) -> Self {
        self.config.input = geometry;
        self
    }

    /// Geometry of frames produced by the engine.
    pub fn output_geometry(mut self, geometry: FrameGeometry) -> Self {
        self.config.output = geometry;
        self
    }

    /// Number of receive frame slots.
    ///
    /// Default: 10
    pub fn ring_slots(mut self, slots: usize) -> Self {
        self.config.ring_slots = slots;
        self
    }

    /// Largest single write handed to the transport.
    ///
    /// Default: 1460
    pub fn tx_chunk(mut self, bytes: usize) -> Self {
        self.config.tx_chunk = bytes;
        self
    }

    /// Busy polls allowed per DMA direction.
    pub fn dma_spin_limit(mut self, polls: u32) -> Self {
        self.config.dma_spin_limit = polls;
        self
    }

    /// Window polls allowed per chunk in blocking send mode.
    pub fn legacy_poll_budget(mut self, polls: u32) -> Self {
        self.config.legacy_poll_budget = polls;
        self
    }

    /// What to do with frames whose transform failed.
    ///
    /// Default: [`FaultPolicy::Discard`]
    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.config.fault_policy = policy;
        self
    }

    /// Validate the configuration and allocate every buffer.
    pub fn build<T, E, C>(self, engine: E, cache: C) -> Result<Bridge<T, E, C>>
    where
        T: Transport,
        E: TransformEngine,
        C: CacheOps,
    {
        Bridge::new(self.config, engine, cache)
    }
}

/// Frame bridge: ingress ring, transform pipeline and async sender around
/// at most one client connection.
#[derive(Debug)]
pub struct Bridge<T, E, C = CoherentCache> {
    config: BridgeConfig,
    ring: FrameRing,
    reassembler: Reassembler,
    pipeline: Pipeline<E, C>,
    sender: AsyncSender,
    connection: Option<Connection<T>>,
    stats: BridgeStats,
}

impl<T, E, C> Bridge<T, E, C>
where
    T: Transport,
    E: TransformEngine,
    C: CacheOps,
{
    /// Validate `config` and allocate the ring and output buffers once.
    pub fn new(config: BridgeConfig, engine: E, cache: C) -> Result<Self> {
        config.validate()?;

        let ring = FrameRing::new(config.ring_slots, config.input.frame_bytes())?;
        let pipeline = Pipeline::new(
            engine,
            cache,
            config.output.frame_bytes(),
            config.dma_spin_limit,
            config.fault_policy,
        );
        let sender = AsyncSender::new(config.tx_chunk);

        Ok(Self {
            config,
            ring,
            reassembler: Reassembler::new(),
            pipeline,
            sender,
            connection: None,
            stats: BridgeStats::default(),
        })
    }

    /// Dispatch one transport notification.
    ///
    /// Hard send failures are returned as errors after the send state has
    /// been cleared; the bridge stays usable.
    pub fn handle(&mut self, event: Event<'_, T>) -> Result<Outcome> {
        match event {
            Event::Accepted(transport) => Ok(self.on_accept(transport)),
            Event::Received(chunk) => Ok(self.on_receive(chunk)),
            Event::SendWindow => self.on_send_window(),
            Event::PeerClosed => Ok(self.on_peer_closed()),
            Event::Aborted => Ok(self.on_aborted()),
        }
    }

    fn on_accept(&mut self, mut transport: T) -> Outcome {
        if self.connection.is_some() {
            tracing::warn!("Client connected while another is active, rejecting");
            transport.close();
            self.stats.rejected += 1;
            return Outcome::Rejected;
        }

        tracing::info!("Client connected");
        self.reassembler.reset();
        self.connection = Some(Connection::new(transport));
        self.stats.connections += 1;
        Outcome::Connected
    }

    fn on_receive(&mut self, chunk: &[u8]) -> Outcome {
        let Some(conn) = self.connection.as_mut() else {
            tracing::warn!(bytes = chunk.len(), "Data without a connection, ignoring");
            return Outcome::Ignored;
        };

        let ingest = self
            .reassembler
            .ingest(&mut self.ring, self.pipeline.cache(), chunk);
        if ingest.accepted > 0 {
            conn.transport.acknowledge(ingest.accepted);
        }

        self.stats.bytes_in += ingest.accepted as u64;
        self.stats.frames_received += ingest.completed as u64;
        if ingest.stalled {
            self.stats.stalls += 1;
        }
        Outcome::Consumed(ingest)
    }

    fn on_send_window(&mut self) -> Result<Outcome> {
        let Some(conn) = self.connection.as_mut() else {
            return Ok(Outcome::Ignored);
        };

        let result = self
            .sender
            .on_window_available(conn, self.pipeline.outputs());
        let outcome = match result {
            Ok(Some(progress)) => {
                self.record_progress(progress);
                Outcome::Sent(progress)
            }
            Ok(None) => Outcome::Ignored,
            Err(e) => {
                self.stats.send_failures += 1;
                self.reap();
                return Err(e);
            }
        };

        if self.reap() {
            return Ok(Outcome::Closed);
        }
        Ok(outcome)
    }

    fn on_peer_closed(&mut self) -> Outcome {
        let Some(conn) = self.connection.as_mut() else {
            return Outcome::Ignored;
        };

        conn.mark_input_closed();
        if conn.is_sending() {
            tracing::info!("Client closed RX, deferring close until send completes");
            return Outcome::Deferred;
        }

        tracing::info!("Client closed RX");
        self.teardown(true);
        Outcome::Closed
    }

    fn on_aborted(&mut self) -> Outcome {
        if self.connection.is_none() {
            return Outcome::Ignored;
        }
        tracing::warn!("Connection aborted");
        self.teardown(false);
        Outcome::Closed
    }

    /// Run one pipeline scheduling pass.
    pub fn poll(&mut self) -> Result<Tick> {
        let result = self
            .pipeline
            .poll(&mut self.ring, self.connection.as_mut(), &self.sender);

        let tick = match result {
            Ok(tick) => tick,
            Err(e) => {
                tracing::warn!("TX incomplete: {}", e);
                self.stats.send_failures += 1;
                self.reap();
                return Err(e);
            }
        };

        match &tick {
            Tick::Dispatched { progress, .. } => {
                self.stats.frames_transformed += 1;
                self.record_progress(*progress);
            }
            Tick::Dropped { .. } => {
                self.stats.transform_faults += 1;
                self.stats.frames_dropped += 1;
            }
            Tick::Held { .. } => self.stats.transform_faults += 1,
            _ => {}
        }
        self.reap();
        Ok(tick)
    }

    /// Push `data` to the client synchronously, bypassing the pipeline.
    ///
    /// Blocks until every byte is queued. Refused while an async send is in
    /// flight so the two paths never interleave on the wire.
    pub fn send_blocking(&mut self, data: &[u8]) -> Result<usize> {
        let conn = self.connection.as_mut().ok_or(BridgeError::NotConnected)?;
        if conn.is_sending() {
            return Err(BridgeError::SendInProgress);
        }

        let sent = send_blocking(
            &mut conn.transport,
            data,
            self.config.tx_chunk,
            self.config.legacy_poll_budget,
        )?;
        self.stats.bytes_out += sent as u64;
        Ok(sent)
    }

    /// Clear a held transform fault, discarding its frame.
    pub fn acknowledge_fault(&mut self) -> Option<Fault> {
        let fault = self.pipeline.acknowledge_fault(&mut self.ring)?;
        self.stats.frames_dropped += 1;
        Some(fault)
    }

    fn record_progress(&mut self, progress: SendProgress) {
        if let SendProgress::Complete { bytes } = progress {
            self.stats.frames_sent += 1;
            self.stats.bytes_out += bytes as u64;
        }
    }

    /// Tear the connection down if the peer is gone and no send is active.
    fn reap(&mut self) -> bool {
        if self.connection.as_ref().is_some_and(|c| c.can_close()) {
            tracing::info!("Send finished, completing deferred close");
            self.teardown(true);
            return true;
        }
        false
    }

    fn teardown(&mut self, close: bool) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };

        if let Some(pending) = self.sender.abort(&mut conn) {
            tracing::warn!(
                queued = pending.queued,
                total = pending.len,
                "Discarding in-flight send"
            );
            self.stats.sends_aborted += 1;
        }
        if close {
            conn.transport.close();
        }

        let discarded = self.ring.discard_partial();
        if discarded > 0 {
            tracing::debug!(bytes = discarded, "Dropped partial frame");
        }
        self.reassembler.reset();

        match serde_json::to_string(&self.stats) {
            Ok(json) => tracing::info!(stats = %json, "Client disconnected"),
            Err(e) => tracing::warn!("Client disconnected (stats unavailable: {})", e),
        }
    }

    /// Whether a client is connected.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Whether the connection is waiting for a send to finish before closing.
    #[inline]
    pub fn is_closing(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.input_closed())
    }

    /// Output buffer referenced by the in-flight send.
    #[inline]
    pub fn active_send_source(&self) -> Option<OutputId> {
        self.connection.as_ref().and_then(|c| c.active_source())
    }

    /// Output buffer the next transform will write.
    #[inline]
    pub fn next_output(&self) -> OutputId {
        self.pipeline
            .outputs()
            .select_target(self.active_send_source())
    }

    /// Whether a scheduling pass would do work right now.
    pub fn has_pending_work(&self) -> bool {
        self.ring.count() > 0
            && self.pipeline.fault().is_none()
            && self.connection.as_ref().is_some_and(|c| !c.is_sending())
    }

    #[inline]
    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    #[inline]
    pub fn pipeline(&self) -> &Pipeline<E, C> {
        &self.pipeline
    }

    #[inline]
    pub fn engine(&self) -> &E {
        self.pipeline.engine()
    }

    #[inline]
    pub fn transport(&self) -> Option<&T> {
        self.connection.as_ref().map(|c| c.transport())
    }

    #[inline]
    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    #[inline]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{SoftwareEngine, TransportError};
    use crate::ingress::SlotStatus;
    use crate::testing::MemoryTransport;

    const GEOMETRY: FrameGeometry = FrameGeometry::new(4, 1, 1);

    fn bridge(slots: usize) -> Bridge<MemoryTransport, SoftwareEngine> {
        BridgeBuilder::new()
            .input_geometry(GEOMETRY)
            .output_geometry(GEOMETRY)
            .ring_slots(slots)
            .tx_chunk(3)
            .build(SoftwareEngine::new(GEOMETRY, GEOMETRY), CoherentCache)
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result: Result<Bridge<MemoryTransport, SoftwareEngine>> = BridgeBuilder::new()
            .ring_slots(0)
            .build(SoftwareEngine::new(GEOMETRY, GEOMETRY), CoherentCache);
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_builder_configuration() {
        let builder = BridgeBuilder::new()
            .ring_slots(3)
            .tx_chunk(512)
            .dma_spin_limit(10)
            .legacy_poll_budget(20)
            .fault_policy(FaultPolicy::Hold);

        assert_eq!(builder.config.ring_slots, 3);
        assert_eq!(builder.config.tx_chunk, 512);
        assert_eq!(builder.config.dma_spin_limit, 10);
        assert_eq!(builder.config.legacy_poll_budget, 20);
        assert_eq!(builder.config.fault_policy, FaultPolicy::Hold);
    }

    #[test]
    fn test_second_accept_rejected() {
        let mut b = bridge(2);
        let first = MemoryTransport::unlimited();
        let second = MemoryTransport::unlimited();

        assert_eq!(b.handle(Event::Accepted(first.clone())).unwrap(), Outcome::Connected);
        assert_eq!(b.handle(Event::Accepted(second.clone())).unwrap(), Outcome::Rejected);

        assert!(second.is_closed());
        assert!(!first.is_closed());
        assert_eq!(b.stats().rejected, 1);
    }

    #[test]
    fn test_receive_without_connection_ignored() {
        let mut b = bridge(2);
        assert_eq!(b.handle(Event::Received(b"ABCD")).unwrap(), Outcome::Ignored);
        assert_eq!(b.ring().count(), 0);
    }

    #[test]
    fn test_receive_acknowledges_only_copied_bytes() {
        let mut b = bridge(1);
        let client = MemoryTransport::unlimited();
        b.handle(Event::Accepted(client.clone())).unwrap();

        let outcome = b.handle(Event::Received(b"ABCDEF")).unwrap();
        let Outcome::Consumed(ingest) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(ingest.accepted, 4);
        assert!(ingest.stalled);
        assert_eq!(client.acknowledged(), 4);
        assert_eq!(b.stats().stalls, 1);
    }

    #[test]
    fn test_peer_close_deferred_while_sending() {
        let mut b = bridge(2);
        let client = MemoryTransport::new(2);
        b.handle(Event::Accepted(client.clone())).unwrap();
        b.handle(Event::Received(b"WXYZ")).unwrap();
        b.poll().unwrap();
        assert!(b.active_send_source().is_some());

        assert_eq!(b.handle(Event::PeerClosed).unwrap(), Outcome::Deferred);
        assert!(b.is_connected());
        assert!(b.is_closing());
        assert!(!client.is_closed());

        client.set_window(2);
        assert_eq!(b.handle(Event::SendWindow).unwrap(), Outcome::Closed);
        assert!(!b.is_connected());
        assert!(client.is_closed());
        assert_eq!(client.sent(), b"WXYZ");
        assert_eq!(b.stats().frames_sent, 1);
    }

    #[test]
    fn test_close_twice_is_idempotent() {
        let mut b = bridge(3);
        let client = MemoryTransport::unlimited();
        b.handle(Event::Accepted(client.clone())).unwrap();
        b.handle(Event::Received(b"ABCDEFGHIJ")).unwrap();
        assert_eq!(b.ring().count(), 2);

        assert_eq!(b.handle(Event::PeerClosed).unwrap(), Outcome::Closed);
        assert_eq!(b.handle(Event::PeerClosed).unwrap(), Outcome::Ignored);
        assert_eq!(b.handle(Event::Aborted).unwrap(), Outcome::Ignored);

        assert_eq!(client.close_calls(), 1);
        assert_eq!(b.ring().count(), 2);
        assert_eq!(b.ring().status(2), Some(SlotStatus::Empty));
        assert_eq!(b.ring().fill_level(), 0);

        let next = MemoryTransport::unlimited();
        assert_eq!(b.handle(Event::Accepted(next)).unwrap(), Outcome::Connected);
    }

    #[test]
    fn test_abort_discards_in_flight_send() {
        let mut b = bridge(2);
        let client = MemoryTransport::new(1);
        b.handle(Event::Accepted(client.clone())).unwrap();
        b.handle(Event::Received(b"ABCD")).unwrap();
        b.poll().unwrap();
        assert!(b.active_send_source().is_some());

        assert_eq!(b.handle(Event::Aborted).unwrap(), Outcome::Closed);
        assert_eq!(b.active_send_source(), None);
        assert_eq!(client.close_calls(), 0);
        assert_eq!(b.stats().sends_aborted, 1);
        assert_eq!(b.ring().count(), 0);
    }

    #[test]
    fn test_hard_send_error_surfaces() {
        let mut b = bridge(2);
        let client = MemoryTransport::new(1);
        b.handle(Event::Accepted(client.clone())).unwrap();
        b.handle(Event::Received(b"ABCD")).unwrap();
        b.poll().unwrap();

        client.fail_next(TransportError::Io(std::io::ErrorKind::Other));
        client.set_window(8);
        let result = b.handle(Event::SendWindow);

        assert!(matches!(result, Err(BridgeError::Transport(_))));
        assert_eq!(b.active_send_source(), None);
        assert_eq!(b.stats().send_failures, 1);
        assert!(b.is_connected());
    }

    #[test]
    fn test_send_window_when_idle_ignored() {
        let mut b = bridge(2);
        assert_eq!(b.handle(Event::SendWindow).unwrap(), Outcome::Ignored);
        b.handle(Event::Accepted(MemoryTransport::unlimited())).unwrap();
        assert_eq!(b.handle(Event::SendWindow).unwrap(), Outcome::Ignored);
    }

    #[test]
    fn test_blocking_send_path() {
        let mut b = bridge(2);
        assert!(matches!(b.send_blocking(b"x"), Err(BridgeError::NotConnected)));

        let client = MemoryTransport::unlimited();
        b.handle(Event::Accepted(client.clone())).unwrap();
        assert_eq!(b.send_blocking(b"hello world").unwrap(), 11);
        assert_eq!(client.sent(), b"hello world");
        assert_eq!(client.writes(), 4);
    }

    #[test]
    fn test_stats_serialize() {
        let stats = BridgeStats {
            frames_sent: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["frames_sent"], 3);
        assert_eq!(json["stalls"], 0);
    }
}
