//! Host TCP adapter running the bridge on a tokio socket.
//!
//! Maps socket readiness onto bridge events in a single-threaded loop:
//! - readable -> `Received` / `PeerClosed`
//! - writable and bytes written -> `SendWindow`
//! - listener accept while a client is active -> `Accepted` (rejected)
//!
//! A closed session keeps writing until its queue is empty before the next
//! client is accepted.
//!
//! Outbound bytes are copied into a bounded queue that stands in for the
//! stack's send buffer; its free space is the send window. While the ring is
//! full the refused tail is parked in an [`RxBacklog`] and the socket is not
//! read, so the kernel's receive buffer closes the TCP window on the client.
//!
//! # Example
//!
//! ```ignore
//! use framebridge::config::BridgeConfig;
//! use framebridge::hal::{CoherentCache, SoftwareEngine};
//! use framebridge::transport::{bind, serve};
//! use framebridge::BridgeBuilder;
//!
//! let config = BridgeConfig::default();
//! let engine = SoftwareEngine::new(config.input, config.output);
//! let mut bridge = BridgeBuilder::new().config(config.clone()).build(engine, CoherentCache)?;
//! let listener = bind(&config).await?;
//! serve(&listener, &mut bridge).await?;
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::backpressure::RxBacklog;
use crate::bridge::{Bridge, Event, Outcome};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::hal::{CacheOps, TransformEngine, Transport, TransportError};

/// Socket read size per readiness event.
const READ_CHUNK: usize = 16 * 1024;

/// Re-poll interval while frames wait for the pipeline.
const IDLE_TICK: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Outbound {
    queue: BytesMut,
    capacity: usize,
    close_requested: bool,
    acknowledged: u64,
}

/// [`Transport`] handle for one accepted TCP client.
///
/// The socket itself stays with the serving loop; the handle only queues
/// bytes and records requests, like a raw-API connection control block.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    shared: Rc<RefCell<Outbound>>,
}

impl TcpTransport {
    /// Create a handle with `send_buffer` bytes of send window.
    pub fn new(send_buffer: usize) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Outbound {
                queue: BytesMut::with_capacity(send_buffer),
                capacity: send_buffer,
                close_requested: false,
                acknowledged: 0,
            })),
        }
    }

    /// Bytes queued but not yet written to the socket.
    pub fn queued(&self) -> usize {
        self.shared.borrow().queue.len()
    }

    /// Whether the bridge asked for the connection to be closed.
    pub fn close_requested(&self) -> bool {
        self.shared.borrow().close_requested
    }

    /// Total received bytes the bridge consumed.
    pub fn acknowledged(&self) -> u64 {
        self.shared.borrow().acknowledged
    }

    /// Write as much queued data as the socket takes without blocking.
    fn drain_into(&self, stream: &TcpStream) -> std::io::Result<usize> {
        let mut out = self.shared.borrow_mut();
        let mut written = 0;
        while !out.queue.is_empty() {
            match stream.try_write(&out.queue) {
                Ok(0) => {
                    return Err(std::io::Error::from(std::io::ErrorKind::WriteZero));
                }
                Ok(n) => {
                    out.queue.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    fn discard_queue(&self) {
        self.shared.borrow_mut().queue.clear();
    }
}

impl Transport for TcpTransport {
    fn enqueue(&mut self, data: &[u8]) -> std::result::Result<usize, TransportError> {
        let mut out = self.shared.borrow_mut();
        if out.close_requested {
            return Err(TransportError::Closed);
        }
        let room = out.capacity - out.queue.len();
        let n = data.len().min(room);
        out.queue.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::result::Result<(), TransportError> {
        // The serving loop writes whenever the socket is writable.
        Ok(())
    }

    fn send_window(&self) -> usize {
        let out = self.shared.borrow();
        out.capacity - out.queue.len()
    }

    fn acknowledge(&mut self, len: usize) {
        self.shared.borrow_mut().acknowledged += len as u64;
    }

    fn close(&mut self) {
        self.shared.borrow_mut().close_requested = true;
    }
}

/// Bind the listener on all interfaces at the configured port.
pub async fn bind(config: &BridgeConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "Server listening");
    Ok(listener)
}

/// Serve clients one after another, forever.
pub async fn serve<E, C>(
    listener: &TcpListener,
    bridge: &mut Bridge<TcpTransport, E, C>,
) -> Result<()>
where
    E: TransformEngine,
    C: CacheOps,
{
    loop {
        if let Err(e) = serve_one(listener, bridge).await {
            tracing::error!("Session ended with error: {}", e);
        }
    }
}

/// Accept one client and run it until its connection is closed.
pub async fn serve_one<E, C>(
    listener: &TcpListener,
    bridge: &mut Bridge<TcpTransport, E, C>,
) -> Result<()>
where
    E: TransformEngine,
    C: CacheOps,
{
    tracing::info!("Waiting for client connection...");
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    tracing::info!(%peer, "Client accepted");

    let send_buffer = bridge.config().send_buffer;
    let transport = TcpTransport::new(send_buffer);
    if bridge.handle(Event::Accepted(transport.clone()))? != Outcome::Connected {
        return Ok(());
    }

    let result = run_session(listener, stream, &transport, bridge).await;
    if result.is_err() && bridge.is_connected() {
        transport.discard_queue();
        bridge.handle(Event::Aborted)?;
    }
    result
}

async fn run_session<E, C>(
    listener: &TcpListener,
    mut stream: TcpStream,
    transport: &TcpTransport,
    bridge: &mut Bridge<TcpTransport, E, C>,
) -> Result<()>
where
    E: TransformEngine,
    C: CacheOps,
{
    let send_buffer = bridge.config().send_buffer;
    let mut backlog = RxBacklog::new();
    let mut read_buf = vec![0u8; READ_CHUNK];
    let mut input_open = true;

    loop {
        if !backlog.is_empty() && !bridge.ring().is_full() {
            match bridge.handle(Event::Received(backlog.pending()))? {
                Outcome::Consumed(ingest) => backlog.consume(ingest.accepted),
                _ => backlog.clear(),
            }
        }

        if let Err(e) = bridge.poll() {
            tracing::warn!("Pipeline pass failed: {}", e);
        }

        if !bridge.is_connected() && transport.queued() == 0 {
            break;
        }

        let want_read = input_open && backlog.is_empty() && bridge.is_connected();
        let want_write = transport.queued() > 0;
        let want_tick =
            bridge.has_pending_work() || !backlog.is_empty() || (!want_read && !want_write);

        tokio::select! {
            ready = stream.readable(), if want_read => {
                ready?;
                match stream.try_read(&mut read_buf) {
                    Ok(0) => {
                        input_open = false;
                        bridge.handle(Event::PeerClosed)?;
                    }
                    Ok(n) => {
                        let chunk = &read_buf[..n];
                        if let Outcome::Consumed(ingest) = bridge.handle(Event::Received(chunk))? {
                            backlog.hold(ingest.remainder(chunk));
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e.into()),
                }
            }
            ready = stream.writable(), if want_write => {
                ready?;
                if transport.drain_into(&stream)? > 0 && bridge.is_connected() {
                    match bridge.handle(Event::SendWindow) {
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Send aborted: {}", e),
                    }
                }
            }
            // Once torn down, later clients wait in the backlog for the next session.
            accepted = listener.accept(), if bridge.is_connected() => {
                let (extra, peer) = accepted?;
                tracing::warn!(%peer, "Only one client is supported");
                bridge.handle(Event::Accepted(TcpTransport::new(send_buffer)))?;
                drop(extra);
            }
            _ = tokio::time::sleep(IDLE_TICK), if want_tick => {}
        }
    }

    if let Err(e) = stream.shutdown().await {
        tracing::debug!("Socket shutdown failed: {}", e);
    }
    tracing::info!(
        bytes = transport.acknowledged(),
        stalls = backlog.stalls(),
        "Connection closed"
    );
    Ok(())
}
