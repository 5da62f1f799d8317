//! Transform pipeline: ready frame -> accelerator -> outbound send.
//!
//! One scheduling pass ([`Pipeline::poll`]) does at most one frame:
//!
//! 1. Nothing happens while the connection has a send in flight, while no
//!    client is connected, or while a held fault awaits acknowledgement.
//! 2. The oldest ready frame is peeked (not popped).
//! 3. The input slot is flushed, the transform submitted into the output
//!    buffer not referenced by any send, both DMA directions awaited with a
//!    bounded poll budget, and the output invalidated.
//! 4. The send is started. Only once it has been initiated is the input
//!    slot popped and the output selector flipped.
//!
//! Popping after initiation (rather than after completion) lets ingress
//! refill the slot while the result is still draining to the client.

use crate::config::FaultPolicy;
use crate::connection::Connection;
use crate::error::Result;
use crate::hal::{wait_idle, CacheOps, Direction, DmaError, TransformEngine, Transport};
use crate::ingress::FrameRing;
use crate::sender::{AsyncSender, SendProgress};

/// Index into the output buffer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputId {
    Primary,
    Secondary,
}

impl OutputId {
    /// The other buffer of the pair.
    #[inline]
    pub fn other(self) -> Self {
        match self {
            OutputId::Primary => OutputId::Secondary,
            OutputId::Secondary => OutputId::Primary,
        }
    }

    #[inline]
    fn index(self) -> usize {
        match self {
            OutputId::Primary => 0,
            OutputId::Secondary => 1,
        }
    }
}

/// Two output frame buffers with a "current" selector.
#[derive(Debug)]
pub struct OutputPair {
    buffers: [Box<[u8]>; 2],
    current: OutputId,
}

impl OutputPair {
    /// Allocate two buffers of `frame_len` bytes.
    pub fn new(frame_len: usize) -> Self {
        Self {
            buffers: [
                vec![0u8; frame_len].into_boxed_slice(),
                vec![0u8; frame_len].into_boxed_slice(),
            ],
            current: OutputId::Primary,
        }
    }

    /// Buffer the next transform will target.
    #[inline]
    pub fn current(&self) -> OutputId {
        self.current
    }

    /// Switch the selector to the other buffer.
    #[inline]
    pub fn flip(&mut self) {
        self.current = self.current.other();
    }

    /// Choose a transform target that is not `in_flight`.
    #[inline]
    pub fn select_target(&self, in_flight: Option<OutputId>) -> OutputId {
        match in_flight {
            Some(busy) if busy == self.current => self.current.other(),
            _ => self.current,
        }
    }

    #[inline]
    pub fn get(&self, id: OutputId) -> &[u8] {
        &self.buffers[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: OutputId) -> &mut [u8] {
        &mut self.buffers[id.index()]
    }

    #[inline]
    pub fn frame_len(&self) -> usize {
        self.buffers[0].len()
    }
}

/// A transform failure held for operator acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Ring slot whose frame failed.
    pub slot: usize,
    pub error: DmaError,
}

/// Outcome of one scheduling pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// No client to send results to.
    Disconnected,
    /// A send is still in flight.
    Busy,
    /// No ready frame.
    Idle,
    /// Transform failed and the frame is now held until acknowledged.
    Held { slot: usize, error: DmaError },
    /// A previously held fault still blocks scheduling.
    Faulted { slot: usize },
    /// Frame transformed and its send initiated; the slot was released.
    Dispatched {
        slot: usize,
        output: OutputId,
        progress: SendProgress,
    },
    /// Transform failed and the frame was discarded.
    Dropped { slot: usize, error: DmaError },
}

/// Drives frames from the ring through the transform engine.
#[derive(Debug)]
pub struct Pipeline<E, C> {
    engine: E,
    cache: C,
    outputs: OutputPair,
    spin_limit: u32,
    policy: FaultPolicy,
    fault: Option<Fault>,
}

impl<E, C> Pipeline<E, C>
where
    E: TransformEngine,
    C: CacheOps,
{
    pub fn new(
        engine: E,
        cache: C,
        output_len: usize,
        spin_limit: u32,
        policy: FaultPolicy,
    ) -> Self {
        Self {
            engine,
            cache,
            outputs: OutputPair::new(output_len),
            spin_limit,
            policy,
            fault: None,
        }
    }

    /// Run one non-blocking scheduling pass.
    ///
    /// Only the wait for DMA completion blocks, bounded by the spin limit.
    /// A failed send initiation is returned as an error; the frame then
    /// stays in the ring for the next pass.
    pub fn poll<T: Transport>(
        &mut self,
        ring: &mut FrameRing,
        conn: Option<&mut Connection<T>>,
        sender: &AsyncSender,
    ) -> Result<Tick> {
        if let Some(fault) = &self.fault {
            return Ok(Tick::Faulted { slot: fault.slot });
        }
        let Some(conn) = conn else {
            return Ok(Tick::Disconnected);
        };
        if conn.is_sending() {
            return Ok(Tick::Busy);
        }
        let Some((slot, input)) = ring.try_peek_ready() else {
            return Ok(Tick::Idle);
        };

        let target = self.outputs.select_target(conn.active_source());
        tracing::debug!(slot, ?target, "Frame received, processing");

        let transformed = transform(
            &mut self.engine,
            &self.cache,
            self.outputs.get_mut(target),
            input,
            self.spin_limit,
        );
        if let Err(error) = transformed {
            return Ok(self.on_fault(ring, slot, error));
        }

        let len = self.outputs.frame_len();
        let progress = sender.start_send(Some(conn), &self.outputs, target, len)?;

        ring.pop();
        self.outputs.current = target.other();
        tracing::debug!(slot, ?target, "DMA done, result sending");

        Ok(Tick::Dispatched {
            slot,
            output: target,
            progress,
        })
    }

    fn on_fault(&mut self, ring: &mut FrameRing, slot: usize, error: DmaError) -> Tick {
        match self.policy {
            FaultPolicy::Discard => {
                tracing::error!(slot, "Transform failed, dropping frame: {}", error);
                ring.pop();
                Tick::Dropped { slot, error }
            }
            FaultPolicy::Hold => {
                tracing::error!(slot, "Transform failed, holding frame: {}", error);
                self.fault = Some(Fault {
                    slot,
                    error: error.clone(),
                });
                Tick::Held { slot, error }
            }
        }
    }

    /// Clear a held fault, discarding the frame that caused it.
    pub fn acknowledge_fault(&mut self, ring: &mut FrameRing) -> Option<Fault> {
        let fault = self.fault.take()?;
        if ring.try_peek_ready().map(|(idx, _)| idx) == Some(fault.slot) {
            ring.pop();
        }
        tracing::info!(slot = fault.slot, "Fault acknowledged");
        Some(fault)
    }

    #[inline]
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    #[inline]
    pub fn outputs(&self) -> &OutputPair {
        &self.outputs
    }

    #[inline]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[inline]
    pub fn cache(&self) -> &C {
        &self.cache
    }
}

/// Run one frame through the engine with cache maintenance around it.
fn transform<E, C>(
    engine: &mut E,
    cache: &C,
    output: &mut [u8],
    input: &[u8],
    spin_limit: u32,
) -> std::result::Result<(), DmaError>
where
    E: TransformEngine,
    C: CacheOps,
{
    cache.flush(input);
    engine.submit(input, output)?;

    wait_idle(engine, Direction::FromDevice, spin_limit)?;
    wait_idle(engine, Direction::ToDevice, spin_limit)?;

    cache.invalidate(output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameGeometry;
    use crate::hal::{CoherentCache, SoftwareEngine};
    use crate::ingress::Reassembler;
    use crate::testing::MemoryTransport;

    const IN: FrameGeometry = FrameGeometry::new(4, 1, 1);
    const OUT: FrameGeometry = FrameGeometry::new(4, 1, 2);

    fn pipeline(policy: FaultPolicy) -> Pipeline<SoftwareEngine, CoherentCache> {
        Pipeline::new(
            SoftwareEngine::with_latency(IN, OUT, 3),
            CoherentCache,
            OUT.frame_bytes(),
            1_000,
            policy,
        )
    }

    fn ring_with(frames: &[&[u8]]) -> FrameRing {
        let mut ring = FrameRing::new(4, IN.frame_bytes()).unwrap();
        let mut r = Reassembler::new();
        for frame in frames {
            r.ingest(&mut ring, &CoherentCache, frame);
        }
        ring
    }

    #[test]
    fn test_output_pair_selection() {
        let mut pair = OutputPair::new(4);
        assert_eq!(pair.current(), OutputId::Primary);
        assert_eq!(pair.select_target(None), OutputId::Primary);
        assert_eq!(pair.select_target(Some(OutputId::Primary)), OutputId::Secondary);
        assert_eq!(pair.select_target(Some(OutputId::Secondary)), OutputId::Primary);

        pair.flip();
        assert_eq!(pair.current(), OutputId::Secondary);
        assert_eq!(pair.frame_len(), 4);
    }

    #[test]
    fn test_poll_without_connection() {
        let mut p = pipeline(FaultPolicy::Discard);
        let mut ring = ring_with(&[b"ABCD"]);
        let tick = p
            .poll::<MemoryTransport>(&mut ring, None, &AsyncSender::new(8))
            .unwrap();

        assert_eq!(tick, Tick::Disconnected);
        assert_eq!(ring.count(), 1);
    }

    #[test]
    fn test_poll_idle_without_frames() {
        let mut p = pipeline(FaultPolicy::Discard);
        let mut ring = ring_with(&[b"AB"]);
        let mut conn = Connection::new(MemoryTransport::unlimited());

        let tick = p.poll(&mut ring, Some(&mut conn), &AsyncSender::new(8)).unwrap();
        assert_eq!(tick, Tick::Idle);
    }

    #[test]
    fn test_dispatch_pops_and_flips() {
        let mut p = pipeline(FaultPolicy::Discard);
        let mut ring = ring_with(&[b"ABCD", b"EFGH"]);
        let transport = MemoryTransport::unlimited();
        let mut conn = Connection::new(transport.clone());
        let sender = AsyncSender::new(8);

        let tick = p.poll(&mut ring, Some(&mut conn), &sender).unwrap();
        assert_eq!(
            tick,
            Tick::Dispatched {
                slot: 0,
                output: OutputId::Primary,
                progress: SendProgress::Complete { bytes: 8 },
            }
        );
        assert_eq!(ring.count(), 1);
        assert_eq!(p.outputs().current(), OutputId::Secondary);
        assert_eq!(transport.sent(), vec![0xFF, b'A', 0xFF, b'B', 0xFF, b'C', 0xFF, b'D']);

        let tick = p.poll(&mut ring, Some(&mut conn), &sender).unwrap();
        assert!(matches!(tick, Tick::Dispatched { slot: 1, output: OutputId::Secondary, .. }));
        assert_eq!(p.outputs().current(), OutputId::Primary);
    }

    #[test]
    fn test_busy_while_send_in_flight() {
        let mut p = pipeline(FaultPolicy::Discard);
        let mut ring = ring_with(&[b"ABCD", b"EFGH"]);
        let transport = MemoryTransport::new(3);
        let mut conn = Connection::new(transport.clone());
        let sender = AsyncSender::new(8);

        let tick = p.poll(&mut ring, Some(&mut conn), &sender).unwrap();
        assert!(matches!(
            tick,
            Tick::Dispatched { progress: SendProgress::Waiting { queued: 3, remaining: 5 }, .. }
        ));
        // Slot released as soon as the send was initiated
        assert_eq!(ring.count(), 1);
        assert_eq!(conn.active_source(), Some(OutputId::Primary));
        assert_ne!(p.outputs().current(), OutputId::Primary);

        assert_eq!(p.poll(&mut ring, Some(&mut conn), &sender).unwrap(), Tick::Busy);
        assert_eq!(ring.count(), 1);
    }

    #[test]
    fn test_failed_initiation_keeps_frame() {
        let mut p = pipeline(FaultPolicy::Discard);
        let mut ring = ring_with(&[b"ABCD"]);
        let transport = MemoryTransport::unlimited();
        transport.fail_next(crate::hal::TransportError::Closed);
        let mut conn = Connection::new(transport);

        let result = p.poll(&mut ring, Some(&mut conn), &AsyncSender::new(8));
        assert!(result.is_err());
        assert_eq!(ring.count(), 1);
        assert_eq!(p.outputs().current(), OutputId::Primary);
        assert!(!conn.is_sending());
    }

    #[test]
    fn test_discard_policy_drops_failed_frame() {
        let mut p = pipeline(FaultPolicy::Discard);
        p.engine().fail_next();
        let mut ring = ring_with(&[b"ABCD", b"EFGH"]);
        let transport = MemoryTransport::unlimited();
        let mut conn = Connection::new(transport.clone());
        let sender = AsyncSender::new(8);

        let tick = p.poll(&mut ring, Some(&mut conn), &sender).unwrap();
        assert!(matches!(tick, Tick::Dropped { slot: 0, error: DmaError::Submit { .. } }));
        assert_eq!(ring.count(), 1);
        assert!(transport.sent().is_empty());

        let tick = p.poll(&mut ring, Some(&mut conn), &sender).unwrap();
        assert!(matches!(tick, Tick::Dispatched { slot: 1, .. }));
    }

    #[test]
    fn test_hold_policy_waits_for_acknowledge() {
        let mut p = pipeline(FaultPolicy::Hold);
        p.engine().hang_next();
        let mut ring = ring_with(&[b"ABCD", b"EFGH"]);
        let mut conn = Connection::new(MemoryTransport::unlimited());
        let sender = AsyncSender::new(8);

        let tick = p.poll(&mut ring, Some(&mut conn), &sender).unwrap();
        assert!(matches!(
            tick,
            Tick::Held { slot: 0, error: DmaError::Timeout { direction: Direction::FromDevice, .. } }
        ));
        assert_eq!(p.fault().unwrap().slot, 0);

        // Not retried automatically
        assert_eq!(p.poll(&mut ring, Some(&mut conn), &sender).unwrap(), Tick::Faulted { slot: 0 });
        assert_eq!(ring.count(), 2);

        let fault = p.acknowledge_fault(&mut ring).unwrap();
        assert_eq!(fault.slot, 0);
        assert_eq!(ring.count(), 1);
        assert!(p.acknowledge_fault(&mut ring).is_none());

        let tick = p.poll(&mut ring, Some(&mut conn), &sender).unwrap();
        assert!(matches!(tick, Tick::Dispatched { slot: 1, .. }));
    }
}
