//! Edges: transport-level sessions between this process and one remote.
//!
//! An edge is a live bidirectional frame channel produced by an
//! [`EdgeListener`]. Edges start dormant and queue inbound traffic until the
//! connection manager designates a sink; from then on frames flow to the
//! sink in arrival order, and the `Closed` signal is delivered exactly once,
//! after every frame. This makes the ordering NewEdge < frames < Closed
//! structural rather than a convention.

pub mod factory;
pub mod memory;
pub mod tcp;

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use lattice_core::Address;

use crate::error::NetResult;

pub use factory::EdgeFactory;
pub use memory::{MemoryHub, MemoryListener};
pub use tcp::TcpEdgeListener;

/// Process-unique identifier for an edge.
///
/// Close and frame callbacks carry this handle so they can locate their
/// table entries without holding the edge itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(u64);

impl EdgeId {
    /// Allocate the next process-unique edge id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge-{}", self.0)
    }
}

/// Which side initiated the underlying session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We initiated the session.
    Outbound,
    /// The remote connected to us.
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "outbound"),
            Direction::Inbound => write!(f, "inbound"),
        }
    }
}

/// Everything edges and listeners report to their consumer.
///
/// One channel carries all edge-sourced happenings so that per-edge ordering
/// is preserved by construction.
#[derive(Debug)]
pub enum EdgeEvent {
    /// A new edge (inbound or outbound) became usable.
    New(Arc<dyn Edge>),
    /// A frame was received on an edge.
    Frame {
        /// The receiving edge.
        edge: EdgeId,
        /// The opaque frame payload.
        frame: Bytes,
    },
    /// An edge closed. Delivered exactly once per edge, after its frames.
    Closed {
        /// The closed edge.
        edge: EdgeId,
        /// Why the edge closed.
        reason: String,
    },
    /// An outbound dial failed before producing an edge.
    CreationFailure {
        /// The address that was dialed.
        address: Address,
        /// Why the dial failed.
        reason: String,
    },
}

/// Consumer of edge events.
pub type EdgeSink = mpsc::UnboundedSender<EdgeEvent>;

/// A live bidirectional frame channel to one remote endpoint.
pub trait Edge: Send + Sync + fmt::Debug + fmt::Display {
    /// The edge's process-unique handle.
    fn id(&self) -> EdgeId;

    /// Which side initiated the session.
    fn direction(&self) -> Direction;

    /// Whether we initiated the session.
    fn is_outbound(&self) -> bool {
        self.direction() == Direction::Outbound
    }

    /// Whether the edge has been closed.
    fn is_closed(&self) -> bool;

    /// The remote endpoint this edge reaches.
    fn remote_address(&self) -> &Address;

    /// Designate the consumer of this edge's events and flush anything
    /// queued while the edge was dormant.
    fn set_sink(&self, sink: EdgeSink);

    /// Queue a frame for transmission.
    fn send(&self, frame: Bytes) -> NetResult<()>;

    /// Close the edge. Idempotent: the first call signals `Closed` with the
    /// given reason and returns `true`; later calls do nothing.
    fn close(&self, reason: &str) -> bool;
}

/// Produces edges for one transport scheme.
pub trait EdgeListener: Send {
    /// Whether this listener can dial the given address.
    fn handles(&self, address: &Address) -> bool;

    /// Begin producing events (new edges, creation failures) into `events`.
    fn attach(&mut self, events: EdgeSink);

    /// Start an outbound dial. Completion is reported through the attached
    /// event sink as either `New` or `CreationFailure`.
    fn create_edge_to(&mut self, address: &Address);

    /// Stop accepting and dialing. Existing edges are unaffected.
    fn stop(&mut self);
}

/// Shared receive-side state for edge implementations: buffers traffic until
/// a sink is set, then forwards in order, and arbitrates the single close.
#[derive(Debug)]
pub(crate) struct SinkGate {
    sink: Option<EdgeSink>,
    buffered: Vec<Bytes>,
    pending_close: Option<String>,
    closed: bool,
}

impl SinkGate {
    pub(crate) fn new() -> Self {
        Self {
            sink: None,
            buffered: Vec::new(),
            pending_close: None,
            closed: false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Install the sink, flushing buffered frames and any deferred close.
    pub(crate) fn install(&mut self, id: EdgeId, sink: EdgeSink) {
        for frame in self.buffered.drain(..) {
            let _ = sink.send(EdgeEvent::Frame { edge: id, frame });
        }
        if let Some(reason) = self.pending_close.take() {
            let _ = sink.send(EdgeEvent::Closed { edge: id, reason });
        }
        self.sink = Some(sink);
    }

    /// Hand a received frame to the sink, or buffer it while dormant.
    /// Frames arriving after close are dropped.
    pub(crate) fn deliver(&mut self, id: EdgeId, frame: Bytes) {
        if self.closed {
            return;
        }
        match &self.sink {
            Some(sink) => {
                let _ = sink.send(EdgeEvent::Frame { edge: id, frame });
            }
            None => self.buffered.push(frame),
        }
    }

    /// Perform the close transition. Returns `false` if already closed.
    pub(crate) fn close(&mut self, id: EdgeId, reason: &str) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        match &self.sink {
            Some(sink) => {
                let _ = sink.send(EdgeEvent::Closed {
                    edge: id,
                    reason: reason.to_string(),
                });
            }
            None => self.pending_close = Some(reason.to_string()),
        }
        true
    }
}
