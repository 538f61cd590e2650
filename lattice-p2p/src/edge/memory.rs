//! In-process transport.
//!
//! A [`MemoryHub`] is a rendezvous shared by a set of listeners. Dialing a
//! registered locator creates a linked pair of edges, one outbound at the
//! dialer and one inbound at the listener. Frames cross synchronously;
//! closing either side closes the other. Used heavily by tests and by
//! nodes colocated in one process.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use lattice_core::Address;

use super::{Direction, Edge, EdgeEvent, EdgeId, EdgeListener, EdgeSink, SinkGate};
use crate::error::{NetError, NetResult};

/// The scheme memory listeners answer to.
pub const MEMORY_SCHEME: &str = "mem";

/// Rendezvous point connecting memory listeners in one process.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HashMap<String, EdgeSink>>>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, locator: &str, events: EdgeSink) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if inner.insert(locator.to_string(), events).is_some() {
            tracing::warn!(locator, "replacing existing memory listener registration");
        }
    }

    fn unregister(&self, locator: &str) {
        self.inner.lock().expect("hub lock poisoned").remove(locator);
    }

    fn lookup(&self, locator: &str) -> Option<EdgeSink> {
        self.inner
            .lock()
            .expect("hub lock poisoned")
            .get(locator)
            .cloned()
    }
}

/// Edge listener for the `mem` scheme.
pub struct MemoryListener {
    hub: MemoryHub,
    local: Address,
    events: Option<EdgeSink>,
    stopped: bool,
}

impl MemoryListener {
    /// Create a listener reachable at `local` through `hub`.
    pub fn new(hub: MemoryHub, local: Address) -> Self {
        Self {
            hub,
            local,
            events: None,
            stopped: false,
        }
    }
}

impl EdgeListener for MemoryListener {
    fn handles(&self, address: &Address) -> bool {
        address.scheme() == MEMORY_SCHEME
    }

    fn attach(&mut self, events: EdgeSink) {
        self.hub.register(self.local.locator(), events.clone());
        self.events = Some(events);
    }

    fn create_edge_to(&mut self, address: &Address) {
        let Some(events) = self.events.clone() else {
            tracing::warn!(address = %address, "memory listener dialed before attach");
            return;
        };
        if self.stopped {
            let _ = events.send(EdgeEvent::CreationFailure {
                address: address.clone(),
                reason: "listener stopped".to_string(),
            });
            return;
        }
        match self.hub.lookup(address.locator()) {
            Some(remote_events) => {
                let (outbound, inbound) = MemoryEdge::pair(address.clone(), self.local.clone());
                let _ = events.send(EdgeEvent::New(outbound));
                let _ = remote_events.send(EdgeEvent::New(inbound));
            }
            None => {
                let _ = events.send(EdgeEvent::CreationFailure {
                    address: address.clone(),
                    reason: "connection refused".to_string(),
                });
            }
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.hub.unregister(self.local.locator());
    }
}

/// One side of a linked in-process edge pair.
#[derive(Debug)]
pub struct MemoryEdge {
    id: EdgeId,
    direction: Direction,
    remote: Address,
    gate: Mutex<SinkGate>,
    peer: OnceLock<Weak<MemoryEdge>>,
}

impl MemoryEdge {
    /// Create a linked pair: the outbound side reaches `dialed`, the inbound
    /// side reports `dialer` as its remote.
    pub fn pair(dialed: Address, dialer: Address) -> (Arc<dyn Edge>, Arc<dyn Edge>) {
        let outbound = Arc::new(MemoryEdge::new(Direction::Outbound, dialed));
        let inbound = Arc::new(MemoryEdge::new(Direction::Inbound, dialer));
        outbound
            .peer
            .set(Arc::downgrade(&inbound))
            .expect("fresh edge already linked");
        inbound
            .peer
            .set(Arc::downgrade(&outbound))
            .expect("fresh edge already linked");
        (outbound, inbound)
    }

    fn new(direction: Direction, remote: Address) -> Self {
        Self {
            id: EdgeId::next(),
            direction,
            remote,
            gate: Mutex::new(SinkGate::new()),
            peer: OnceLock::new(),
        }
    }

    fn peer(&self) -> Option<Arc<MemoryEdge>> {
        self.peer.get().and_then(Weak::upgrade)
    }

    fn deliver(&self, frame: Bytes) {
        self.gate
            .lock()
            .expect("edge lock poisoned")
            .deliver(self.id, frame);
    }
}

impl Edge for MemoryEdge {
    fn id(&self) -> EdgeId {
        self.id
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn is_closed(&self) -> bool {
        self.gate.lock().expect("edge lock poisoned").is_closed()
    }

    fn remote_address(&self) -> &Address {
        &self.remote
    }

    fn set_sink(&self, sink: EdgeSink) {
        self.gate
            .lock()
            .expect("edge lock poisoned")
            .install(self.id, sink);
    }

    fn send(&self, frame: Bytes) -> NetResult<()> {
        if self.is_closed() {
            return Err(NetError::EdgeClosed);
        }
        let peer = self.peer().ok_or(NetError::EdgeClosed)?;
        peer.deliver(frame);
        Ok(())
    }

    fn close(&self, reason: &str) -> bool {
        let closed_now = self
            .gate
            .lock()
            .expect("edge lock poisoned")
            .close(self.id, reason);
        if closed_now {
            // The far side observes transport closure.
            if let Some(peer) = self.peer() {
                peer.close("disconnected");
            }
        }
        closed_now
    }
}

impl fmt::Display for MemoryEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} to {})", self.id, self.direction, self.remote)
    }
}
