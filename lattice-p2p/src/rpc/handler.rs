//! RPC dispatch.
//!
//! The handler owns the method registry, the set of attached edges, and the
//! table of pending requests. Inbound frames are decoded here and routed to
//! whichever channel registered the method; responses are routed by request
//! id to the continuation recorded at send time.
//!
//! Every delivered message carries a tagged [`RpcSender`] naming what the
//! message arrived from, so handlers match on the variant they expect
//! instead of downcasting.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::edge::{Edge, EdgeId};
use crate::error::{NetError, NetResult};
use crate::rpc::wire::{CallParams, Envelope, ReplyPayload};

/// The origin of an inbound RPC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcSender {
    /// A raw edge that has not been promoted to a connection.
    Edge(EdgeId),
    /// An edge that carries an established connection.
    Connection(EdgeId),
    /// A sender the RPC layer has no record of.
    Other,
}

impl RpcSender {
    /// The edge the message arrived on, if the sender is routable.
    pub fn edge_id(&self) -> Option<EdgeId> {
        match self {
            RpcSender::Edge(id) | RpcSender::Connection(id) => Some(*id),
            RpcSender::Other => None,
        }
    }
}

impl fmt::Display for RpcSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcSender::Edge(id) => write!(f, "edge {}", id),
            RpcSender::Connection(id) => write!(f, "connection on {}", id),
            RpcSender::Other => write!(f, "unknown sender"),
        }
    }
}

/// Answers a request exactly once over the edge it arrived on.
#[derive(Debug)]
pub struct Responder {
    edge: Arc<dyn Edge>,
    request: u64,
}

impl Responder {
    /// Send the reply.
    pub fn respond(self, payload: ReplyPayload) -> NetResult<()> {
        let frame = Envelope::Response {
            id: self.request,
            payload,
        }
        .encode()?;
        self.edge.send(frame)
    }
}

/// An RPC message delivered to a registered route.
#[derive(Debug)]
pub enum RpcInbound {
    /// A request; answer through the responder.
    Request {
        /// The call parameters.
        params: CallParams,
        /// Who sent the request.
        from: RpcSender,
        /// Reply channel for this request.
        responder: Responder,
    },
    /// A fire-and-forget notification.
    Notification {
        /// The call parameters.
        params: CallParams,
        /// Who sent the notification.
        from: RpcSender,
    },
    /// The response to a request sent earlier through this handler.
    Response {
        /// The reply payload.
        payload: ReplyPayload,
        /// Who sent the response.
        from: RpcSender,
    },
}

/// Route messages are delivered on.
pub type RpcRoute = mpsc::UnboundedSender<RpcInbound>;

struct PendingRequest {
    route: RpcRoute,
    edge: EdgeId,
}

/// Method registry, edge attachment, and request/response bookkeeping.
pub struct RpcHandler {
    registry: HashMap<String, RpcRoute>,
    edges: HashMap<EdgeId, Arc<dyn Edge>>,
    promoted: HashSet<EdgeId>,
    pending: HashMap<u64, PendingRequest>,
    next_request: u64,
}

impl RpcHandler {
    /// Create an empty handler.
    pub fn new() -> Self {
        Self {
            registry: HashMap::new(),
            edges: HashMap::new(),
            promoted: HashSet::new(),
            pending: HashMap::new(),
            next_request: 1,
        }
    }

    /// Register a route for a method name. Returns `false` (and leaves the
    /// existing route in place) if the name is already taken.
    pub fn register(&mut self, name: impl Into<String>, route: RpcRoute) -> bool {
        let name = name.into();
        if self.registry.contains_key(&name) {
            tracing::warn!(method = %name, "method already registered");
            return false;
        }
        self.registry.insert(name, route);
        true
    }

    /// Remove a method registration. Returns whether it existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.registry.remove(name).is_some()
    }

    /// Whether a method name is currently registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    /// Make an edge addressable by this handler.
    pub fn attach(&mut self, edge: Arc<dyn Edge>) {
        self.edges.insert(edge.id(), edge);
    }

    /// Forget an edge: the sender tag degrades to `Other`, and every pending
    /// continuation bound to the edge is cancelled.
    pub fn detach(&mut self, edge: &EdgeId) {
        self.edges.remove(edge);
        self.promoted.remove(edge);
        self.pending.retain(|_, pending| pending.edge != *edge);
    }

    /// Tag future messages from this edge as coming from a connection.
    pub fn promote(&mut self, edge: &EdgeId) {
        self.promoted.insert(*edge);
    }

    /// Look up an attached edge.
    pub fn edge(&self, edge: &EdgeId) -> Option<Arc<dyn Edge>> {
        self.edges.get(edge).cloned()
    }

    /// Send a request over an edge and record where its response goes.
    pub fn send_request(
        &mut self,
        to: EdgeId,
        params: CallParams,
        reply_route: RpcRoute,
    ) -> NetResult<u64> {
        let edge = self
            .edges
            .get(&to)
            .ok_or_else(|| NetError::UnknownEdge(to.to_string()))?;

        let id = self.next_request;
        self.next_request += 1;

        let frame = Envelope::Request {
            id,
            params,
        }
        .encode()?;
        edge.send(frame)?;

        self.pending.insert(
            id,
            PendingRequest {
                route: reply_route,
                edge: to,
            },
        );
        Ok(id)
    }

    /// Send a fire-and-forget notification to a sender.
    pub fn send_notification(&mut self, to: &RpcSender, params: CallParams) -> NetResult<()> {
        let edge_id = to
            .edge_id()
            .ok_or_else(|| NetError::UnroutableSender(to.to_string()))?;
        let edge = self
            .edges
            .get(&edge_id)
            .ok_or_else(|| NetError::UnknownEdge(edge_id.to_string()))?;

        let frame = Envelope::Notification { params }.encode()?;
        edge.send(frame)
    }

    /// Decode a received frame and route it.
    pub fn dispatch(&mut self, edge: EdgeId, frame: Bytes) {
        let envelope = match Envelope::decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(edge = %edge, error = %e, "dropping undecodable frame");
                return;
            }
        };

        let from = match self.edges.get(&edge) {
            Some(_) if self.promoted.contains(&edge) => RpcSender::Connection(edge),
            Some(_) => RpcSender::Edge(edge),
            None => RpcSender::Other,
        };

        match envelope {
            Envelope::Request { id, params } => {
                let Some(handle) = self.edges.get(&edge) else {
                    tracing::warn!(edge = %edge, method = %params.method, "request from unattached edge");
                    return;
                };
                let responder = Responder {
                    edge: handle.clone(),
                    request: id,
                };
                match self.registry.get(&params.method) {
                    Some(route) => {
                        let _ = route.send(RpcInbound::Request {
                            params,
                            from,
                            responder,
                        });
                    }
                    None => {
                        tracing::warn!(method = %params.method, from = %from, "request for unregistered method");
                    }
                }
            }
            Envelope::Notification { params } => match self.registry.get(&params.method) {
                Some(route) => {
                    let _ = route.send(RpcInbound::Notification { params, from });
                }
                None => {
                    tracing::warn!(method = %params.method, from = %from, "notification for unregistered method");
                }
            },
            Envelope::Response { id, payload } => match self.pending.remove(&id) {
                Some(pending) => {
                    let _ = pending.route.send(RpcInbound::Response { payload, from });
                }
                None => {
                    tracing::debug!(request = id, from = %from, "response for unknown or cancelled request");
                }
            },
        }
    }
}

impl Default for RpcHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::memory::MemoryEdge;
    use crate::edge::EdgeEvent;
    use lattice_core::{Address, PeerId};

    fn edge_pair() -> (Arc<dyn Edge>, Arc<dyn Edge>) {
        MemoryEdge::pair(Address::new("mem", "remote"), Address::new("mem", "local"))
    }

    /// Pull the frames an edge delivered into a handler-sized channel.
    fn drain_frames(rx: &mut mpsc::UnboundedReceiver<EdgeEvent>) -> Vec<(EdgeId, Bytes)> {
        let mut frames = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EdgeEvent::Frame { edge, frame } = event {
                frames.push((edge, frame));
            }
        }
        frames
    }

    #[test]
    fn test_register_unregister_is_noop() {
        let mut rpc = RpcHandler::new();
        let (route, _rx) = mpsc::unbounded_channel();

        assert!(!rpc.is_registered("CM::Inquire"));
        assert!(rpc.register("CM::Inquire", route.clone()));
        assert!(!rpc.register("CM::Inquire", route));
        assert!(rpc.is_registered("CM::Inquire"));

        assert!(rpc.unregister("CM::Inquire"));
        assert!(!rpc.unregister("CM::Inquire"));
        assert!(!rpc.is_registered("CM::Inquire"));
    }

    #[test]
    fn test_request_response_roundtrip() {
        let local = PeerId::from_seed(b"local");
        let remote = PeerId::from_seed(b"remote");

        // Two handlers, one per side of the pair.
        let mut rpc_a = RpcHandler::new();
        let mut rpc_b = RpcHandler::new();
        let (edge_a, edge_b) = edge_pair();
        rpc_a.attach(edge_a.clone());
        rpc_b.attach(edge_b.clone());

        let (a_sink, mut a_events) = mpsc::unbounded_channel();
        let (b_sink, mut b_events) = mpsc::unbounded_channel();
        edge_a.set_sink(a_sink);
        edge_b.set_sink(b_sink);

        let (b_route, mut b_inbound) = mpsc::unbounded_channel();
        rpc_b.register("CM::Inquire", b_route);

        // A sends the request; B's edge surfaces it as a frame.
        let (a_route, mut a_inbound) = mpsc::unbounded_channel();
        rpc_a
            .send_request(edge_a.id(), CallParams::inquire(&local), a_route)
            .unwrap();
        for (edge, frame) in drain_frames(&mut b_events) {
            rpc_b.dispatch(edge, frame);
        }

        // B answers through the responder.
        match b_inbound.try_recv().unwrap() {
            RpcInbound::Request {
                params,
                from,
                responder,
            } => {
                assert_eq!(params.method, "CM::Inquire");
                assert_eq!(from, RpcSender::Edge(edge_b.id()));
                responder
                    .respond(ReplyPayload {
                        peer_id: Some(remote.to_vec()),
                    })
                    .unwrap();
            }
            other => panic!("unexpected inbound: {:?}", other),
        }

        // The response routes back to A's continuation.
        for (edge, frame) in drain_frames(&mut a_events) {
            rpc_a.dispatch(edge, frame);
        }
        match a_inbound.try_recv().unwrap() {
            RpcInbound::Response { payload, from } => {
                assert_eq!(payload.peer_id, Some(remote.to_vec()));
                assert_eq!(from, RpcSender::Edge(edge_a.id()));
            }
            other => panic!("unexpected inbound: {:?}", other),
        }
    }

    #[test]
    fn test_promotion_tags_sender_as_connection() {
        let mut rpc = RpcHandler::new();
        let (edge_a, edge_b) = edge_pair();
        rpc.attach(edge_b.clone());
        rpc.promote(&edge_b.id());

        let (route, mut inbound) = mpsc::unbounded_channel();
        rpc.register("CM::Disconnect", route);

        let frame = Envelope::Notification {
            params: CallParams::disconnect(),
        }
        .encode()
        .unwrap();
        rpc.dispatch(edge_b.id(), frame);
        drop(edge_a);

        match inbound.try_recv().unwrap() {
            RpcInbound::Notification { from, .. } => {
                assert_eq!(from, RpcSender::Connection(edge_b.id()));
            }
            other => panic!("unexpected inbound: {:?}", other),
        }
    }

    #[test]
    fn test_detach_cancels_pending_continuations() {
        let local = PeerId::from_seed(b"local");
        let mut rpc = RpcHandler::new();
        let (edge_a, edge_b) = edge_pair();
        rpc.attach(edge_a.clone());

        let (route, mut inbound) = mpsc::unbounded_channel();
        let id = rpc
            .send_request(edge_a.id(), CallParams::inquire(&local), route)
            .unwrap();

        rpc.detach(&edge_a.id());

        // A late response is dropped, not delivered.
        let frame = Envelope::Response {
            id,
            payload: ReplyPayload { peer_id: None },
        }
        .encode()
        .unwrap();
        rpc.dispatch(edge_a.id(), frame);
        drop(edge_b);

        assert!(inbound.try_recv().is_err());
    }

    #[test]
    fn test_send_to_unknown_edge_fails() {
        let mut rpc = RpcHandler::new();
        let (route, _rx) = mpsc::unbounded_channel();
        let result = rpc.send_request(
            EdgeId::next(),
            CallParams::inquire(&PeerId::from_seed(b"x")),
            route,
        );
        assert!(matches!(result, Err(NetError::UnknownEdge(_))));
    }
}
