//! The connection manager.
//!
//! Turns raw, possibly-redundant edges into a deduplicated set of logical
//! connections keyed by peer id. The manager is an actor: one task owns
//! every table and serially drains external commands, edge events, and
//! routed RPC messages, so there is no locking anywhere in here.
//!
//! ```text
//! ManagerHandle ──commands──▶ ┌───────────────────┐
//! listeners/edges ──events──▶ │ ConnectionManager │ ──events──▶ consumer
//! RpcHandler ──routed rpc───▶ └───────────────────┘
//! ```
//!
//! Handshake, per edge: an outbound edge sends `CM::Inquire` and waits; the
//! response names the remote peer, which is vetoed (self, duplicate) or
//! committed with `CM::Connect`. An inbound edge sits in its table until a
//! `CM::Connect` arrives. Teardown funnels through edge closure.

pub mod table;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

use lattice_core::{Address, PeerId};

use crate::config::{ManagerConfig, HANDSHAKE_SWEEP_INTERVAL};
use crate::connection::Connection;
use crate::edge::{Edge, EdgeEvent, EdgeFactory, EdgeId, EdgeListener};
use crate::events::{ConnectionEvent, EventReceiver};
use crate::rpc::{
    CallParams, ReplyPayload, Responder, RpcHandler, RpcInbound, RpcSender, METHOD_CLOSE,
    METHOD_CONNECT, METHOD_DISCONNECT, METHOD_INQUIRE,
};

pub use table::ConnectionTable;

/// External requests to the manager task.
pub(crate) enum Command {
    /// Dial an address.
    ConnectTo(Address),
    /// Register an edge listener.
    AddEdgeListener(Box<dyn EdgeListener>),
    /// Begin global shutdown.
    Disconnect,
    /// Tear down the connection riding the given edge.
    DisconnectConnection(EdgeId),
    /// Report current table contents.
    Snapshot(oneshot::Sender<ManagerSnapshot>),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::ConnectTo(address) => f.debug_tuple("ConnectTo").field(address).finish(),
            Command::AddEdgeListener(_) => f.write_str("AddEdgeListener"),
            Command::Disconnect => f.write_str("Disconnect"),
            Command::DisconnectConnection(edge) => {
                f.debug_tuple("DisconnectConnection").field(edge).finish()
            }
            Command::Snapshot(_) => f.write_str("Snapshot"),
        }
    }
}

/// Point-in-time view of the manager's tables.
#[derive(Debug, Clone)]
pub struct ManagerSnapshot {
    /// Peers with an outbound-initiated connection.
    pub outbound_peers: Vec<PeerId>,
    /// Peers with an inbound-initiated connection.
    pub inbound_peers: Vec<PeerId>,
    /// Edges in the outbound table.
    pub outbound_edges: usize,
    /// Edges in the inbound table.
    pub inbound_edges: usize,
}

/// Cloneable entry point for talking to a running manager.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ManagerHandle {
    /// Dial an address. Completion is reported through the event stream.
    pub fn connect_to(&self, address: Address) {
        if self.commands.send(Command::ConnectTo(address)).is_err() {
            tracing::warn!("connection manager is gone");
        }
    }

    /// Register an edge listener.
    pub fn add_edge_listener(&self, listener: Box<dyn EdgeListener>) {
        if self
            .commands
            .send(Command::AddEdgeListener(listener))
            .is_err()
        {
            tracing::warn!("connection manager is gone");
        }
    }

    /// Begin global shutdown.
    pub fn disconnect(&self) {
        if self.commands.send(Command::Disconnect).is_err() {
            tracing::warn!("connection manager is gone");
        }
    }

    /// Fetch a snapshot of the manager's tables. Returns `None` once the
    /// manager has stopped.
    pub async fn snapshot(&self) -> Option<ManagerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot(tx)).ok()?;
        rx.await.ok()
    }
}

/// The connection manager actor.
pub struct ConnectionManager {
    local_id: PeerId,
    config: ManagerConfig,
    rpc: RpcHandler,
    factory: EdgeFactory,
    outbound: ConnectionTable,
    inbound: ConnectionTable,
    /// Outbound edges whose inquiry has not been answered, with an optional
    /// abandonment deadline.
    pending_inquiries: HashMap<EdgeId, Option<Instant>>,
    /// Set once global shutdown begins; nothing new is admitted after.
    closed: bool,
    /// Set once `Disconnected` has been emitted; the run loop then exits.
    finished: bool,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    edge_tx: mpsc::UnboundedSender<EdgeEvent>,
    edge_rx: mpsc::UnboundedReceiver<EdgeEvent>,
    rpc_tx: mpsc::UnboundedSender<RpcInbound>,
    rpc_rx: mpsc::UnboundedReceiver<RpcInbound>,
}

impl ConnectionManager {
    /// Create a manager for `local_id`, registering the four CM methods on
    /// `rpc`. Returns the actor plus its handle and event stream.
    pub fn new(
        local_id: PeerId,
        mut rpc: RpcHandler,
        config: ManagerConfig,
    ) -> (Self, ManagerHandle, EventReceiver) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (edge_tx, edge_rx) = mpsc::unbounded_channel();
        let (rpc_tx, rpc_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();

        for method in [METHOD_INQUIRE, METHOD_CONNECT, METHOD_CLOSE, METHOD_DISCONNECT] {
            rpc.register(method, rpc_tx.clone());
        }

        let handle = ManagerHandle {
            commands: command_tx.clone(),
        };
        let manager = Self {
            local_id,
            config,
            rpc,
            factory: EdgeFactory::new(),
            outbound: ConnectionTable::new(),
            inbound: ConnectionTable::new(),
            pending_inquiries: HashMap::new(),
            closed: false,
            finished: false,
            events,
            command_tx,
            command_rx,
            edge_tx,
            edge_rx,
            rpc_tx,
            rpc_rx,
        };
        (manager, handle, event_rx)
    }

    /// Our peer id.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Drive the manager until global shutdown completes.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(HANDSHAKE_SWEEP_INTERVAL);
        while !self.finished {
            tokio::select! {
                Some(command) = self.command_rx.recv() => self.handle_command(command),
                Some(event) = self.edge_rx.recv() => self.handle_edge_event(event),
                Some(message) = self.rpc_rx.recv() => self.handle_rpc(message),
                _ = sweep.tick(), if self.config.handshake_timeout.is_some() => {
                    self.sweep_handshakes();
                }
            }
        }
        tracing::debug!(local = %self.local_id, "connection manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::ConnectTo(address) => self.connect_to(address),
            Command::AddEdgeListener(listener) => self.add_edge_listener(listener),
            Command::Disconnect => self.disconnect(),
            Command::DisconnectConnection(edge) => self.handle_disconnect_request(edge),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_edge_event(&mut self, event: EdgeEvent) {
        match event {
            EdgeEvent::New(edge) => self.handle_new_edge(edge),
            EdgeEvent::Frame { edge, frame } => {
                self.rpc.dispatch(edge, frame);
                // Consume whatever the dispatch routed to us before the next
                // edge event, so a frame is fully handled before its edge's
                // close signal can be.
                while let Ok(message) = self.rpc_rx.try_recv() {
                    self.handle_rpc(message);
                }
            }
            EdgeEvent::Closed { edge, reason } => self.handle_edge_closed(edge, &reason),
            EdgeEvent::CreationFailure { address, reason } => {
                self.emit(ConnectionEvent::ConnectionAttemptFailure { address, reason });
            }
        }
    }

    fn handle_rpc(&mut self, message: RpcInbound) {
        match message {
            RpcInbound::Request {
                params,
                from,
                responder,
            } => match params.method.as_str() {
                METHOD_INQUIRE => self.handle_inquire(from, responder),
                other => tracing::warn!(method = other, from = %from, "unexpected request"),
            },
            RpcInbound::Notification { params, from } => match params.method.as_str() {
                METHOD_CONNECT => self.handle_connect(params, from),
                METHOD_CLOSE => self.handle_close(from),
                METHOD_DISCONNECT => self.handle_remote_disconnect(from),
                other => tracing::warn!(method = other, from = %from, "unexpected notification"),
            },
            RpcInbound::Response { payload, from } => self.handle_inquired(payload, from),
        }
    }

    fn add_edge_listener(&mut self, mut listener: Box<dyn EdgeListener>) {
        if self.closed {
            tracing::warn!("attempted to add an edge listener after Disconnect");
            return;
        }
        listener.attach(self.edge_tx.clone());
        self.factory.add_listener(listener);
    }

    fn connect_to(&mut self, address: Address) {
        if self.closed {
            tracing::warn!(address = %address, "attempted to connect to a remote node after Disconnect");
            return;
        }
        if !self.factory.create_edge_to(&address) {
            self.emit(ConnectionEvent::ConnectionAttemptFailure {
                address,
                reason: "No EdgeListener to handle request".to_string(),
            });
        }
    }

    /// Global shutdown: announce teardown on every connection, close every
    /// edge, stop the factory. `Disconnected` fires once the last edge is
    /// gone, or immediately if none exist.
    fn disconnect(&mut self) {
        if self.closed {
            tracing::warn!("Disconnect called twice on connection manager");
            return;
        }
        self.closed = true;

        let no_edges = self.outbound.edge_count() == 0 && self.inbound.edge_count() == 0;

        for connection in self
            .outbound
            .connections()
            .into_iter()
            .chain(self.inbound.connections())
        {
            if connection.is_disconnecting() {
                continue;
            }
            if self.outbound.contains(&connection) {
                self.outbound.disconnect(&connection);
            } else {
                self.inbound.disconnect(&connection);
            }
            let notice = CallParams::disconnect();
            if let Err(e) = self
                .rpc
                .send_notification(&RpcSender::Connection(connection.edge().id()), notice)
            {
                tracing::debug!(connection = %connection, error = %e, "failed to announce disconnect");
            }
        }

        for edge in self
            .outbound
            .edges()
            .into_iter()
            .chain(self.inbound.edges())
        {
            if !edge.is_closed() {
                edge.close("Disconnecting");
            }
        }

        self.factory.stop();

        if no_edges {
            self.emit(ConnectionEvent::Disconnected);
            self.finished = true;
        }
    }

    fn handle_new_edge(&mut self, edge: Arc<dyn Edge>) {
        if self.closed {
            tracing::debug!(edge = %edge, "closing edge that arrived after Disconnect");
            edge.close("Disconnecting");
            return;
        }

        self.rpc.attach(edge.clone());
        edge.set_sink(self.edge_tx.clone());

        if !edge.is_outbound() {
            self.inbound.add_edge(edge);
            return;
        }

        self.outbound.add_edge(edge.clone());
        let deadline = self.config.handshake_timeout.map(|t| Instant::now() + t);
        self.pending_inquiries.insert(edge.id(), deadline);

        let inquiry = CallParams::inquire(&self.local_id);
        if let Err(e) = self
            .rpc
            .send_request(edge.id(), inquiry, self.rpc_tx.clone())
        {
            tracing::warn!(edge = %edge, error = %e, "failed to send inquiry");
        }
    }

    /// Answer a handshake inquiry with our peer id.
    fn handle_inquire(&mut self, from: RpcSender, responder: Responder) {
        let reply = ReplyPayload {
            peer_id: Some(self.local_id.to_vec()),
        };
        if let Err(e) = responder.respond(reply) {
            tracing::debug!(from = %from, error = %e, "failed to answer inquiry");
        }
    }

    /// Process the response to one of our inquiries: veto or commit.
    fn handle_inquired(&mut self, payload: ReplyPayload, from: RpcSender) {
        let edge_id = match from {
            RpcSender::Edge(id) => id,
            other => {
                tracing::warn!(from = %other, "inquiry response not from an edge");
                return;
            }
        };
        let Some(edge) = self.rpc.edge(&edge_id) else {
            tracing::warn!(edge = %edge_id, "inquiry response from a detached edge");
            return;
        };
        if !edge.is_outbound() {
            tracing::warn!(edge = %edge, "inquiry response on an inbound edge");
            return;
        }

        self.pending_inquiries.remove(&edge_id);
        if self.closed {
            tracing::debug!(edge = %edge, "ignoring inquiry response during shutdown");
            return;
        }

        let Some(remote) = parse_peer_id(payload.peer_id.as_deref()) else {
            tracing::warn!(edge = %edge, "inquiry response carried no usable peer id");
            return;
        };

        if remote == self.local_id {
            tracing::debug!(edge = %edge, "attempting to connect to ourself");
            self.veto(&edge, "Attempting to connect to ourself");
            return;
        }

        if self.outbound.get_connection(&remote).is_some() {
            tracing::warn!(peer = %remote, edge = %edge, "already connected to peer, closing edge");
            self.veto(&edge, "Duplicate connection");
            return;
        }

        let Some(shared) = self.outbound.get_edge(&edge_id) else {
            tracing::error!(edge = %edge, "edge finished its handshake but the table has no record of it");
            return;
        };

        let commit = CallParams::connect(&self.local_id);
        if let Err(e) = self
            .rpc
            .send_notification(&RpcSender::Edge(edge_id), commit)
        {
            tracing::warn!(edge = %edge, error = %e, "failed to send connect notification");
            return;
        }

        tracing::debug!(local = %self.local_id, peer = %remote, "creating new connection");
        let connection = Arc::new(Connection::new(
            shared,
            self.local_id,
            remote,
            self.command_tx.clone(),
        ));
        self.outbound.add_connection(connection.clone());
        self.rpc.promote(&edge_id);
        self.emit(ConnectionEvent::NewConnection {
            connection,
            locally_initiated: true,
        });
    }

    /// Refuse the handshake on this edge: tell the peer, close, report.
    fn veto(&mut self, edge: &Arc<dyn Edge>, reason: &str) {
        if let Err(e) = self
            .rpc
            .send_notification(&RpcSender::Edge(edge.id()), CallParams::close())
        {
            tracing::debug!(edge = %edge, error = %e, "failed to send close notification");
        }
        edge.close(reason);
        self.emit(ConnectionEvent::ConnectionAttemptFailure {
            address: edge.remote_address().clone(),
            reason: reason.to_string(),
        });
    }

    /// The remote committed its handshake: materialize the inbound
    /// connection, displacing any previous one for the same peer.
    fn handle_connect(&mut self, params: CallParams, from: RpcSender) {
        let edge_id = match from {
            RpcSender::Edge(id) => id,
            other => {
                tracing::warn!(from = %other, "connect notification not from an edge");
                return;
            }
        };
        if self.closed {
            tracing::debug!(edge = %edge_id, "ignoring connect notification during shutdown");
            return;
        }

        let Some(remote) = parse_peer_id(params.peer_id.as_deref()) else {
            tracing::warn!(edge = %edge_id, "connect notification carried no usable peer id");
            return;
        };
        if remote == self.local_id {
            tracing::warn!(edge = %edge_id, "connect notification claims our own peer id");
            return;
        }

        if let Some(previous) = self.inbound.get_connection(&remote) {
            tracing::debug!(peer = %remote, "tearing down previous inbound connection");
            self.start_disconnect(&previous);
        }

        let Some(shared) = self.inbound.get_edge(&edge_id) else {
            tracing::error!(edge = %edge_id, "connect notification names an edge the table has no record of");
            return;
        };

        tracing::debug!(local = %self.local_id, peer = %remote, "handling new connection from remote");
        let connection = Arc::new(Connection::new(
            shared,
            self.local_id,
            remote,
            self.command_tx.clone(),
        ));
        self.inbound.add_connection(connection.clone());
        self.rpc.promote(&edge_id);
        self.emit(ConnectionEvent::NewConnection {
            connection,
            locally_initiated: false,
        });
    }

    /// The peer vetoed this edge.
    fn handle_close(&mut self, from: RpcSender) {
        let edge_id = match from {
            RpcSender::Edge(id) => id,
            other => {
                tracing::warn!(from = %other, "close request not from an edge");
                return;
            }
        };
        match self.rpc.edge(&edge_id) {
            Some(edge) => {
                edge.close("Closed from remote peer");
            }
            None => tracing::warn!(edge = %edge_id, "close request for a detached edge"),
        }
    }

    /// The peer announced teardown of a live connection.
    fn handle_remote_disconnect(&mut self, from: RpcSender) {
        let edge_id = match from {
            RpcSender::Connection(id) => id,
            other => {
                tracing::warn!(from = %other, "disconnect notification from a non-connection");
                return;
            }
        };

        let located = self
            .inbound
            .connection_by_edge(&edge_id)
            .map(|c| (c, true))
            .or_else(|| self.outbound.connection_by_edge(&edge_id).map(|c| (c, false)));
        let Some((connection, is_inbound)) = located else {
            tracing::error!(edge = %edge_id, "disconnect notification names a connection the tables have no record of");
            return;
        };

        tracing::debug!(connection = %connection, "received disconnect from remote");
        if is_inbound {
            self.inbound.disconnect(&connection);
        } else {
            self.outbound.disconnect(&connection);
        }
        connection.edge().close("Remote disconnect");
    }

    /// A consumer asked a connection to tear down.
    fn handle_disconnect_request(&mut self, edge_id: EdgeId) {
        let located = self
            .outbound
            .connection_by_edge(&edge_id)
            .or_else(|| self.inbound.connection_by_edge(&edge_id));
        let Some(connection) = located else {
            tracing::warn!(edge = %edge_id, "disconnect request for an unknown connection");
            return;
        };
        self.start_disconnect(&connection);
    }

    /// Local teardown of one connection: mark it, announce, close the edge.
    fn start_disconnect(&mut self, connection: &Arc<Connection>) {
        if connection.is_disconnecting() {
            return;
        }
        if self.outbound.contains(connection) {
            self.outbound.disconnect(connection);
        } else {
            self.inbound.disconnect(connection);
        }
        let notice = CallParams::disconnect();
        if let Err(e) = self
            .rpc
            .send_notification(&RpcSender::Connection(connection.edge().id()), notice)
        {
            tracing::debug!(connection = %connection, error = %e, "failed to announce disconnect");
        }
        tracing::debug!(connection = %connection, "disconnecting");
        connection.edge().close("Local disconnect request");
    }

    /// All teardown funnels through here: drop the edge and its connection
    /// from the tables in one step, then settle the shutdown latch.
    fn handle_edge_closed(&mut self, edge_id: EdgeId, reason: &str) {
        self.rpc.detach(&edge_id);
        let was_pending = self.pending_inquiries.remove(&edge_id).is_some();

        let table = if self.outbound.has_edge(&edge_id) {
            &mut self.outbound
        } else {
            &mut self.inbound
        };
        let edge = table.get_edge(&edge_id);
        if table.remove_edge(&edge_id) {
            tracing::debug!(edge = %edge_id, reason, "edge closed");
        } else {
            tracing::warn!(edge = %edge_id, "closed edge has no table entry");
        }

        if let Some(connection) = table.take_connection_by_edge(&edge_id) {
            tracing::debug!(connection = %connection, reason, "removing connection for closed edge");
            self.emit(ConnectionEvent::ConnectionDisconnected {
                connection,
                reason: reason.to_string(),
            });
        }

        if was_pending && !self.closed {
            if let Some(edge) = edge {
                self.emit(ConnectionEvent::ConnectionAttemptFailure {
                    address: edge.remote_address().clone(),
                    reason: reason.to_string(),
                });
            }
        }

        if !self.closed {
            return;
        }
        if self.outbound.edge_count() == 0 && self.inbound.edge_count() == 0 {
            self.emit(ConnectionEvent::Disconnected);
            self.finished = true;
        }
    }

    /// Abandon outbound handshakes that outlived the configured deadline.
    fn sweep_handshakes(&mut self) {
        let now = Instant::now();
        let expired: Vec<EdgeId> = self
            .pending_inquiries
            .iter()
            .filter_map(|(id, deadline)| match deadline {
                Some(deadline) if *deadline <= now => Some(*id),
                _ => None,
            })
            .collect();
        for edge_id in expired {
            let Some(edge) = self.outbound.get_edge(&edge_id) else {
                self.pending_inquiries.remove(&edge_id);
                continue;
            };
            tracing::warn!(edge = %edge, "abandoning handshake after timeout");
            // The failure event surfaces through the close path while the
            // inquiry is still marked pending.
            edge.close("Handshake timeout");
        }
    }

    fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            outbound_peers: self.outbound.peers(),
            inbound_peers: self.inbound.peers(),
            outbound_edges: self.outbound.edge_count(),
            inbound_edges: self.inbound.edge_count(),
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for method in [METHOD_INQUIRE, METHOD_CONNECT, METHOD_CLOSE, METHOD_DISCONNECT] {
            self.rpc.unregister(method);
        }
    }
}

fn parse_peer_id(raw: Option<&[u8]>) -> Option<PeerId> {
    let bytes = raw?;
    if bytes.is_empty() {
        return None;
    }
    PeerId::from_bytes(bytes).ok()
}
