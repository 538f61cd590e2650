//! Logical peer connections.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use lattice_core::PeerId;

use crate::edge::Edge;
use crate::manager::Command;

/// A logical association between the local peer and one remote peer,
/// riding a single edge. 1:1 with its edge: when the edge dies, so does
/// the connection.
#[derive(Debug)]
pub struct Connection {
    edge: Arc<dyn Edge>,
    local: PeerId,
    remote: PeerId,
    disconnecting: AtomicBool,
    commands: mpsc::UnboundedSender<Command>,
}

impl Connection {
    pub(crate) fn new(
        edge: Arc<dyn Edge>,
        local: PeerId,
        remote: PeerId,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            edge,
            local,
            remote,
            disconnecting: AtomicBool::new(false),
            commands,
        }
    }

    /// The edge this connection rides.
    pub fn edge(&self) -> &Arc<dyn Edge> {
        &self.edge
    }

    /// Our peer id.
    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    /// The remote's self-declared peer id.
    pub fn remote_id(&self) -> &PeerId {
        &self.remote
    }

    /// Whether teardown of this connection has begun.
    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_disconnecting(&self) {
        self.disconnecting.store(true, Ordering::SeqCst);
    }

    /// Request teardown of this connection. The manager notifies the remote,
    /// closes the edge, and eventually emits the connection's disconnected
    /// event.
    pub fn disconnect(&self) {
        if self
            .commands
            .send(Command::DisconnectConnection(self.edge.id()))
            .is_err()
        {
            tracing::debug!(connection = %self, "disconnect requested but manager is gone");
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} over {}", self.local, self.remote, self.edge)
    }
}
