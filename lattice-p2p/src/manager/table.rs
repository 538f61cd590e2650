//! Connection table: the indexed edge and connection store.
//!
//! Two tables exist per manager, one for each direction. Lookups are O(1);
//! iteration hands out snapshots, so handlers may mutate the table while
//! walking a previous listing.

use std::collections::HashMap;
use std::sync::Arc;

use lattice_core::PeerId;

use crate::connection::Connection;
use crate::edge::{Edge, EdgeId};

/// Edges and connections for one direction.
///
/// `by_edge` is the authoritative connection index: during an inbound
/// replacement race two connections to the same peer coexist briefly, and
/// only the newer one owns the `by_peer` slot.
#[derive(Default)]
pub struct ConnectionTable {
    edges: HashMap<EdgeId, Arc<dyn Edge>>,
    by_peer: HashMap<PeerId, Arc<Connection>>,
    by_edge: HashMap<EdgeId, Arc<Connection>>,
}

impl ConnectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge. Idempotent: re-inserting a present edge is a no-op.
    pub fn add_edge(&mut self, edge: Arc<dyn Edge>) {
        self.edges.entry(edge.id()).or_insert(edge);
    }

    /// Remove an edge. Returns whether it was present.
    pub fn remove_edge(&mut self, edge: &EdgeId) -> bool {
        self.edges.remove(edge).is_some()
    }

    /// Look up the shared handle for an edge.
    pub fn get_edge(&self, edge: &EdgeId) -> Option<Arc<dyn Edge>> {
        self.edges.get(edge).cloned()
    }

    /// Whether the edge is present.
    pub fn has_edge(&self, edge: &EdgeId) -> bool {
        self.edges.contains_key(edge)
    }

    /// Snapshot of all edges.
    pub fn edges(&self) -> Vec<Arc<dyn Edge>> {
        self.edges.values().cloned().collect()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Insert a connection. The connection's edge must already be tabled
    /// here, and the remote id must not be the local id.
    pub fn add_connection(&mut self, connection: Arc<Connection>) {
        debug_assert!(self.edges.contains_key(&connection.edge().id()));
        debug_assert_ne!(connection.remote_id(), connection.local_id());
        self.by_peer
            .insert(*connection.remote_id(), connection.clone());
        self.by_edge.insert(connection.edge().id(), connection);
    }

    /// Remove a specific connection. Returns whether it was present.
    pub fn remove_connection(&mut self, connection: &Arc<Connection>) -> bool {
        let edge = connection.edge().id();
        match self.by_edge.get(&edge) {
            Some(present) if Arc::ptr_eq(present, connection) => {
                self.take_connection_by_edge(&edge);
                true
            }
            _ => false,
        }
    }

    /// Remove and return the connection riding the given edge. Releases the
    /// peer index only if that slot still points at this connection.
    pub fn take_connection_by_edge(&mut self, edge: &EdgeId) -> Option<Arc<Connection>> {
        let connection = self.by_edge.remove(edge)?;
        if let Some(current) = self.by_peer.get(connection.remote_id()) {
            if Arc::ptr_eq(current, &connection) {
                self.by_peer.remove(connection.remote_id());
            }
        }
        Some(connection)
    }

    /// Look up the connection riding the given edge.
    pub fn connection_by_edge(&self, edge: &EdgeId) -> Option<Arc<Connection>> {
        self.by_edge.get(edge).cloned()
    }

    /// Look up the connection for a peer.
    pub fn get_connection(&self, peer: &PeerId) -> Option<Arc<Connection>> {
        self.by_peer.get(peer).cloned()
    }

    /// Snapshot of all connections, including any being replaced.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.by_edge.values().cloned().collect()
    }

    /// Peers with a live connection in this table.
    pub fn peers(&self) -> Vec<PeerId> {
        self.by_peer.keys().copied().collect()
    }

    /// Whether this exact connection is tabled here.
    pub fn contains(&self, connection: &Arc<Connection>) -> bool {
        self.by_edge
            .get(&connection.edge().id())
            .is_some_and(|present| Arc::ptr_eq(present, connection))
    }

    /// Number of connections.
    pub fn connection_count(&self) -> usize {
        self.by_edge.len()
    }

    /// Mark a connection as disconnecting without removing it.
    pub fn disconnect(&mut self, connection: &Arc<Connection>) {
        if !self.contains(connection) {
            tracing::warn!(connection = %connection, "disconnect mark for untabled connection");
        }
        connection.mark_disconnecting();
    }
}
