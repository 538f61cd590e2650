//! Events the connection manager emits to its consumer.

use std::sync::Arc;
use tokio::sync::mpsc;

use lattice_core::Address;

use crate::connection::Connection;

/// Lifecycle events, delivered in emission order on a single stream.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A handshake completed and a connection exists.
    NewConnection {
        /// The new connection.
        connection: Arc<Connection>,
        /// Whether this side initiated the underlying edge.
        locally_initiated: bool,
    },
    /// An outbound attempt failed before producing a connection.
    ConnectionAttemptFailure {
        /// The address that was dialed.
        address: Address,
        /// Why the attempt failed.
        reason: String,
    },
    /// A connection was dismantled and removed from its table.
    ConnectionDisconnected {
        /// The removed connection.
        connection: Arc<Connection>,
        /// Why its edge closed.
        reason: String,
    },
    /// Global shutdown finished: every edge has closed. Emitted exactly
    /// once, after which the manager task exits.
    Disconnected,
}

/// Receiving half of the manager's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;
