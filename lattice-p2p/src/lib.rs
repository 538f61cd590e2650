//! Connection management for the Lattice overlay.
//!
//! This crate turns raw transport sessions ("edges") into a consistent,
//! deduplicated set of logical connections to remote peers:
//!
//! - Pluggable edge listeners (in-process and TCP transports included)
//! - A two-sided handshake over RPC (`CM::Inquire` / `CM::Connect`)
//! - Uniqueness enforcement: one outbound connection per peer, self-connect
//!   and duplicate vetoes
//! - Graceful teardown, locally or remotely initiated, and global shutdown
//!
//! # Architecture
//!
//! The connection manager is a single task; every handler runs serially on
//! it, so there is no locking. Transports and consumers talk to it through
//! channels.
//!
//! ```text
//! Consumer ── ManagerHandle ──▶ ConnectionManager ──▶ ConnectionEvent stream
//!                                   ▲        │
//!                          EdgeEvent│        │RpcHandler (registry, pending)
//!                                   │        ▼
//!                             EdgeListeners / Edges
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use lattice_core::{Address, PeerId};
//! use lattice_p2p::{ConnectionManager, ManagerConfig, MemoryHub, MemoryListener, RpcHandler};
//!
//! let (manager, handle, mut events) = ConnectionManager::new(
//!     PeerId::from_seed(b"alice"),
//!     RpcHandler::new(),
//!     ManagerConfig::new(),
//! );
//! tokio::spawn(manager.run());
//!
//! let hub = MemoryHub::new();
//! handle.add_edge_listener(Box::new(MemoryListener::new(hub, "mem://alice".parse()?)));
//! handle.connect_to("mem://bob".parse()?);
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod edge;
pub mod error;
pub mod events;
pub mod manager;
pub mod rpc;

// Re-export main types
pub use config::{ManagerConfig, FRAME_MAGIC, MAX_FRAME_SIZE};
pub use connection::Connection;
pub use edge::{
    Direction, Edge, EdgeEvent, EdgeFactory, EdgeId, EdgeListener, EdgeSink, MemoryHub,
    MemoryListener, TcpEdgeListener,
};
pub use error::{NetError, NetResult};
pub use events::{ConnectionEvent, EventReceiver};
pub use manager::{ConnectionManager, ConnectionTable, ManagerHandle, ManagerSnapshot};
pub use rpc::{RpcHandler, RpcSender};
