//! Networking error types.

use std::io;
use thiserror::Error;

use lattice_core::SerializationError;

/// Errors raised by the edge, RPC, and connection layers.
#[derive(Debug, Error)]
pub enum NetError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize or deserialize a payload.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Frame exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Maximum permitted size.
        max: usize,
    },

    /// Invalid frame magic bytes.
    #[error("invalid frame magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        /// Magic the codec requires.
        expected: [u8; 4],
        /// Magic actually read.
        actual: [u8; 4],
    },

    /// The edge is closed and cannot carry traffic.
    #[error("edge is closed")]
    EdgeClosed,

    /// The RPC layer has no record of the named edge.
    #[error("unknown edge: {0}")]
    UnknownEdge(String),

    /// The message sender cannot carry this operation.
    #[error("unroutable sender: {0}")]
    UnroutableSender(String),
}

impl From<SerializationError> for NetError {
    fn from(err: SerializationError) -> Self {
        NetError::Serialization(err.to_string())
    }
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;
