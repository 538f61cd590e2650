//! Wire contract for connection-manager RPC.
//!
//! Payloads are keyed structures with a string `method` and, where
//! applicable, an opaque-bytes `peer_id`. The four method names below are a
//! compatibility surface and must not change.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use lattice_core::{serialization, PeerId, SerializationError};

/// Handshake request: exchange peer ids over a fresh outbound edge.
pub const METHOD_INQUIRE: &str = "CM::Inquire";

/// Handshake commit notification, outbound side to inbound side.
pub const METHOD_CONNECT: &str = "CM::Connect";

/// Ask the peer to close this edge (veto of a self or duplicate connect).
pub const METHOD_CLOSE: &str = "CM::Close";

/// Announce that a live connection is being dismantled.
pub const METHOD_DISCONNECT: &str = "CM::Disconnect";

/// Parameters of a request or notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallParams {
    /// The method being invoked.
    pub method: String,
    /// Raw peer id bytes, present on `CM::Inquire` and `CM::Connect`.
    pub peer_id: Option<Vec<u8>>,
}

impl CallParams {
    /// Build a `CM::Inquire` request carrying our peer id.
    pub fn inquire(local: &PeerId) -> Self {
        Self {
            method: METHOD_INQUIRE.to_string(),
            peer_id: Some(local.to_vec()),
        }
    }

    /// Build a `CM::Connect` notification carrying our peer id.
    pub fn connect(local: &PeerId) -> Self {
        Self {
            method: METHOD_CONNECT.to_string(),
            peer_id: Some(local.to_vec()),
        }
    }

    /// Build a `CM::Close` notification.
    pub fn close() -> Self {
        Self {
            method: METHOD_CLOSE.to_string(),
            peer_id: None,
        }
    }

    /// Build a `CM::Disconnect` notification.
    pub fn disconnect() -> Self {
        Self {
            method: METHOD_DISCONNECT.to_string(),
            peer_id: None,
        }
    }
}

/// Reply to a `CM::Inquire` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPayload {
    /// Raw peer id bytes of the responder. Empty or missing is invalid.
    pub peer_id: Option<Vec<u8>>,
}

/// Framing of a single RPC message on an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// A request expecting a response routed by id.
    Request {
        /// Caller-allocated request id.
        id: u64,
        /// The call parameters.
        params: CallParams,
    },
    /// A fire-and-forget notification.
    Notification {
        /// The call parameters.
        params: CallParams,
    },
    /// The response to an earlier request.
    Response {
        /// Id of the request being answered.
        id: u64,
        /// The reply payload.
        payload: ReplyPayload,
    },
}

impl Envelope {
    /// Encode the envelope for transmission.
    pub fn encode(&self) -> Result<Bytes, SerializationError> {
        serialization::serialize(self).map(Bytes::from)
    }

    /// Decode an envelope from a received frame.
    pub fn decode(frame: &[u8]) -> Result<Self, SerializationError> {
        serialization::deserialize(frame)
    }
}
