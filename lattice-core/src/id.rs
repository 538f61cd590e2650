//! Peer identification.
//!
//! A peer id is an opaque, fixed-width, self-declared identifier. The
//! overlay never authenticates it; uniqueness is enforced per table, not
//! cryptographically.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IdError;

/// Width of a peer id in bytes.
pub const PEER_ID_LEN: usize = 16;

/// Stable identifier of a process in the overlay.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Create a peer id from its raw byte representation.
    ///
    /// Anything other than exactly [`PEER_ID_LEN`] bytes is rejected,
    /// including the empty string.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdError> {
        let raw: [u8; PEER_ID_LEN] = bytes.try_into().map_err(|_| IdError::InvalidLength {
            expected: PEER_ID_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(raw))
    }

    /// Derive a peer id deterministically from an arbitrary byte string.
    ///
    /// The seed is truncated or zero-padded to [`PEER_ID_LEN`] bytes. Useful
    /// for fixtures and callers that key ids off human-readable names.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut raw = [0u8; PEER_ID_LEN];
        let n = seed.len().min(PEER_ID_LEN);
        raw[..n].copy_from_slice(&seed[..n]);
        Self(raw)
    }

    /// The raw byte representation.
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// The raw byte representation as an owned vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}
