//! Deterministic bincode configuration.
//!
//! Uses fixed-size integer encoding and little-endian byte order
//! for consistent cross-platform serialization.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::SerializationError;

/// Get the deterministic bincode configuration.
///
/// Configuration:
/// - Fixed-size integer encoding (not variable-length)
/// - Little-endian byte order
/// - Reject trailing bytes on deserialization
fn config() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

/// Serialize a value to bytes using the deterministic configuration.
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    config()
        .serialize(value)
        .map_err(|e| SerializationError::EncodeFailed(e.to_string()))
}

/// Deserialize a value from bytes.
///
/// Returns an error if the bytes are malformed, there are trailing bytes
/// after the value, or the value doesn't match the expected type.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SerializationError> {
    config()
        .deserialize(bytes)
        .map_err(|e| SerializationError::DecodeFailed(e.to_string()))
}

/// Get the serialized size of a value without actually serializing it.
pub fn serialized_size<T: Serialize>(value: &T) -> Result<u64, SerializationError> {
    config()
        .serialized_size(value)
        .map_err(|e| SerializationError::EncodeFailed(e.to_string()))
}
