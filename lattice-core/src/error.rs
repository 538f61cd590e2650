//! Error types for the Lattice core crate.

use std::fmt;

/// Top-level error type for lattice-core operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// Serialization or deserialization failed.
    Serialization(SerializationError),
    /// Peer id parsing failed.
    Id(IdError),
    /// Address parsing failed.
    Address(AddressError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Serialization(e) => write!(f, "serialization error: {}", e),
            CoreError::Id(e) => write!(f, "peer id error: {}", e),
            CoreError::Address(e) => write!(f, "address error: {}", e),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<SerializationError> for CoreError {
    fn from(e: SerializationError) -> Self {
        CoreError::Serialization(e)
    }
}

impl From<IdError> for CoreError {
    fn from(e: IdError) -> Self {
        CoreError::Id(e)
    }
}

impl From<AddressError> for CoreError {
    fn from(e: AddressError) -> Self {
        CoreError::Address(e)
    }
}

/// Errors related to serialization and deserialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SerializationError {
    /// Failed to encode data to bytes.
    EncodeFailed(String),
    /// Failed to decode data from bytes.
    DecodeFailed(String),
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::EncodeFailed(msg) => write!(f, "encode failed: {}", msg),
            SerializationError::DecodeFailed(msg) => write!(f, "decode failed: {}", msg),
        }
    }
}

impl std::error::Error for SerializationError {}

/// Errors related to peer id construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdError {
    /// The byte representation has the wrong length.
    InvalidLength {
        /// Expected number of bytes.
        expected: usize,
        /// Number of bytes provided.
        actual: usize,
    },
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdError::InvalidLength { expected, actual } => {
                write!(f, "peer id must be {} bytes, got {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for IdError {}

/// Errors related to address parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressError {
    /// The address string is missing the `scheme://locator` separator.
    MissingSeparator,
    /// The scheme portion is empty.
    EmptyScheme,
    /// The locator portion is empty.
    EmptyLocator,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::MissingSeparator => write!(f, "address must be scheme://locator"),
            AddressError::EmptyScheme => write!(f, "address scheme is empty"),
            AddressError::EmptyLocator => write!(f, "address locator is empty"),
        }
    }
}

impl std::error::Error for AddressError {}
