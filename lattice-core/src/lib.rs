//! # Lattice Core
//!
//! Core types and serialization for the Lattice overlay network:
//! - Peer identifiers (opaque, fixed-width, self-declared)
//! - Dial addresses (scheme + locator)
//! - Deterministic binary serialization

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod error;
pub mod id;
pub mod serialization;

// Re-export commonly used types at crate root
pub use address::Address;
pub use error::{AddressError, CoreError, IdError, SerializationError};
pub use id::PeerId;
