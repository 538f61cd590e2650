//! Deterministic binary serialization for the Lattice overlay.
//!
//! All wire payloads are serialized using bincode with a deterministic
//! configuration, so the same input always produces the same bytes on
//! every platform.

mod bincode_config;

pub use bincode_config::{deserialize, serialize, serialized_size};
