//! Dial addresses.
//!
//! An address names how to reach a peer: a transport scheme plus a
//! transport-specific locator. Addresses are inputs to dialing and are
//! never used as identity keys.

use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;

/// A scheme-qualified dial target, e.g. `tcp://127.0.0.1:9000`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address {
    scheme: String,
    locator: String,
}

impl Address {
    /// Create an address from a scheme and a locator.
    pub fn new(scheme: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            locator: locator.into(),
        }
    }

    /// The transport scheme, used to route dials to an edge listener.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The transport-specific locator.
    pub fn locator(&self) -> &str {
        &self.locator
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.locator)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, locator) = s.split_once("://").ok_or(AddressError::MissingSeparator)?;
        if scheme.is_empty() {
            return Err(AddressError::EmptyScheme);
        }
        if locator.is_empty() {
            return Err(AddressError::EmptyLocator);
        }
        Ok(Self::new(scheme, locator))
    }
}
