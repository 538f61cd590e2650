//! Connection manager configuration and wire constants.

use std::time::Duration;

/// Frame magic bytes identifying Lattice traffic on byte-stream transports.
pub const FRAME_MAGIC: [u8; 4] = [0x4C, 0x54, 0x43, 0x45]; // "LTCE"

/// Maximum frame size in bytes (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default timeout for establishing outbound TCP edges.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval at which pending handshakes are checked against their deadline.
pub const HANDSHAKE_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Configuration for the connection manager.
///
/// The manager deliberately has almost no knobs: transports carry their own
/// settings, and the handshake has no timeout unless one is opted into.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// How long an outbound edge may sit with an unanswered inquiry before
    /// the attempt is abandoned. `None` (the default) means the handshake
    /// only resolves through edge closure.
    pub handshake_timeout: Option<Duration>,
}

impl ManagerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_handshake_timeout() {
        assert!(ManagerConfig::new().handshake_timeout.is_none());
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::new().with_handshake_timeout(Duration::from_secs(3));
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(3)));
    }
}
