//! Edge listener registry.

use lattice_core::Address;

use super::EdgeListener;

/// Routes outbound dials to the first registered listener that handles the
/// address scheme.
#[derive(Default)]
pub struct EdgeFactory {
    listeners: Vec<Box<dyn EdgeListener>>,
    stopped: bool,
}

impl EdgeFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Listeners are consulted in registration order.
    pub fn add_listener(&mut self, listener: Box<dyn EdgeListener>) {
        self.listeners.push(listener);
    }

    /// Ask a listener to dial the address. Returns `false` if no registered
    /// listener handles it.
    pub fn create_edge_to(&mut self, address: &Address) -> bool {
        for listener in &mut self.listeners {
            if listener.handles(address) {
                listener.create_edge_to(address);
                return true;
            }
        }
        false
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stop every listener. May be called once; repeat calls are ignored
    /// with a warning.
    pub fn stop(&mut self) {
        if self.stopped {
            tracing::warn!("edge factory already stopped");
            return;
        }
        self.stopped = true;
        for listener in &mut self.listeners {
            listener.stop();
        }
    }
}
