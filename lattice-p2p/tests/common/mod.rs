//! Shared harness for the acceptance tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use lattice_core::{Address, PeerId};
use lattice_p2p::{
    Connection, ConnectionEvent, ConnectionManager, EventReceiver, ManagerConfig, ManagerHandle,
    MemoryHub, MemoryListener, RpcHandler,
};

/// Timeout for waiting on a single event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A running manager plus its external surfaces.
pub struct TestNode {
    pub handle: ManagerHandle,
    pub events: EventReceiver,
    pub task: JoinHandle<()>,
}

/// Build a `mem` scheme address.
pub fn mem_addr(locator: &str) -> Address {
    Address::new("mem", locator)
}

/// Spawn a manager task with a memory listener registered at `locator`.
pub fn spawn_mem_node(seed: &[u8], hub: &MemoryHub, locator: &str) -> TestNode {
    spawn_mem_node_with_config(seed, hub, locator, ManagerConfig::new())
}

/// Spawn a manager task with a memory listener and a custom configuration.
pub fn spawn_mem_node_with_config(
    seed: &[u8],
    hub: &MemoryHub,
    locator: &str,
    config: ManagerConfig,
) -> TestNode {
    let (manager, handle, events) =
        ConnectionManager::new(PeerId::from_seed(seed), RpcHandler::new(), config);
    handle.add_edge_listener(Box::new(MemoryListener::new(hub.clone(), mem_addr(locator))));
    let task = tokio::spawn(manager.run());
    TestNode {
        handle,
        events,
        task,
    }
}

/// Receive the next event or fail the test.
pub async fn next_event(node: &mut TestNode) -> ConnectionEvent {
    timeout(EVENT_TIMEOUT, node.events.recv())
        .await
        .expect("timed out waiting for a connection event")
        .expect("event stream ended unexpectedly")
}

/// Receive events until a `NewConnection` arrives; returns it.
pub async fn next_new_connection(node: &mut TestNode) -> (Arc<Connection>, bool) {
    loop {
        if let ConnectionEvent::NewConnection {
            connection,
            locally_initiated,
        } = next_event(node).await
        {
            return (connection, locally_initiated);
        }
    }
}

/// Receive events until a `ConnectionAttemptFailure` arrives; returns it.
pub async fn next_failure(node: &mut TestNode) -> (Address, String) {
    loop {
        if let ConnectionEvent::ConnectionAttemptFailure { address, reason } =
            next_event(node).await
        {
            return (address, reason);
        }
    }
}

/// Wait for a condition with timeout, polling periodically.
pub async fn wait_for<F, Fut>(timeout_ms: u64, poll_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout_duration = Duration::from_millis(timeout_ms);
    let poll_duration = Duration::from_millis(poll_ms);

    loop {
        if condition().await {
            return true;
        }
        if start.elapsed() > timeout_duration {
            return false;
        }
        sleep(poll_duration).await;
    }
}
