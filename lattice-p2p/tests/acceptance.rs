//! Acceptance tests for the connection manager.
//!
//! Each test drives live manager tasks end to end and asserts the emitted
//! event sequences and table snapshots:
//! 1. Outbound handshake establishes a connection on both sides
//! 2. Self-connect is vetoed
//! 3. Duplicate outbound connections are vetoed
//! 4. A new inbound connect displaces the previous connection from that peer
//! 5. Local teardown propagates to the remote side
//! 6. Global shutdown drains every connection and fires exactly once
//! 7. Dials with no matching listener fail cleanly
//! 8. The handshake also works over TCP

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use lattice_core::{Address, PeerId};
use lattice_p2p::{ConnectionEvent, ConnectionManager, ManagerConfig, MemoryHub, RpcHandler, TcpEdgeListener};

use common::{
    mem_addr, next_event, next_failure, next_new_connection, spawn_mem_node, wait_for, TestNode,
    EVENT_TIMEOUT,
};

// ============================================================================
// Test 1: Outbound handshake
// ============================================================================

#[tokio::test]
async fn test_outbound_handshake_establishes_connection() {
    let hub = MemoryHub::new();
    let mut a = spawn_mem_node(b"A", &hub, "a");
    let mut b = spawn_mem_node(b"B", &hub, "b");

    a.handle.connect_to(mem_addr("b"));

    let (a_conn, a_initiated) = next_new_connection(&mut a).await;
    assert!(a_initiated, "the dialer's connection is locally initiated");
    assert_eq!(a_conn.remote_id(), &PeerId::from_seed(b"B"));
    assert_eq!(a_conn.local_id(), &PeerId::from_seed(b"A"));

    let (b_conn, b_initiated) = next_new_connection(&mut b).await;
    assert!(!b_initiated, "the acceptor's connection is remotely initiated");
    assert_eq!(b_conn.remote_id(), &PeerId::from_seed(b"A"));

    let a_snapshot = a.handle.snapshot().await.expect("manager is running");
    assert_eq!(a_snapshot.outbound_peers, vec![PeerId::from_seed(b"B")]);
    assert!(a_snapshot.inbound_peers.is_empty());
    assert_eq!(a_snapshot.outbound_edges, 1);

    let b_snapshot = b.handle.snapshot().await.expect("manager is running");
    assert_eq!(b_snapshot.inbound_peers, vec![PeerId::from_seed(b"A")]);
    assert!(b_snapshot.outbound_peers.is_empty());
    assert_eq!(b_snapshot.inbound_edges, 1);
}

// ============================================================================
// Test 2: Self-connect veto
// ============================================================================

#[tokio::test]
async fn test_self_connect_is_vetoed() {
    let hub = MemoryHub::new();
    let mut a = spawn_mem_node(b"A", &hub, "a");

    a.handle.connect_to(mem_addr("a"));

    let (address, reason) = next_failure(&mut a).await;
    assert_eq!(address, mem_addr("a"));
    assert_eq!(reason, "Attempting to connect to ourself");

    // Both halves of the self-dial pair drain out of the tables.
    let handle = a.handle.clone();
    let drained = wait_for(5000, 20, || {
        let handle = handle.clone();
        async move {
            match handle.snapshot().await {
                Some(snapshot) => snapshot.outbound_edges == 0 && snapshot.inbound_edges == 0,
                None => false,
            }
        }
    })
    .await;
    assert!(drained, "vetoed edges should leave the tables");

    // No connection was ever announced.
    let snapshot = a.handle.snapshot().await.expect("manager is running");
    assert!(snapshot.outbound_peers.is_empty());
    assert!(snapshot.inbound_peers.is_empty());
}

// ============================================================================
// Test 3: Duplicate outbound veto
// ============================================================================

#[tokio::test]
async fn test_duplicate_outbound_is_vetoed() {
    let hub = MemoryHub::new();
    let mut a = spawn_mem_node(b"A", &hub, "a");
    let mut b = spawn_mem_node(b"B", &hub, "b");
    b.handle
        .add_edge_listener(Box::new(lattice_p2p::MemoryListener::new(
            hub.clone(),
            mem_addr("b2"),
        )));

    a.handle.connect_to(mem_addr("b"));
    let (first, _) = next_new_connection(&mut a).await;
    next_new_connection(&mut b).await;

    // A second route to the same peer id gets vetoed.
    a.handle.connect_to(mem_addr("b2"));
    let (address, reason) = next_failure(&mut a).await;
    assert_eq!(address, mem_addr("b2"));
    assert_eq!(reason, "Duplicate connection");

    // The original connection is untouched.
    assert!(!first.is_disconnecting());
    let snapshot = a.handle.snapshot().await.expect("manager is running");
    assert_eq!(snapshot.outbound_peers, vec![PeerId::from_seed(b"B")]);
}

// ============================================================================
// Test 4: Inbound replacement race
// ============================================================================

#[tokio::test]
async fn test_new_inbound_connect_displaces_previous() {
    let hub = MemoryHub::new();
    let mut b = spawn_mem_node(b"B", &hub, "b");
    // Two distinct processes declaring the same peer id.
    let mut a1 = spawn_mem_node(b"A", &hub, "a1");
    let mut a2 = spawn_mem_node(b"A", &hub, "a2");

    a1.handle.connect_to(mem_addr("b"));
    next_new_connection(&mut a1).await;
    let (old, _) = next_new_connection(&mut b).await;

    a2.handle.connect_to(mem_addr("b"));
    next_new_connection(&mut a2).await;
    let (fresh, initiated) = next_new_connection(&mut b).await;
    assert!(!initiated);
    assert!(!Arc::ptr_eq(&old, &fresh));

    // The displaced connection goes through full teardown.
    loop {
        match next_event(&mut b).await {
            ConnectionEvent::ConnectionDisconnected { connection, .. } => {
                assert!(Arc::ptr_eq(&connection, &old));
                break;
            }
            other => panic!("unexpected event while waiting for teardown: {:?}", other),
        }
    }
    assert!(old.is_disconnecting());

    let snapshot = b.handle.snapshot().await.expect("manager is running");
    assert_eq!(snapshot.inbound_peers, vec![PeerId::from_seed(b"A")]);
    assert_eq!(snapshot.inbound_edges, 1);
}

// ============================================================================
// Test 5: Local teardown propagates
// ============================================================================

#[tokio::test]
async fn test_local_disconnect_reaches_remote() {
    let hub = MemoryHub::new();
    let mut a = spawn_mem_node(b"A", &hub, "a");
    let mut b = spawn_mem_node(b"B", &hub, "b");

    a.handle.connect_to(mem_addr("b"));
    let (conn, _) = next_new_connection(&mut a).await;
    let (b_conn, _) = next_new_connection(&mut b).await;

    conn.disconnect();

    match next_event(&mut a).await {
        ConnectionEvent::ConnectionDisconnected { connection, reason } => {
            assert!(Arc::ptr_eq(&connection, &conn));
            assert_eq!(reason, "Local disconnect request");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    match next_event(&mut b).await {
        ConnectionEvent::ConnectionDisconnected { connection, .. } => {
            assert!(Arc::ptr_eq(&connection, &b_conn));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(b_conn.is_disconnecting(), "the remote processed the disconnect notice");

    let a_snapshot = a.handle.snapshot().await.expect("manager is running");
    assert_eq!(a_snapshot.outbound_edges, 0);
    let b_snapshot = b.handle.snapshot().await.expect("manager is running");
    assert_eq!(b_snapshot.inbound_edges, 0);
}

// ============================================================================
// Test 6: Global shutdown
// ============================================================================

#[tokio::test]
async fn test_global_shutdown_drains_and_fires_once() {
    let hub = MemoryHub::new();
    let mut a = spawn_mem_node(b"A", &hub, "a");
    let mut b = spawn_mem_node(b"B", &hub, "b");

    // One outbound and one inbound connection at A.
    a.handle.connect_to(mem_addr("b"));
    next_new_connection(&mut a).await;
    next_new_connection(&mut b).await;
    b.handle.connect_to(mem_addr("a"));
    next_new_connection(&mut a).await;
    next_new_connection(&mut b).await;

    // Two Disconnect calls produce exactly one shutdown signal.
    a.handle.disconnect();
    a.handle.disconnect();

    let mut torn_down = 0;
    loop {
        match next_event(&mut a).await {
            ConnectionEvent::ConnectionDisconnected { .. } => torn_down += 1,
            ConnectionEvent::Disconnected => break,
            other => panic!("unexpected event during shutdown: {:?}", other),
        }
    }
    assert_eq!(torn_down, 2, "every connection is dismantled before the final signal");

    // The event stream ends after the single Disconnected: the manager task
    // exits and drops its sender.
    assert!(a.events.recv().await.is_none());
    timeout(EVENT_TIMEOUT, a.task)
        .await
        .expect("manager task should stop")
        .expect("manager task should not panic");

    // The handle is now dead.
    assert!(a.handle.snapshot().await.is_none());

    // The remote side observed both teardowns.
    let observed = wait_for(5000, 20, || {
        let handle = b.handle.clone();
        async move {
            match handle.snapshot().await {
                Some(snapshot) => snapshot.inbound_edges == 0 && snapshot.outbound_edges == 0,
                None => false,
            }
        }
    })
    .await;
    assert!(observed, "the remote's tables should drain");
}

#[tokio::test]
async fn test_shutdown_with_no_edges_fires_immediately() {
    let hub = MemoryHub::new();
    let mut a = spawn_mem_node(b"A", &hub, "a");

    a.handle.disconnect();

    assert!(matches!(
        next_event(&mut a).await,
        ConnectionEvent::Disconnected
    ));
    timeout(EVENT_TIMEOUT, a.task)
        .await
        .expect("manager task should stop")
        .expect("manager task should not panic");
}

// ============================================================================
// Test 7: No listener for the address
// ============================================================================

#[tokio::test]
async fn test_connect_without_matching_listener_fails() {
    let hub = MemoryHub::new();
    let mut a = spawn_mem_node(b"A", &hub, "a");

    a.handle.connect_to(Address::new("carrier-pigeon", "rooftop"));

    let (address, reason) = next_failure(&mut a).await;
    assert_eq!(address, Address::new("carrier-pigeon", "rooftop"));
    assert_eq!(reason, "No EdgeListener to handle request");
}

// ============================================================================
// Test 8: Handshake over TCP
// ============================================================================

fn spawn_tcp_node(seed: &[u8]) -> (TestNode, tokio::sync::oneshot::Receiver<std::net::SocketAddr>) {
    let (manager, handle, events) = ConnectionManager::new(
        PeerId::from_seed(seed),
        RpcHandler::new(),
        ManagerConfig::new(),
    );
    let mut listener = TcpEdgeListener::new("127.0.0.1:0".parse().unwrap())
        .with_connect_timeout(Duration::from_secs(5));
    let bound = listener.bound_addr_receiver();
    handle.add_edge_listener(Box::new(listener));
    let task = tokio::spawn(manager.run());
    (
        TestNode {
            handle,
            events,
            task,
        },
        bound,
    )
}

#[tokio::test]
async fn test_handshake_over_tcp() {
    let (mut a, _a_bound) = spawn_tcp_node(b"A");
    let (mut b, b_bound) = spawn_tcp_node(b"B");

    let b_addr = timeout(EVENT_TIMEOUT, b_bound)
        .await
        .expect("listener should bind")
        .expect("bound address should be reported");

    a.handle.connect_to(Address::new("tcp", b_addr.to_string()));

    let (a_conn, a_initiated) = next_new_connection(&mut a).await;
    assert!(a_initiated);
    assert_eq!(a_conn.remote_id(), &PeerId::from_seed(b"B"));

    let (b_conn, b_initiated) = next_new_connection(&mut b).await;
    assert!(!b_initiated);
    assert_eq!(b_conn.remote_id(), &PeerId::from_seed(b"A"));

    // Shutdown drains A and, via TCP teardown, B's table too.
    a.handle.disconnect();
    loop {
        match next_event(&mut a).await {
            ConnectionEvent::Disconnected => break,
            ConnectionEvent::ConnectionDisconnected { .. } => {}
            other => panic!("unexpected event during shutdown: {:?}", other),
        }
    }

    let drained = wait_for(5000, 50, || {
        let handle = b.handle.clone();
        async move {
            match handle.snapshot().await {
                Some(snapshot) => snapshot.inbound_edges == 0,
                None => false,
            }
        }
    })
    .await;
    assert!(drained, "the remote should observe the TCP teardown");
}
