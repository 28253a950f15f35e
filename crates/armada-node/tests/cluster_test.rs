//! Two nodes over real sockets
//!
//! Covers the join handshake, snapshot propagation and head election:
//! the longest-running available node coordinates, and losing the
//! channel to the head hands the title to the survivor.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};

use armada_api::model::HostAndPort;
use armada_auth::service::AuthService;
use armada_node::node::{Node, NodeOptions};

async fn started_node(node_id: &str, peers: Vec<HostAndPort>) -> Arc<Node> {
    let secret = STANDARD.encode(b"armada-node-cluster-test-secret");
    let auth_service = Arc::new(AuthService::new(secret, 600));
    let options = NodeOptions {
        node_id: node_id.to_string(),
        cluster_listener: HostAndPort::new("127.0.0.1", 0),
        peers,
        ..NodeOptions::default()
    };
    let node = Node::new(options, auth_service).unwrap();
    node.start().await.unwrap();
    node
}

fn listener_of(node: &Arc<Node>) -> HostAndPort {
    let address = node.network_server().unwrap().local_address();
    HostAndPort::new("127.0.0.1", address.port())
}

async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {}", description);
}

#[tokio::test]
async fn test_longest_running_node_heads_the_cluster() {
    let node_a = started_node("Node-A", Vec::new()).await;
    // Startup times carry millisecond resolution; make B strictly younger
    tokio::time::sleep(Duration::from_millis(50)).await;
    let node_b = started_node("Node-B", vec![listener_of(&node_a)]).await;

    let registry_a = node_a.components().node_registry.clone();
    let registry_b = node_b.components().node_registry.clone();

    // The hello round trip fills both membership views
    wait_until("both views hold two members", || {
        registry_a.node_servers().len() == 2 && registry_b.node_servers().len() == 2
    })
    .await;

    // Snapshots travelled in both directions
    let a_seen_by_b = registry_b.node_server("Node-A").unwrap();
    assert!(a_seen_by_b.available());
    assert!(a_seen_by_b.snapshot().is_some());
    let b_seen_by_a = registry_a.node_server("Node-B").unwrap();
    assert!(b_seen_by_a.available());
    assert!(b_seen_by_a.snapshot().is_some());

    // A has been running longer, so every view elects A
    assert_eq!(registry_a.head_node().unique_id(), "Node-A");
    assert_eq!(registry_b.head_node().unique_id(), "Node-A");
    assert!(registry_a.is_head_local());
    assert!(!registry_b.is_head_local());

    // Losing the channel to A makes A unavailable on B, and the title
    // falls back to the longest-running node still reachable: B itself
    node_a.stop().await;
    wait_until("B marks A unavailable", || {
        !registry_b.node_server("Node-A").unwrap().available()
    })
    .await;
    assert_eq!(registry_b.head_node().unique_id(), "Node-B");
    assert!(registry_b.is_head_local());

    node_b.stop().await;
}

#[tokio::test]
async fn test_join_pushes_shared_state_to_the_peer() {
    let node_a = started_node("Node-Sync-A", Vec::new()).await;
    node_a
        .auth_service()
        .users()
        .create_user("synced-account", "hunter2", BTreeSet::new())
        .unwrap();

    let node_b = started_node("Node-Sync-B", vec![listener_of(&node_a)]).await;

    // The accepting side follows the hello with a full sync push; the
    // user store document replaces B's local store
    wait_until("user store arrives on B", || {
        node_b.auth_service().users().user("synced-account").is_some()
    })
    .await;

    // The push only flows towards the joiner; B's empty store must not
    // have replaced A's
    assert!(
        node_a
            .auth_service()
            .users()
            .user("synced-account")
            .is_some()
    );

    node_a.stop().await;
    node_b.stop().await;
}
