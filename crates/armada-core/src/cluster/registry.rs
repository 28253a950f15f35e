//! Node membership registry and head election
//!
//! Every node keeps its own registry with one entry per known cluster
//! participant, the local node included. The head node is not chosen by a
//! consensus round: each node derives it deterministically from its local
//! view, and converged views yield the same head everywhere.
//!
//! Election rule: start from the local node and hand the title to any
//! available node whose reported startup time is strictly earlier. The
//! longest-running available node wins. A node that has not reported a
//! snapshot yet is ineligible. The election cannot fail: with no eligible
//! peers the local node is its own head.

use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, Ordering},
};

use armada_api::model::{ClusterNode, NodeInfoSnapshot};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::event::{HeadNodeChangeEvent, NodeAvailabilityEvent, NodeJoinEvent, NodeLeaveEvent};
use crate::event::EventBus;

/// One known cluster participant and its last reported state.
///
/// Identity is fixed at registration; availability and the snapshot are
/// updated in place as heartbeats arrive, so clones of the handle always
/// observe the current state.
pub struct NodeServer {
    unique_id: String,
    local: bool,
    info: RwLock<ClusterNode>,
    available: AtomicBool,
    snapshot: RwLock<Option<NodeInfoSnapshot>>,
}

impl NodeServer {
    fn new(info: ClusterNode, local: bool) -> Self {
        Self {
            unique_id: info.unique_id.clone(),
            local,
            info: RwLock::new(info),
            available: AtomicBool::new(local),
            snapshot: RwLock::new(None),
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> ClusterNode {
        self.info
            .read()
            .map(|info| info.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<NodeInfoSnapshot> {
        self.snapshot.read().ok().and_then(|guard| guard.clone())
    }

    /// Startup time from the last snapshot; `None` until one arrived.
    pub fn startup_millis(&self) -> Option<i64> {
        self.snapshot
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|snapshot| snapshot.startup_millis))
    }

    fn set_available(&self, available: bool) -> bool {
        self.available.swap(available, Ordering::SeqCst)
    }

    fn set_snapshot(&self, snapshot: NodeInfoSnapshot) {
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = Some(snapshot);
        }
    }

    fn update_info(&self, info: ClusterNode) {
        if let Ok(mut guard) = self.info.write() {
            *guard = info;
        }
    }
}

/// Local membership view plus the derived head node
pub struct NodeRegistry {
    local_id: String,
    nodes: Arc<DashMap<String, Arc<NodeServer>>>,
    head_id: RwLock<String>,
    event_bus: Arc<EventBus>,
}

impl NodeRegistry {
    /// Create a registry seeded with the local node, which starts
    /// available, carrying `snapshot`, and as its own head.
    pub fn new(local: ClusterNode, snapshot: NodeInfoSnapshot, event_bus: Arc<EventBus>) -> Self {
        let local_id = local.unique_id.clone();
        let server = Arc::new(NodeServer::new(local, true));
        server.set_snapshot(snapshot);

        let nodes = Arc::new(DashMap::new());
        nodes.insert(local_id.clone(), server);

        Self {
            local_id: local_id.clone(),
            nodes,
            head_id: RwLock::new(local_id),
            event_bus,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn local_node(&self) -> Arc<NodeServer> {
        // The local entry is inserted at construction and never removed
        self.nodes
            .get(&self.local_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Arc::new(NodeServer::new(ClusterNode::default(), true)))
    }

    /// Register a node, or update identity details of an existing entry.
    ///
    /// Idempotent per unique id: re-registering keeps availability and the
    /// last snapshot, refreshing only listeners and properties. New nodes
    /// start unavailable until a snapshot or hello marks them otherwise.
    pub fn register_node(&self, info: ClusterNode) -> Arc<NodeServer> {
        if info.unique_id == self.local_id {
            return self.local_node();
        }

        if let Some(existing) = self.nodes.get(&info.unique_id) {
            let existing = existing.value().clone();
            existing.update_info(info);
            return existing;
        }

        let node_id = info.unique_id.clone();
        let server = Arc::new(NodeServer::new(info.clone(), false));
        self.nodes.insert(node_id.clone(), server.clone());
        info!(node_id = %node_id, "node joined the cluster view");
        self.event_bus.publish(&NodeJoinEvent { node: info });
        server
    }

    /// Remove a node from the view. Removing the local node is refused;
    /// removing an unknown node is a no-op. Removing the current head
    /// triggers a refresh.
    pub fn unregister_node(&self, node_id: &str) -> Option<Arc<NodeServer>> {
        if node_id == self.local_id {
            warn!(node_id = %node_id, "refusing to unregister the local node");
            return None;
        }

        let removed = self.nodes.remove(node_id).map(|(_, server)| server)?;
        info!(node_id = %node_id, "node left the cluster view");
        self.event_bus.publish(&NodeLeaveEvent {
            node_id: node_id.to_string(),
        });
        self.refresh_head_node();
        Some(removed)
    }

    pub fn node_server(&self, node_id: &str) -> Option<Arc<NodeServer>> {
        self.nodes.get(node_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the current membership set, local node included.
    pub fn node_servers(&self) -> Vec<Arc<NodeServer>> {
        self.nodes
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn available_nodes(&self) -> Vec<Arc<NodeServer>> {
        self.nodes
            .iter()
            .filter(|entry| entry.value().available())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Flip a node's availability and re-derive the head. Returns false
    /// for unknown nodes.
    pub fn mark_available(&self, node_id: &str, available: bool) -> bool {
        let Some(server) = self.node_server(node_id) else {
            return false;
        };

        let previous = server.set_available(available);
        if previous != available {
            info!(node_id = %node_id, available, "node availability changed");
            self.event_bus.publish(&NodeAvailabilityEvent {
                node_id: node_id.to_string(),
                available,
            });
            self.refresh_head_node();
        }
        true
    }

    /// Store a fresh snapshot for a node, mark it available (a snapshot is
    /// proof of life) and re-derive the head. Returns false for unknown
    /// nodes.
    pub fn update_snapshot(&self, node_id: &str, snapshot: NodeInfoSnapshot) -> bool {
        let Some(server) = self.node_server(node_id) else {
            return false;
        };

        server.set_snapshot(snapshot);
        let was_available = server.set_available(true);
        if !was_available && !server.is_local() {
            self.event_bus.publish(&NodeAvailabilityEvent {
                node_id: node_id.to_string(),
                available: true,
            });
        }
        self.refresh_head_node();
        true
    }

    /// The current head. Falls back to a fresh election if the cached head
    /// left the membership set since the last refresh, so the returned
    /// node is always a member.
    pub fn head_node(&self) -> Arc<NodeServer> {
        let cached = self
            .head_id
            .read()
            .ok()
            .and_then(|head_id| self.node_server(&head_id));
        match cached {
            Some(server) => server,
            None => self.refresh_head_node(),
        }
    }

    pub fn is_head_local(&self) -> bool {
        self.head_node().is_local()
    }

    /// Re-derive the head from the current view.
    ///
    /// Starts from the local node and hands the title to any available
    /// node with a snapshot whose startup time is strictly earlier than
    /// the candidate's. Strict comparison keeps the first-considered node
    /// on equal startup times; iteration order is not fixed, so exact ties
    /// may resolve differently per node until the next snapshot breaks
    /// them.
    pub fn refresh_head_node(&self) -> Arc<NodeServer> {
        let mut choice = self.local_node();

        for entry in self.nodes.iter() {
            let node = entry.value();
            if node.is_local() || !node.available() {
                continue;
            }
            let Some(startup_millis) = node.startup_millis() else {
                continue;
            };
            if startup_millis < choice.startup_millis().unwrap_or(i64::MAX) {
                choice = node.clone();
            }
        }

        let previous_id = self
            .head_id
            .read()
            .map(|head_id| head_id.clone())
            .unwrap_or_default();
        if previous_id != choice.unique_id() {
            if let Ok(mut head_id) = self.head_id.write() {
                *head_id = choice.unique_id().to_string();
            }
            info!(
                previous = %previous_id,
                current = %choice.unique_id(),
                "head node changed"
            );
            self.event_bus.publish(&HeadNodeChangeEvent {
                previous_id,
                current_id: choice.unique_id().to_string(),
            });
        } else {
            debug!(head = %previous_id, "head node unchanged after refresh");
        }

        choice
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use armada_api::model::HostAndPort;

    use super::*;

    fn registry(local_id: &str, startup_millis: i64) -> NodeRegistry {
        let local = ClusterNode::new(local_id, vec![HostAndPort::new("127.0.0.1", 1410)]);
        NodeRegistry::new(
            local,
            NodeInfoSnapshot::new(startup_millis),
            Arc::new(EventBus::new()),
        )
    }

    fn join(registry: &NodeRegistry, node_id: &str, startup_millis: i64) {
        registry.register_node(ClusterNode::new(node_id, Vec::new()));
        registry.update_snapshot(node_id, NodeInfoSnapshot::new(startup_millis));
    }

    #[test]
    fn test_single_node_is_its_own_head() {
        let registry = registry("Node-1", 5000);
        assert_eq!(registry.head_node().unique_id(), "Node-1");
        assert!(registry.is_head_local());
    }

    #[test]
    fn test_earliest_available_node_wins() {
        let registry = registry("Node-1", 5000);
        join(&registry, "Node-2", 3000);
        join(&registry, "Node-3", 4000);

        assert_eq!(registry.head_node().unique_id(), "Node-2");
        assert!(!registry.is_head_local());
    }

    #[test]
    fn test_unavailable_nodes_are_ineligible() {
        let registry = registry("Node-1", 5000);
        join(&registry, "Node-2", 3000);
        assert_eq!(registry.head_node().unique_id(), "Node-2");

        registry.mark_available("Node-2", false);
        assert_eq!(registry.head_node().unique_id(), "Node-1");

        // Recovery hands the title back
        registry.mark_available("Node-2", true);
        assert_eq!(registry.head_node().unique_id(), "Node-2");
    }

    #[test]
    fn test_node_without_snapshot_is_ineligible() {
        let registry = registry("Node-1", 5000);
        registry.register_node(ClusterNode::new("Node-2", Vec::new()));
        registry.mark_available("Node-2", true);

        // Node-2 is available but never reported a snapshot
        assert_eq!(registry.head_node().unique_id(), "Node-1");
    }

    #[test]
    fn test_head_removal_recomputes_without_gap() {
        let registry = registry("Node-1", 5000);
        join(&registry, "Node-2", 1000);
        join(&registry, "Node-3", 2000);
        assert_eq!(registry.head_node().unique_id(), "Node-2");

        registry.unregister_node("Node-2");
        assert_eq!(registry.head_node().unique_id(), "Node-3");

        registry.unregister_node("Node-3");
        assert_eq!(registry.head_node().unique_id(), "Node-1");
    }

    #[test]
    fn test_head_is_always_a_member() {
        let registry = registry("Node-1", 5000);
        join(&registry, "Node-2", 1000);

        for _ in 0..3 {
            let head = registry.head_node();
            assert!(registry.node_server(head.unique_id()).is_some());
            registry.unregister_node("Node-2");
        }
    }

    #[test]
    fn test_local_node_cannot_be_unregistered() {
        let registry = registry("Node-1", 5000);
        assert!(registry.unregister_node("Node-1").is_none());
        assert_eq!(registry.node_servers().len(), 1);
    }

    #[test]
    fn test_register_is_idempotent_and_keeps_state() {
        let registry = registry("Node-1", 5000);
        join(&registry, "Node-2", 1000);

        // Re-registration with fresh listeners must not reset the snapshot
        let updated = ClusterNode::new("Node-2", vec![HostAndPort::new("10.0.0.2", 1410)]);
        let server = registry.register_node(updated);
        assert_eq!(server.startup_millis(), Some(1000));
        assert_eq!(server.info().listeners.len(), 1);
        assert_eq!(registry.node_servers().len(), 2);
    }

    #[test]
    fn test_head_change_publishes_event() {
        let bus = Arc::new(EventBus::new());
        let local = ClusterNode::new("Node-1", Vec::new());
        let registry = NodeRegistry::new(local, NodeInfoSnapshot::new(5000), bus.clone());

        let changes = Arc::new(AtomicUsize::new(0));
        let counter = changes.clone();
        bus.register_listener::<HeadNodeChangeEvent, _>(
            armada_api::model::OwnerToken::random(),
            move |event| {
                assert_eq!(event.current_id, "Node-2");
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        join(&registry, "Node-2", 1000);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_update_marks_available() {
        let registry = registry("Node-1", 5000);
        registry.register_node(ClusterNode::new("Node-2", Vec::new()));
        assert!(!registry.node_server("Node-2").unwrap().available());

        registry.update_snapshot("Node-2", NodeInfoSnapshot::new(1000));
        assert!(registry.node_server("Node-2").unwrap().available());
        assert_eq!(registry.available_nodes().len(), 2);
        assert_eq!(registry.head_node().unique_id(), "Node-2");
    }
}
