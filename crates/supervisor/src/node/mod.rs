//! Cleans up after nodes that leave the cluster.
//!
//! The controller tracks every node name it has seen. When a node is removed
//! its join credential is deleted once; later notifications about the same
//! removal (a relist, a redelivered delete) do not touch the store again.
//! Only the most recent removals are remembered, so the map does not grow
//! with every node that ever left.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use k8s_openapi::api::core::v1::Node;
use tracing::{debug, info, warn};

use crate::factory::{ObjectKey, Reconciler};

mod credentials;

pub use credentials::{secret_name, CredentialStore, KubeCredentialStore};

/// What the controller knows about a node name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Never observed
    Unseen,
    /// Observed and not removed since
    Present,
    /// Removed; the credential cleanup has been attempted
    Removed,
}

/// How many removed node names are remembered.
const REMOVED_LIMIT: usize = 1024;

#[derive(Default)]
struct Nodes {
    states: HashMap<String, NodeState>,
    // Names in the Removed state, oldest first.
    removed: VecDeque<String>,
}

/// Watch-driven reconciler over nodes.
pub struct NodeLifecycleController<S> {
    store: S,
    nodes: Mutex<Nodes>,
    removed_limit: usize,
}

impl<S: CredentialStore> NodeLifecycleController<S> {
    /// Create a controller deleting credentials from `store`.
    pub fn new(store: S) -> Self {
        NodeLifecycleController {
            store,
            nodes: Mutex::new(Nodes::default()),
            removed_limit: REMOVED_LIMIT,
        }
    }

    /// Current state of `node_name`.
    pub fn state(&self, node_name: &str) -> NodeState {
        self.lock_nodes()
            .states
            .get(node_name)
            .copied()
            .unwrap_or(NodeState::Unseen)
    }

    fn lock_nodes(&self) -> std::sync::MutexGuard<'_, Nodes> {
        // Nothing panics while the lock is held, so a poisoned map is still consistent.
        self.nodes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the transition to Removed, returning whether this is a new removal.
    fn mark_removed(&self, node_name: &str) -> bool {
        let mut nodes = self.lock_nodes();
        let previous = nodes
            .states
            .insert(node_name.to_string(), NodeState::Removed);
        if previous == Some(NodeState::Removed) {
            return false;
        }
        nodes.removed.push_back(node_name.to_string());
        while nodes.removed.len() > self.removed_limit {
            if let Some(oldest) = nodes.removed.pop_front() {
                nodes.states.remove(&oldest);
            }
        }
        true
    }

    /// Record the transition to Present, returning the previous state.
    fn mark_present(&self, node_name: &str) -> Option<NodeState> {
        let mut nodes = self.lock_nodes();
        let previous = nodes
            .states
            .insert(node_name.to_string(), NodeState::Present);
        if previous == Some(NodeState::Removed) {
            nodes.removed.retain(|name| name.as_str() != node_name);
        }
        previous
    }
}

#[async_trait::async_trait]
impl<S: CredentialStore> Reconciler<Node> for NodeLifecycleController<S> {
    async fn on_change(&self, node: &Node) -> anyhow::Result<()> {
        let name = match node.metadata.name.as_deref() {
            Some(name) => name,
            None => return Ok(()),
        };
        if node.metadata.deletion_timestamp.is_some() {
            debug!(node = %name, "Node is being deleted, waiting for removal");
            return Ok(());
        }

        match self.mark_present(name) {
            Some(NodeState::Present) => (),
            Some(NodeState::Removed) => debug!(node = %name, "Node rejoined"),
            _ => debug!(node = %name, "Node observed"),
        }
        Ok(())
    }

    async fn on_remove(&self, key: &ObjectKey) -> anyhow::Result<()> {
        let name = key.name.as_str();
        if !self.mark_removed(name) {
            debug!(node = %name, "Node already removed, skipping cleanup");
            return Ok(());
        }

        match self.store.delete(name).await {
            Ok(()) => info!(node = %name, "Removed node password"),
            Err(error) => warn!(node = %name, %error, "Unable to remove node password"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        deletes: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl CredentialStore for CountingStore {
        async fn delete(&self, _node_name: &str) -> anyhow::Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("secret not found");
            }
            Ok(())
        }
    }

    fn node(name: &str) -> Node {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": { "name": name }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_change_marks_present_without_side_effect() {
        let controller = NodeLifecycleController::new(CountingStore::default());
        assert_eq!(controller.state("worker-1"), NodeState::Unseen);

        controller.on_change(&node("worker-1")).await.unwrap();
        controller.on_change(&node("worker-1")).await.unwrap();
        assert_eq!(controller.state("worker-1"), NodeState::Present);
        assert_eq!(controller.store.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_removal_deletes_once() {
        let controller = NodeLifecycleController::new(CountingStore::default());
        let key = ObjectKey::cluster("worker-1");

        controller.on_change(&node("worker-1")).await.unwrap();
        controller.on_remove(&key).await.unwrap();
        controller.on_remove(&key).await.unwrap();
        assert_eq!(controller.state("worker-1"), NodeState::Removed);
        assert_eq!(controller.store.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_is_not_propagated_or_retried() {
        let controller = NodeLifecycleController::new(CountingStore {
            fail: true,
            ..Default::default()
        });
        let key = ObjectKey::cluster("worker-1");

        controller.on_change(&node("worker-1")).await.unwrap();
        controller
            .on_remove(&key)
            .await
            .expect("a failed cleanup should not be an error");
        controller.on_remove(&key).await.unwrap();
        assert_eq!(controller.state("worker-1"), NodeState::Removed);
        assert_eq!(controller.store.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejoined_node_is_a_fresh_identity() {
        let controller = NodeLifecycleController::new(CountingStore::default());
        let key = ObjectKey::cluster("worker-1");

        controller.on_change(&node("worker-1")).await.unwrap();
        controller.on_remove(&key).await.unwrap();
        controller.on_change(&node("worker-1")).await.unwrap();
        assert_eq!(controller.state("worker-1"), NodeState::Present);
        controller.on_remove(&key).await.unwrap();
        assert_eq!(controller.store.deletes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unseen_removal_still_cleans_up() {
        let controller = NodeLifecycleController::new(CountingStore::default());
        controller
            .on_remove(&ObjectKey::cluster("worker-2"))
            .await
            .unwrap();
        assert_eq!(controller.store.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminating_node_is_ignored() {
        let controller = NodeLifecycleController::new(CountingStore::default());
        let mut terminating = node("worker-1");
        terminating.metadata.deletion_timestamp = Some(
            serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap(),
        );
        controller.on_change(&terminating).await.unwrap();
        assert_eq!(controller.state("worker-1"), NodeState::Unseen);
    }

    #[tokio::test]
    async fn test_only_recent_removals_are_remembered() {
        let controller = NodeLifecycleController {
            removed_limit: 2,
            ..NodeLifecycleController::new(CountingStore::default())
        };
        for name in ["worker-1", "worker-2", "worker-3"] {
            controller.on_change(&node(name)).await.unwrap();
            controller
                .on_remove(&ObjectKey::cluster(name))
                .await
                .unwrap();
        }

        assert_eq!(controller.state("worker-1"), NodeState::Unseen);
        assert_eq!(controller.state("worker-2"), NodeState::Removed);
        assert_eq!(controller.state("worker-3"), NodeState::Removed);
        assert_eq!(controller.lock_nodes().states.len(), 2);
        assert_eq!(controller.store.deletes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejoined_node_leaves_the_removal_history() {
        let controller = NodeLifecycleController {
            removed_limit: 1,
            ..NodeLifecycleController::new(CountingStore::default())
        };
        let first = ObjectKey::cluster("worker-1");

        controller.on_remove(&first).await.unwrap();
        controller.on_change(&node("worker-1")).await.unwrap();
        assert!(controller.lock_nodes().removed.is_empty());

        controller
            .on_remove(&ObjectKey::cluster("worker-2"))
            .await
            .unwrap();
        assert_eq!(controller.state("worker-1"), NodeState::Present);
        assert_eq!(controller.state("worker-2"), NodeState::Removed);
    }
}
