//! Collaborator interfaces a policy drives.
//!
//! - `NodeInventory`: the node source owning the nodes; forwards acquisition
//!   requests to the infrastructure
//! - `ResourceCore`: the resource manager core; removes nodes and tracks clients
//! - `MonitoringEndpoint`: resource manager event subscription
//!
//! Acquire and remove requests are fire-and-forget: they enqueue work and
//! return immediately. Only queries are awaited.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use nsp_access::Caller;
use nsp_events::{CoreEvent, InitialState, NodeEvent, NodeSourceEvent, RmEvent};
use thiserror::Error;
use tokio::sync::oneshot;

/// Extra deployment settings passed with a batched acquire request.
pub type NodeConfiguration = BTreeMap<String, serde_json::Value>;

/// Errors reported by collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// The collaborator cannot be reached (e.g. it is being torn down).
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The collaborator refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// A node still being deployed, or whose deployment was lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployingNode {
    /// Node URL.
    pub url: String,

    /// True if the deployment is lost.
    pub lost: bool,
}

/// Pending outcome of a single-node removal.
#[derive(Debug)]
pub struct RemovalTicket(oneshot::Receiver<bool>);

impl RemovalTicket {
    /// Create a ticket resolved later through the returned sender.
    pub fn pending() -> (oneshot::Sender<bool>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self(rx))
    }

    /// Create an already resolved ticket.
    pub fn resolved(removed: bool) -> Self {
        let (tx, ticket) = Self::pending();
        let _ = tx.send(removed);
        ticket
    }

    /// Wait for the removal outcome. A dropped ticket counts as not removed.
    pub async fn confirmed(self) -> bool {
        self.0.await.unwrap_or(false)
    }
}

/// The node source a policy acquires nodes for.
#[async_trait]
pub trait NodeInventory: Send + Sync {
    /// Node source name.
    fn name(&self) -> &str;

    /// Request one node.
    fn acquire_node(&self);

    /// Request `count` nodes in one batch.
    fn acquire_nodes(&self, count: usize, config: NodeConfiguration);

    /// Request every node the infrastructure can provide.
    fn acquire_all_nodes(&self);

    /// URLs of nodes currently down.
    async fn down_nodes(&self) -> Result<Vec<String>, InventoryError>;

    /// Nodes currently deploying, or whose deployment was lost.
    async fn deploying_and_lost_nodes(&self) -> Result<Vec<DeployingNode>, InventoryError>;

    /// Tell the node source its policy finished shutting down.
    async fn finish_shutdown(&self, initiator: &Caller) -> Result<(), InventoryError>;

    /// The resource manager core this node source belongs to.
    fn core(&self) -> Arc<dyn ResourceCore>;
}

/// The resource manager core.
#[async_trait]
pub trait ResourceCore: Send + Sync {
    /// Remove one node.
    fn remove_node(&self, node_url: &str, preemptive: bool) -> RemovalTicket;

    /// Remove `count` nodes of a node source.
    fn remove_nodes(&self, count: usize, node_source: &str, preemptive: bool);

    /// Remove every node of a node source.
    fn remove_all_nodes(&self, node_source: &str, preemptive: bool);

    /// Disconnect a client identity.
    async fn disconnect(&self, identity: &str) -> Result<(), InventoryError>;

    /// Event subscription endpoint.
    fn monitoring(&self) -> Arc<dyn MonitoringEndpoint>;
}

/// Receiver of resource manager events.
pub trait RmEventListener: Send + Sync {
    /// Identity used to unsubscribe.
    fn listener_id(&self) -> &str;

    /// A core event.
    fn core_event(&self, event: CoreEvent);

    /// A node source event.
    fn node_source_event(&self, event: NodeSourceEvent);

    /// A node event.
    fn node_event(&self, event: NodeEvent);

    /// Route any event to its callback.
    fn dispatch(&self, event: RmEvent) {
        match event {
            RmEvent::Core(event) => self.core_event(event),
            RmEvent::NodeSource(event) => self.node_source_event(event),
            RmEvent::Node(event) => self.node_event(event),
        }
    }
}

/// Resource manager event subscription.
#[async_trait]
pub trait MonitoringEndpoint: Send + Sync {
    /// Register a listener; returns the current state snapshot.
    async fn subscribe(
        &self,
        listener: Arc<dyn RmEventListener>,
    ) -> Result<InitialState, InventoryError>;

    /// Remove a listener.
    async fn unsubscribe(&self, listener_id: &str) -> Result<(), InventoryError>;
}
