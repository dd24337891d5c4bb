//! In-memory node source and resource manager.
//!
//! `MockInventory` records every request a policy issues and serves
//! configurable down and lost node lists. Removals succeed unless refused,
//! and removed nodes disappear from those lists. Events pushed with `emit`
//! are broadcast to every subscribed listener.
//!
//! Used by the development binary and by tests.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use nsp_access::Caller;
use nsp_events::{InitialState, RmEvent};
use tracing::{debug, info};

use crate::inventory::{
    DeployingNode, InventoryError, MonitoringEndpoint, NodeConfiguration, NodeInventory,
    RemovalTicket, ResourceCore, RmEventListener,
};

/// A request recorded by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum InventoryCall {
    AcquireNode,
    AcquireNodes {
        count: usize,
        config: NodeConfiguration,
    },
    AcquireAllNodes,
    RemoveNode {
        url: String,
        preemptive: bool,
    },
    RemoveNodes {
        count: usize,
        node_source: String,
        preemptive: bool,
    },
    RemoveAllNodes {
        node_source: String,
        preemptive: bool,
    },
    FinishShutdown {
        initiator: String,
    },
    Disconnect {
        identity: String,
    },
    Subscribe {
        listener_id: String,
    },
    Unsubscribe {
        listener_id: String,
    },
}

#[derive(Default)]
struct MockState {
    calls: Vec<InventoryCall>,
    down: Vec<String>,
    deploying: Vec<DeployingNode>,
    refused_removals: BTreeSet<String>,
    listeners: Vec<Arc<dyn RmEventListener>>,
    initial_state: InitialState,
    fail_queries: bool,
    fail_unsubscribe: bool,
    fail_disconnect: bool,
}

struct Shared {
    node_source: String,
    state: Mutex<MockState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: InventoryCall) {
        debug!(node_source = %self.node_source, ?call, "[MOCK] Inventory call");
        self.state().calls.push(call);
    }
}

/// Mock node source.
#[derive(Clone)]
pub struct MockInventory {
    shared: Arc<Shared>,
    core: Arc<MockCore>,
}

impl MockInventory {
    pub fn new(node_source: impl Into<String>) -> Self {
        let shared = Arc::new(Shared {
            node_source: node_source.into(),
            state: Mutex::new(MockState::default()),
        });
        let monitoring = Arc::new(MockMonitoring {
            shared: shared.clone(),
        });
        let core = Arc::new(MockCore {
            shared: shared.clone(),
            monitoring,
        });
        Self { shared, core }
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<InventoryCall> {
        self.shared.state().calls.clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&InventoryCall) -> bool) -> usize {
        self.shared.state().calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn clear_calls(&self) {
        self.shared.state().calls.clear();
    }

    /// Nodes reported as down.
    pub fn set_down_nodes<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.state().down = urls.into_iter().map(Into::into).collect();
    }

    /// Nodes reported as deploying or lost.
    pub fn set_deploying_nodes(&self, nodes: Vec<DeployingNode>) {
        self.shared.state().deploying = nodes;
    }

    /// Make removal of `url` fail.
    pub fn refuse_removal(&self, url: impl Into<String>) {
        self.shared.state().refused_removals.insert(url.into());
    }

    /// Snapshot handed to new subscribers.
    pub fn set_initial_state(&self, state: InitialState) {
        self.shared.state().initial_state = state;
    }

    /// Make node state queries fail.
    pub fn fail_queries(&self, fail: bool) {
        self.shared.state().fail_queries = fail;
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.shared.state().fail_unsubscribe = fail;
    }

    pub fn fail_disconnect(&self, fail: bool) {
        self.shared.state().fail_disconnect = fail;
    }

    pub fn listener_count(&self) -> usize {
        self.shared.state().listeners.len()
    }

    /// Broadcast `event` to every subscriber.
    pub fn emit(&self, event: RmEvent) {
        let listeners = self.shared.state().listeners.clone();
        debug!(event = %event.event_type(), listeners = listeners.len(), "[MOCK] Emitting event");
        for listener in listeners {
            listener.dispatch(event.clone());
        }
    }
}

#[async_trait]
impl NodeInventory for MockInventory {
    fn name(&self) -> &str {
        &self.shared.node_source
    }

    fn acquire_node(&self) {
        self.shared.record(InventoryCall::AcquireNode);
    }

    fn acquire_nodes(&self, count: usize, config: NodeConfiguration) {
        self.shared.record(InventoryCall::AcquireNodes { count, config });
    }

    fn acquire_all_nodes(&self) {
        info!(node_source = %self.shared.node_source, "[MOCK] Deploying all nodes");
        self.shared.record(InventoryCall::AcquireAllNodes);
    }

    async fn down_nodes(&self) -> Result<Vec<String>, InventoryError> {
        let state = self.shared.state();
        if state.fail_queries {
            return Err(InventoryError::Unreachable(self.shared.node_source.clone()));
        }
        Ok(state.down.clone())
    }

    async fn deploying_and_lost_nodes(&self) -> Result<Vec<DeployingNode>, InventoryError> {
        let state = self.shared.state();
        if state.fail_queries {
            return Err(InventoryError::Unreachable(self.shared.node_source.clone()));
        }
        Ok(state.deploying.clone())
    }

    async fn finish_shutdown(&self, initiator: &Caller) -> Result<(), InventoryError> {
        self.shared.record(InventoryCall::FinishShutdown {
            initiator: initiator.name.clone(),
        });
        Ok(())
    }

    fn core(&self) -> Arc<dyn ResourceCore> {
        self.core.clone()
    }
}

/// Mock resource manager core.
pub struct MockCore {
    shared: Arc<Shared>,
    monitoring: Arc<MockMonitoring>,
}

#[async_trait]
impl ResourceCore for MockCore {
    fn remove_node(&self, node_url: &str, preemptive: bool) -> RemovalTicket {
        self.shared.record(InventoryCall::RemoveNode {
            url: node_url.to_string(),
            preemptive,
        });

        let mut state = self.shared.state();
        if state.refused_removals.contains(node_url) {
            return RemovalTicket::resolved(false);
        }
        state.down.retain(|url| url != node_url);
        state.deploying.retain(|node| node.url != node_url);
        RemovalTicket::resolved(true)
    }

    fn remove_nodes(&self, count: usize, node_source: &str, preemptive: bool) {
        self.shared.record(InventoryCall::RemoveNodes {
            count,
            node_source: node_source.to_string(),
            preemptive,
        });
    }

    fn remove_all_nodes(&self, node_source: &str, preemptive: bool) {
        info!(node_source = %node_source, preemptive, "[MOCK] Removing all nodes");
        self.shared.record(InventoryCall::RemoveAllNodes {
            node_source: node_source.to_string(),
            preemptive,
        });
    }

    async fn disconnect(&self, identity: &str) -> Result<(), InventoryError> {
        self.shared.record(InventoryCall::Disconnect {
            identity: identity.to_string(),
        });
        if self.shared.state().fail_disconnect {
            return Err(InventoryError::Unreachable("core is shutting down".to_string()));
        }
        Ok(())
    }

    fn monitoring(&self) -> Arc<dyn MonitoringEndpoint> {
        self.monitoring.clone()
    }
}

/// Mock event subscription endpoint.
pub struct MockMonitoring {
    shared: Arc<Shared>,
}

#[async_trait]
impl MonitoringEndpoint for MockMonitoring {
    async fn subscribe(&self, listener: Arc<dyn RmEventListener>) -> Result<InitialState, InventoryError> {
        self.shared.record(InventoryCall::Subscribe {
            listener_id: listener.listener_id().to_string(),
        });

        let mut state = self.shared.state();
        state.listeners.push(listener);
        Ok(state.initial_state.clone())
    }

    async fn unsubscribe(&self, listener_id: &str) -> Result<(), InventoryError> {
        self.shared.record(InventoryCall::Unsubscribe {
            listener_id: listener_id.to_string(),
        });

        let mut state = self.shared.state();
        if state.fail_unsubscribe {
            return Err(InventoryError::Rejected(format!("unknown listener {listener_id}")));
        }
        state.listeners.retain(|listener| listener.listener_id() != listener_id);
        Ok(())
    }
}
