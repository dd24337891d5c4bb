//! State and primitives shared by every policy.

use std::sync::Arc;

use nsp_access::{AccessControlSpec, Caller};
use tracing::{debug, info, warn};

use super::params::{PolicyParam, ACCESS_PARAM_COUNT};
use super::schedule::Scheduler;
use super::{LifecycleState, PolicyMessage};
use crate::actors::ActorHandle;
use crate::error::PolicyError;
use crate::inventory::{NodeConfiguration, NodeInventory, RemovalTicket};

/// Common policy state: access specs, node inventory, own mailbox, timers.
pub struct PolicyCore {
    name: &'static str,
    state: LifecycleState,
    user_access: Option<AccessControlSpec>,
    provider_access: Option<AccessControlSpec>,
    inventory: Option<Arc<dyn NodeInventory>>,
    mailbox: Option<ActorHandle<PolicyMessage>>,
    nodes_being_handled: usize,
    scheduler: Scheduler,
}

impl PolicyCore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: LifecycleState::Unconfigured,
            user_access: None,
            provider_access: None,
            inventory: None,
            mailbox: None,
            nodes_being_handled: 0,
            scheduler: Scheduler::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: LifecycleState) {
        if self.state != state {
            debug!(policy = %self.name, from = %self.state, to = %state, "Policy state change");
            self.state = state;
        }
    }

    /// Parse the two leading access specs without applying them.
    pub fn parse_access(
        params: &[PolicyParam],
    ) -> Result<(AccessControlSpec, AccessControlSpec), PolicyError> {
        if params.len() < ACCESS_PARAM_COUNT {
            return Err(PolicyError::config(format!(
                "expected at least {ACCESS_PARAM_COUNT} parameters (user and provider access), got {}",
                params.len()
            )));
        }

        let user = AccessControlSpec::parse(&params[0].to_text())
            .map_err(|source| PolicyError::Access { field: "user", source })?;
        let provider = AccessControlSpec::parse(&params[1].to_text())
            .map_err(|source| PolicyError::Access { field: "provider", source })?;

        Ok((user, provider))
    }

    pub(crate) fn set_access(&mut self, user: AccessControlSpec, provider: AccessControlSpec) {
        self.user_access = Some(user);
        self.provider_access = Some(provider);
    }

    /// Who may use the nodes.
    pub fn user_access(&self) -> Option<&AccessControlSpec> {
        self.user_access.as_ref()
    }

    /// Who may add nodes.
    pub fn provider_access(&self) -> Option<&AccessControlSpec> {
        self.provider_access.as_ref()
    }

    pub(crate) fn set_inventory(&mut self, inventory: Arc<dyn NodeInventory>) {
        info!(policy = %self.name, node_source = %inventory.name(), "Policy attached to node source");
        self.inventory = Some(inventory);
    }

    /// The node inventory; only set once the policy was attached.
    pub fn inventory(&self) -> Result<&Arc<dyn NodeInventory>, PolicyError> {
        self.inventory
            .as_ref()
            .ok_or_else(|| PolicyError::config(format!("policy {} is not attached to a node source", self.name)))
    }

    pub fn has_inventory(&self) -> bool {
        self.inventory.is_some()
    }

    pub(crate) fn bind_mailbox(&mut self, mailbox: ActorHandle<PolicyMessage>) {
        self.mailbox = Some(mailbox);
    }

    /// The policy's own mailbox, available once promoted.
    pub fn mailbox(&self) -> Result<&ActorHandle<PolicyMessage>, PolicyError> {
        self.mailbox.as_ref().ok_or(PolicyError::InvalidState {
            operation: "schedule work for",
            state: self.state,
        })
    }

    /// Identity the policy presents to the resource manager.
    pub fn identity(&self) -> &str {
        match &self.mailbox {
            Some(mailbox) => mailbox.actor_id(),
            None => self.name,
        }
    }

    /// Nodes requested (or released) by the last acquire or remove call.
    pub fn nodes_being_handled(&self) -> usize {
        self.nodes_being_handled
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Request `count` nodes, one request per node.
    pub fn acquire_nodes(&mut self, count: i64) -> Result<(), PolicyError> {
        let count = node_count(count)?;
        let inventory = self.inventory()?.clone();

        info!(policy = %self.name, node_source = %inventory.name(), count, "Acquiring nodes");
        self.nodes_being_handled = count;
        for _ in 0..count {
            inventory.acquire_node();
        }
        Ok(())
    }

    /// Request `count` nodes in one batch with extra deployment settings.
    pub fn acquire_nodes_with(&mut self, count: i64, config: NodeConfiguration) -> Result<(), PolicyError> {
        let count = node_count(count)?;
        let inventory = self.inventory()?.clone();

        self.nodes_being_handled = count;
        if count == 0 {
            debug!(policy = %self.name, "Nothing to acquire");
            return Ok(());
        }

        info!(policy = %self.name, node_source = %inventory.name(), count, "Acquiring nodes in batch");
        inventory.acquire_nodes(count, config);
        Ok(())
    }

    /// Request every node the infrastructure can provide.
    pub fn acquire_all_nodes(&mut self) -> Result<(), PolicyError> {
        let inventory = self.inventory()?;
        info!(policy = %self.name, node_source = %inventory.name(), "Acquiring all nodes");
        inventory.acquire_all_nodes();
        Ok(())
    }

    /// Release `count` nodes of the node source.
    pub fn remove_nodes(&mut self, count: usize, preemptive: bool) -> Result<(), PolicyError> {
        let inventory = self.inventory()?.clone();

        info!(policy = %self.name, node_source = %inventory.name(), count, preemptive, "Removing nodes");
        self.nodes_being_handled = count;
        inventory.core().remove_nodes(count, inventory.name(), preemptive);
        Ok(())
    }

    /// Release one node.
    pub fn remove_node(&self, node_url: &str, preemptive: bool) -> Result<RemovalTicket, PolicyError> {
        let inventory = self.inventory()?;
        info!(policy = %self.name, node_url = %node_url, preemptive, "Removing node");
        Ok(inventory.core().remove_node(node_url, preemptive))
    }

    /// Release every node of the node source.
    pub fn remove_all_nodes(&self, preemptive: bool) -> Result<(), PolicyError> {
        let inventory = self.inventory()?;
        info!(policy = %self.name, node_source = %inventory.name(), preemptive, "Removing all nodes");
        inventory.core().remove_all_nodes(inventory.name(), preemptive);
        Ok(())
    }

    /// Base shutdown: stop timers, report completion, drop the policy identity.
    ///
    /// Collaborator failures are logged and do not abort the shutdown.
    pub async fn shutdown(&mut self, initiator: &Caller) {
        let cancelled = self.scheduler.cancel();
        debug!(policy = %self.name, cancelled, "Policy timers stopped");

        let Some(inventory) = self.inventory.clone() else {
            debug!(policy = %self.name, "Policy was never attached, nothing to notify");
            return;
        };

        if let Err(e) = inventory.finish_shutdown(initiator).await {
            warn!(policy = %self.name, node_source = %inventory.name(), error = %e, "Failed to report policy shutdown");
        }

        let identity = self.identity().to_string();
        if let Err(e) = inventory.core().disconnect(&identity).await {
            warn!(policy = %self.name, identity = %identity, error = %e, "Failed to disconnect policy");
        }

        info!(policy = %self.name, node_source = %inventory.name(), initiator = %initiator, "Policy shut down");
    }
}

fn node_count(count: i64) -> Result<usize, PolicyError> {
    usize::try_from(count)
        .map_err(|_| PolicyError::config(format!("cannot acquire a negative number of nodes ({count})")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{InventoryCall, MockInventory};

    fn attached() -> (PolicyCore, MockInventory) {
        let inventory = MockInventory::new("ns");
        let mut core = PolicyCore::new("TestPolicy");
        core.set_inventory(Arc::new(inventory.clone()));
        (core, inventory)
    }

    #[test]
    fn test_acquire_nodes_one_request_per_node() {
        let (mut core, inventory) = attached();

        assert!(core.acquire_nodes(-1).unwrap_err().is_configuration());
        core.acquire_nodes(0).unwrap();
        assert!(inventory.calls().is_empty());

        core.acquire_nodes(3).unwrap();
        assert_eq!(inventory.calls(), vec![InventoryCall::AcquireNode; 3]);
        assert_eq!(core.nodes_being_handled(), 3);
    }

    #[test]
    fn test_acquire_nodes_with_config_is_batched() {
        let (mut core, inventory) = attached();
        let mut config = NodeConfiguration::new();
        config.insert("tag".to_string(), serde_json::json!("gpu"));

        core.acquire_nodes_with(3, config.clone()).unwrap();
        core.acquire_nodes_with(0, NodeConfiguration::new()).unwrap();
        assert!(core.acquire_nodes_with(-2, NodeConfiguration::new()).is_err());

        assert_eq!(inventory.calls(), vec![InventoryCall::AcquireNodes { count: 3, config }]);
    }

    #[test]
    fn test_remove_nodes_records_handled_count() {
        let (mut core, inventory) = attached();
        core.remove_nodes(4, true).unwrap();

        assert_eq!(core.nodes_being_handled(), 4);
        assert_eq!(
            inventory.calls(),
            vec![InventoryCall::RemoveNodes {
                count: 4,
                node_source: "ns".to_string(),
                preemptive: true
            }]
        );
    }

    #[test]
    fn test_primitives_need_inventory() {
        let mut core = PolicyCore::new("TestPolicy");
        assert!(core.acquire_all_nodes().unwrap_err().is_configuration());
        assert!(core.acquire_nodes(1).unwrap_err().is_configuration());
        assert!(core.remove_all_nodes(false).unwrap_err().is_configuration());
    }

    #[test]
    fn test_parse_access() {
        let (user, provider) =
            PolicyCore::parse_access(&["ALL".into(), "users=alice;groups=ops".into()]).unwrap();
        assert_eq!(user, AccessControlSpec::ALL);
        assert_eq!(provider.users().len(), 1);

        let err = PolicyCore::parse_access(&["ME".into(), "users=".into()]).unwrap_err();
        assert!(matches!(err, PolicyError::Access { field: "provider", .. }));

        let err = PolicyCore::parse_access(&["ME".into()]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_shutdown_survives_collaborator_failures() {
        let (mut core, inventory) = attached();
        inventory.fail_disconnect(true);

        core.shutdown(&Caller::new("admin")).await;

        assert_eq!(
            inventory.calls(),
            vec![
                InventoryCall::FinishShutdown {
                    initiator: "admin".to_string()
                },
                InventoryCall::Disconnect {
                    identity: "TestPolicy".to_string()
                },
            ]
        );
    }
}
