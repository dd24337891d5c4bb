//! Policy creation.
//!
//! A policy can only be created if its name is on the allow-list and a
//! constructor for it is registered. Created policies are promoted to actors
//! and configured before they are handed out.

mod allow_list;
mod registry;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

pub use allow_list::{parse_allow_list, resolve_path, run_refresh_loop, AllowList, AllowListRefresh};
pub use registry::{PolicyConstructor, PolicyRegistry};

use crate::actors::Promoter;
use crate::error::PolicyError;
use crate::policy::{PolicyHandle, PolicyParam};

/// Default policy mailbox capacity.
pub const DEFAULT_MAILBOX_SIZE: usize = 256;

/// A policy that can be created right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDescriptor {
    pub name: String,
    pub description: String,
}

/// Creates policies and owns their actors.
pub struct PolicyFactory {
    registry: PolicyRegistry,
    allow_list: Arc<AllowList>,
    promoter: Promoter,
    mailbox_size: usize,
}

impl PolicyFactory {
    pub fn new(registry: PolicyRegistry, allow_list: Arc<AllowList>) -> Self {
        Self {
            registry,
            allow_list,
            promoter: Promoter::new(),
            mailbox_size: DEFAULT_MAILBOX_SIZE,
        }
    }

    pub fn with_mailbox_size(mut self, mailbox_size: usize) -> Self {
        self.mailbox_size = mailbox_size.max(1);
        self
    }

    pub fn allow_list(&self) -> &Arc<AllowList> {
        &self.allow_list
    }

    /// Create, promote and configure a policy.
    ///
    /// A policy whose configuration fails is terminated before returning.
    pub async fn create(
        &mut self,
        policy_name: &str,
        infrastructure_type: &str,
        params: Vec<PolicyParam>,
    ) -> Result<PolicyHandle, PolicyError> {
        if !self.allow_list.contains(policy_name).await {
            return Err(PolicyError::NotSupported(policy_name.to_string()));
        }

        let policy = self.registry.instantiate(policy_name)?;
        let handle = PolicyHandle::promote(&mut self.promoter, policy, self.mailbox_size);

        if let Err(e) = handle.configure(params).await {
            warn!(
                policy = %policy_name,
                infrastructure = %infrastructure_type,
                error = %e,
                "Policy configuration failed, terminating it"
            );
            self.promoter.terminate(handle.actor_id());
            return Err(match e {
                e if e.is_configuration() => e,
                e => PolicyError::config(format!("cannot configure policy {policy_name}: {e}")),
            });
        }

        info!(
            policy = %policy_name,
            infrastructure = %infrastructure_type,
            actor_id = %handle.actor_id(),
            "Policy created"
        );
        Ok(handle)
    }

    /// Allow-listed policies that are built in. Other names are skipped.
    pub async fn list_supported_policies(&self) -> Vec<PolicyDescriptor> {
        let mut supported = Vec::new();
        for name in self.allow_list.names().await {
            match self.registry.instantiate(&name) {
                Ok(policy) => supported.push(PolicyDescriptor {
                    description: policy.description().to_string(),
                    name,
                }),
                Err(e) => warn!(policy = %name, error = %e, "Allow-listed policy is not available"),
            }
        }
        supported
    }

    /// Re-read the allow-list file.
    pub async fn reload_allow_list(&self) -> Result<usize, PolicyError> {
        self.allow_list.reload().await
    }

    /// Number of live policy actors.
    pub fn running_policies(&mut self) -> usize {
        let pruned = self.promoter.prune();
        if pruned > 0 {
            debug!(pruned, "Forgot stopped policy actors");
        }
        self.promoter.running_count()
    }

    /// Stop every policy actor.
    ///
    /// Policies that were not shut down yet run their shutdown steps on the
    /// way out, with `SYSTEM_INITIATOR` as initiator.
    pub async fn shutdown(&mut self) {
        self.promoter.stop_all().await;
    }
}
