//! Acquire every node once, at activation.

use async_trait::async_trait;

use crate::error::PolicyError;
use crate::factory::PolicyRegistry;
use crate::policy::{NodeSourcePolicy, PolicyCore, PolicyParam};

/// Registry name.
pub const NAME: &str = "StaticPolicy";

/// Keeps every node of the infrastructure deployed until shutdown.
pub struct StaticPolicy {
    core: PolicyCore,
}

impl StaticPolicy {
    pub fn new() -> Self {
        Self {
            core: PolicyCore::new(NAME),
        }
    }
}

impl Default for StaticPolicy {
    fn default() -> Self {
        Self::new()
    }
}

pub fn register(registry: &mut PolicyRegistry) {
    registry.register(NAME, || Box::new(StaticPolicy::new()));
}

#[async_trait]
impl NodeSourcePolicy for StaticPolicy {
    fn core(&self) -> &PolicyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PolicyCore {
        &mut self.core
    }

    fn description(&self) -> &'static str {
        "Static nodes acquisition: all nodes are acquired at node source activation and kept until it is removed."
    }

    fn configure_strategy(&mut self, _params: &[PolicyParam]) -> Result<(), PolicyError> {
        Ok(())
    }

    async fn activate(&mut self) -> Result<(), PolicyError> {
        self.core.acquire_all_nodes()
    }
}
