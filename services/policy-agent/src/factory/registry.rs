//! Compile-time policy registry.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::PolicyError;
use crate::policies::{cron_schedule, restart_down, static_nodes, time_slot};
use crate::policy::NodeSourcePolicy;

/// Builds a fresh, unconfigured policy.
pub type PolicyConstructor = fn() -> Box<dyn NodeSourcePolicy>;

/// Name to constructor map.
#[derive(Default)]
pub struct PolicyRegistry {
    constructors: BTreeMap<&'static str, PolicyConstructor>,
}

impl PolicyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in policy.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        static_nodes::register(&mut registry);
        cron_schedule::register(&mut registry);
        time_slot::register(&mut registry);
        restart_down::register(&mut registry);
        registry
    }

    /// Register `constructor` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: &'static str, constructor: PolicyConstructor) {
        if self.constructors.insert(name, constructor).is_some() {
            warn!(policy = %name, "Policy registered twice, keeping the last constructor");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    /// Build a new instance of `name`.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn NodeSourcePolicy>, PolicyError> {
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| PolicyError::Instantiation {
                name: name.to_string(),
                reason: "no such policy is built in".to_string(),
            })
    }
}
