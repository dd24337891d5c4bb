//! Node source policies.
//!
//! A policy decides when a node source acquires and releases nodes. Every
//! policy is a `NodeSourcePolicy` strategy over a shared `PolicyCore`,
//! promoted into a `PolicyActor` and driven through a `PolicyHandle`.
//!
//! ## Lifecycle
//!
//! ```text
//! Unconfigured --configure--> Configured --activate--> Active
//!        \                         \                     |
//!         +--------shutdown---------+------shutdown------+--> ShuttingDown --> Terminated
//! ```
//!
//! `reconfigure` is only valid while Active and keeps the policy Active.

mod actor;
mod base;
pub mod event_aware;
pub mod params;
pub mod schedule;

use std::fmt;

use async_trait::async_trait;
use nsp_access::Caller;
use nsp_events::RmEvent;
use serde::Serialize;

pub use actor::{PolicyActor, PolicyHandle, PolicyMessage, SYSTEM_INITIATOR};
pub use base::PolicyCore;
pub use params::{ParamReader, PolicyParam, ACCESS_PARAM_COUNT, MAX_PERIOD_MILLIS};
pub use schedule::{CronExpression, ScheduledTick, Scheduler, TickKind, TriggerInfo};

use crate::error::PolicyError;

/// Policy lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Active,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Configured => "configured",
            LifecycleState::Active => "active",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Snapshot of a running policy.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyStatus {
    pub name: String,
    pub actor_id: String,
    pub state: LifecycleState,
    pub user_access: Option<String>,
    pub provider_access: Option<String>,
    pub nodes_being_handled: usize,
    pub summary: String,
    pub triggers: Vec<TriggerInfo>,
}

/// A node acquisition strategy.
///
/// Implementations own a `PolicyCore` and add their own parameters and
/// timers on top. All methods run inside the policy actor, one at a time.
#[async_trait]
pub trait NodeSourcePolicy: Send + 'static {
    fn core(&self) -> &PolicyCore;

    fn core_mut(&mut self) -> &mut PolicyCore;

    /// Human readable description of what the policy does.
    fn description(&self) -> &'static str;

    /// One-line summary of the current settings.
    fn summary(&self) -> String {
        self.core().name().to_string()
    }

    /// Validate and apply strategy parameters (the vector from index 2).
    ///
    /// Must not change any state unless every parameter is valid.
    fn configure_strategy(&mut self, params: &[PolicyParam]) -> Result<(), PolicyError>;

    /// Apply a full parameter vector: access specs first, then the strategy.
    fn configure(&mut self, params: &[PolicyParam]) -> Result<(), PolicyError> {
        let (user, provider) = PolicyCore::parse_access(params)?;
        self.configure_strategy(&params[ACCESS_PARAM_COUNT..])?;
        self.core_mut().set_access(user, provider);
        Ok(())
    }

    /// Start acting on the node source.
    async fn activate(&mut self) -> Result<(), PolicyError>;

    /// Replace the parameters of an active policy.
    ///
    /// On error the previous settings and timers stay in place.
    async fn reconfigure(&mut self, params: &[PolicyParam]) -> Result<(), PolicyError> {
        self.configure(params)
    }

    /// React to a timer firing.
    async fn on_tick(&mut self, _tick: TickKind) -> Result<(), PolicyError> {
        Ok(())
    }

    /// React to a resource manager event.
    async fn on_event(&mut self, _event: RmEvent) {}

    /// Release resources. Timers are already stopped when this runs.
    async fn shutdown(&mut self, initiator: &Caller) {
        self.core_mut().shutdown(initiator).await;
    }

    /// Status snapshot.
    fn status(&self) -> PolicyStatus {
        let core = self.core();
        PolicyStatus {
            name: core.name().to_string(),
            actor_id: core.identity().to_string(),
            state: core.state(),
            user_access: core.user_access().map(|spec| spec.to_string()),
            provider_access: core.provider_access().map(|spec| spec.to_string()),
            nodes_being_handled: core.nodes_being_handled(),
            summary: self.summary(),
            triggers: core.scheduler().triggers().to_vec(),
        }
    }
}
