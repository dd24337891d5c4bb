//! Policy actor and its typed handle.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use nsp_access::Caller;
use nsp_events::RmEvent;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::{LifecycleState, NodeSourcePolicy, PolicyParam, PolicyStatus, ScheduledTick};
use crate::actors::{Actor, ActorContext, ActorError, ActorHandle, Promoter};
use crate::error::PolicyError;
use crate::inventory::NodeInventory;

type Reply<T> = oneshot::Sender<Result<T, PolicyError>>;

/// Initiator reported when a policy is stopped by its owner rather than by a
/// caller.
pub const SYSTEM_INITIATOR: &str = "system";

/// Messages handled by a policy actor.
pub enum PolicyMessage {
    /// Attach the node source the policy manages.
    SetInventory {
        inventory: Arc<dyn NodeInventory>,
        reply_to: Reply<()>,
    },

    /// Apply a full parameter vector.
    Configure {
        params: Vec<PolicyParam>,
        reply_to: Reply<()>,
    },

    /// Replace the parameters of an active policy.
    Reconfigure {
        params: Vec<PolicyParam>,
        reply_to: Reply<()>,
    },

    /// Start acting on the node source.
    Activate { reply_to: Reply<()> },

    /// Shut the policy down; the actor stops afterwards.
    Shutdown {
        initiator: Caller,
        reply_to: oneshot::Sender<()>,
    },

    /// Status snapshot.
    Status { reply_to: oneshot::Sender<PolicyStatus> },

    /// A timer or background completion fired.
    Tick(ScheduledTick),

    /// A resource manager event.
    Event(RmEvent),
}

impl fmt::Debug for PolicyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyMessage::SetInventory { inventory, .. } => f
                .debug_struct("SetInventory")
                .field("node_source", &inventory.name())
                .finish(),
            PolicyMessage::Configure { params, .. } => {
                f.debug_struct("Configure").field("params", params).finish()
            }
            PolicyMessage::Reconfigure { params, .. } => {
                f.debug_struct("Reconfigure").field("params", params).finish()
            }
            PolicyMessage::Activate { .. } => f.write_str("Activate"),
            PolicyMessage::Shutdown { initiator, .. } => f
                .debug_struct("Shutdown")
                .field("initiator", initiator)
                .finish(),
            PolicyMessage::Status { .. } => f.write_str("Status"),
            PolicyMessage::Tick(tick) => f.debug_tuple("Tick").field(tick).finish(),
            PolicyMessage::Event(event) => f.debug_tuple("Event").field(event).finish(),
        }
    }
}

/// Runs one policy, enforcing its lifecycle.
pub struct PolicyActor {
    policy: Box<dyn NodeSourcePolicy>,
}

impl PolicyActor {
    pub fn new(policy: Box<dyn NodeSourcePolicy>) -> Self {
        Self { policy }
    }

    fn state(&self) -> LifecycleState {
        self.policy.core().state()
    }

    fn require(&self, operation: &'static str, allowed: &[LifecycleState]) -> Result<(), PolicyError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(PolicyError::InvalidState { operation, state })
        }
    }

    fn set_inventory(&mut self, inventory: Arc<dyn NodeInventory>) -> Result<(), PolicyError> {
        self.require(
            "attach a node source to",
            &[LifecycleState::Unconfigured, LifecycleState::Configured],
        )?;
        self.policy.core_mut().set_inventory(inventory);
        Ok(())
    }

    fn configure(&mut self, params: &[PolicyParam]) -> Result<(), PolicyError> {
        self.require("configure", &[LifecycleState::Unconfigured, LifecycleState::Configured])?;
        self.policy.configure(params)?;
        self.policy.core_mut().set_state(LifecycleState::Configured);
        info!(policy = %self.policy.core().name(), summary = %self.policy.summary(), "Policy configured");
        Ok(())
    }

    async fn activate(&mut self) -> Result<(), PolicyError> {
        self.require("activate", &[LifecycleState::Configured])?;
        self.policy.core().inventory()?;

        if let Err(e) = self.policy.activate().await {
            self.policy.core_mut().scheduler_mut().cancel();
            return Err(e);
        }

        self.policy.core_mut().set_state(LifecycleState::Active);
        info!(policy = %self.policy.core().name(), summary = %self.policy.summary(), "Policy activated");
        Ok(())
    }

    async fn reconfigure(&mut self, params: &[PolicyParam]) -> Result<(), PolicyError> {
        self.require("reconfigure", &[LifecycleState::Active])?;
        self.policy.reconfigure(params).await?;
        info!(policy = %self.policy.core().name(), summary = %self.policy.summary(), "Policy reconfigured");
        Ok(())
    }

    async fn shutdown(&mut self, initiator: &Caller) {
        self.policy.core_mut().set_state(LifecycleState::ShuttingDown);
        self.policy.core_mut().scheduler_mut().cancel();
        self.policy.shutdown(initiator).await;
        self.policy.core_mut().set_state(LifecycleState::Terminated);
    }

    async fn tick(&mut self, tick: ScheduledTick) {
        let name = self.policy.core().name();

        if self.state() != LifecycleState::Active {
            debug!(policy = %name, ?tick, state = %self.state(), "Dropping tick for inactive policy");
            return;
        }
        if !self.policy.core().scheduler().is_current(&tick) {
            debug!(policy = %name, ?tick, "Dropping stale tick");
            return;
        }

        if let Err(e) = self.policy.on_tick(tick.kind).await {
            error!(policy = %name, tick = ?tick.kind, error = %e, "Scheduled policy action failed");
        }
    }
}

#[async_trait]
impl Actor for PolicyActor {
    type Message = PolicyMessage;

    fn name(&self) -> &str {
        self.policy.core().name()
    }

    fn bind_self(&mut self, handle: ActorHandle<PolicyMessage>) {
        self.policy.core_mut().bind_mailbox(handle);
    }

    async fn handle(&mut self, msg: PolicyMessage, _ctx: &mut ActorContext) -> Result<bool, ActorError> {
        match msg {
            PolicyMessage::SetInventory { inventory, reply_to } => {
                let _ = reply_to.send(self.set_inventory(inventory));
            }
            PolicyMessage::Configure { params, reply_to } => {
                let _ = reply_to.send(self.configure(&params));
            }
            PolicyMessage::Reconfigure { params, reply_to } => {
                let result = self.reconfigure(&params).await;
                let _ = reply_to.send(result);
            }
            PolicyMessage::Activate { reply_to } => {
                let result = self.activate().await;
                let _ = reply_to.send(result);
            }
            PolicyMessage::Shutdown { initiator, reply_to } => {
                self.shutdown(&initiator).await;
                let _ = reply_to.send(());
                return Ok(false);
            }
            PolicyMessage::Status { reply_to } => {
                let _ = reply_to.send(self.policy.status());
            }
            PolicyMessage::Tick(tick) => self.tick(tick).await,
            PolicyMessage::Event(event) => self.policy.on_event(event).await,
        }
        Ok(true)
    }

    async fn on_stop(&mut self, ctx: &mut ActorContext) {
        if self.state() == LifecycleState::Terminated {
            return;
        }

        let reason = if ctx.is_shutdown() { "terminated" } else { "mailbox closed" };
        warn!(
            actor_id = %ctx.actor_id,
            state = %self.state(),
            reason,
            "Policy stopped without shutdown, shutting it down"
        );
        self.shutdown(&Caller::new(SYSTEM_INITIATOR)).await;
    }
}

/// Typed handle to a promoted policy.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    name: String,
    handle: ActorHandle<PolicyMessage>,
}

impl PolicyHandle {
    /// Promote `policy` into an actor.
    pub fn promote(promoter: &mut Promoter, policy: Box<dyn NodeSourcePolicy>, mailbox_size: usize) -> Self {
        let name = policy.core().name().to_string();
        let handle = promoter.promote(PolicyActor::new(policy), mailbox_size);
        Self { name, handle }
    }

    /// Policy name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Actor id; also the identity the policy uses with the resource manager.
    pub fn actor_id(&self) -> &str {
        self.handle.actor_id()
    }

    /// True once the policy actor stopped.
    pub fn is_terminated(&self) -> bool {
        self.handle.is_closed()
    }

    /// Raw mailbox handle.
    pub fn mailbox(&self) -> &ActorHandle<PolicyMessage> {
        &self.handle
    }

    pub async fn set_inventory(&self, inventory: Arc<dyn NodeInventory>) -> Result<(), PolicyError> {
        self.request(|reply_to| PolicyMessage::SetInventory { inventory, reply_to })
            .await?
    }

    pub async fn configure(&self, params: Vec<PolicyParam>) -> Result<(), PolicyError> {
        self.request(|reply_to| PolicyMessage::Configure { params, reply_to })
            .await?
    }

    pub async fn reconfigure(&self, params: Vec<PolicyParam>) -> Result<(), PolicyError> {
        self.request(|reply_to| PolicyMessage::Reconfigure { params, reply_to })
            .await?
    }

    pub async fn activate(&self) -> Result<(), PolicyError> {
        self.request(|reply_to| PolicyMessage::Activate { reply_to }).await?
    }

    /// Shut the policy down. Calling it on a stopped policy is a no-op.
    pub async fn shutdown(&self, initiator: Caller) -> Result<(), PolicyError> {
        match self
            .request(|reply_to| PolicyMessage::Shutdown { initiator, reply_to })
            .await
        {
            Err(PolicyError::Actor(ActorError::ActorStopped)) => {
                debug!(actor_id = %self.actor_id(), "Policy already stopped");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn status(&self) -> Result<PolicyStatus, PolicyError> {
        self.request(|reply_to| PolicyMessage::Status { reply_to }).await
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> PolicyMessage,
    ) -> Result<T, PolicyError> {
        let (tx, rx) = oneshot::channel();
        self.handle.send(message(tx)).await?;
        rx.await.map_err(|_| PolicyError::Actor(ActorError::ActorStopped))
    }
}
