//! Replace nodes that went down.
//!
//! Every `checkNodeStateEach` milliseconds the policy removes the node
//! source's down nodes and lost deployments, waits for the removals off the
//! mailbox, then requests as many new nodes as were actually removed.
//!
//! There is no backoff: a node that keeps failing is replaced at every check.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::join_all;
use nsp_access::Caller;
use nsp_events::{RmEvent, RmEventType};
use tracing::{debug, info, warn};

use crate::error::PolicyError;
use crate::factory::PolicyRegistry;
use crate::inventory::{NodeConfiguration, RemovalTicket};
use crate::policy::event_aware::EventSubscription;
use crate::policy::{NodeSourcePolicy, ParamReader, PolicyCore, PolicyParam, TickKind, ACCESS_PARAM_COUNT};

/// Registry name.
pub const NAME: &str = "RestartDownNodesPolicy";

/// Keeps the node source at full strength by redeploying failed nodes.
pub struct RestartDownNodesPolicy {
    core: PolicyCore,
    events: EventSubscription,
    check_every: Option<Duration>,
}

impl RestartDownNodesPolicy {
    pub fn new() -> Self {
        Self {
            core: PolicyCore::new(NAME),
            events: EventSubscription::new(),
            check_every: None,
        }
    }

    fn check_every(&self) -> Result<Duration, PolicyError> {
        self.check_every
            .ok_or_else(|| PolicyError::config("restart down nodes policy is not configured"))
    }

    /// First health check, one period from now.
    fn first_check(period: Duration) -> Result<DateTime<Utc>, PolicyError> {
        TimeDelta::from_std(period)
            .ok()
            .and_then(|offset| Utc::now().checked_add_signed(offset))
            .ok_or_else(|| PolicyError::config(format!("check period too large ({} ms)", period.as_millis())))
    }

    fn start_schedule(&mut self, first: DateTime<Utc>, period: Duration) -> Result<(), PolicyError> {
        let mailbox = self.core.mailbox()?.clone();
        self.core
            .scheduler_mut()
            .repeating(&mailbox, TickKind::HealthCheck, first, period)
    }

    async fn check_nodes(&mut self) -> Result<(), PolicyError> {
        if self.events.rm_shutting_down() {
            debug!(policy = NAME, "Resource manager shutting down, skipping node check");
            return Ok(());
        }

        let inventory = self.core.inventory()?.clone();
        let down = inventory.down_nodes().await?;
        let lost: Vec<String> = inventory
            .deploying_and_lost_nodes()
            .await?
            .into_iter()
            .filter(|node| node.lost)
            .map(|node| node.url)
            .collect();

        if down.is_empty() && lost.is_empty() {
            debug!(policy = NAME, node_source = %inventory.name(), "All nodes healthy");
            return Ok(());
        }

        info!(
            policy = NAME,
            node_source = %inventory.name(),
            down = down.len(),
            lost = lost.len(),
            "Restarting failed nodes"
        );

        let tickets = down
            .iter()
            .chain(lost.iter())
            .map(|url| self.core.remove_node(url, true))
            .collect::<Result<Vec<RemovalTicket>, PolicyError>>()?;

        let mailbox = self.core.mailbox()?.clone();
        self.core.scheduler_mut().after(&mailbox, async move {
            let outcomes = join_all(tickets.into_iter().map(RemovalTicket::confirmed)).await;
            let confirmed = outcomes.into_iter().filter(|removed| *removed).count();
            TickKind::ReplaceRemoved { confirmed }
        });
        Ok(())
    }

    fn replace_removed(&mut self, confirmed: usize) -> Result<(), PolicyError> {
        if confirmed == 0 {
            warn!(policy = NAME, "No failed node could be removed");
            return Ok(());
        }

        info!(policy = NAME, confirmed, "Redeploying removed nodes");
        let count = i64::try_from(confirmed)
            .map_err(|_| PolicyError::config(format!("too many nodes to redeploy ({confirmed})")))?;
        self.core.acquire_nodes_with(count, NodeConfiguration::new())
    }
}

impl Default for RestartDownNodesPolicy {
    fn default() -> Self {
        Self::new()
    }
}

pub fn register(registry: &mut PolicyRegistry) {
    registry.register(NAME, || Box::new(RestartDownNodesPolicy::new()));
}

#[async_trait]
impl NodeSourcePolicy for RestartDownNodesPolicy {
    fn core(&self) -> &PolicyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PolicyCore {
        &mut self.core
    }

    fn description(&self) -> &'static str {
        "Acquires all nodes at activation and periodically redeploys nodes that are down or whose deployment was lost."
    }

    fn summary(&self) -> String {
        match self.check_every {
            Some(period) => format!("{NAME} [check every {} ms]", period.as_millis()),
            None => NAME.to_string(),
        }
    }

    fn configure_strategy(&mut self, params: &[PolicyParam]) -> Result<(), PolicyError> {
        let period = ParamReader::new(params).millis(0, "checkNodeStateEach")?;
        self.check_every = Some(period);
        Ok(())
    }

    async fn activate(&mut self) -> Result<(), PolicyError> {
        let period = self.check_every()?;
        let first = Self::first_check(period)?;

        self.events.subscribe(&self.core).await?;
        self.core.acquire_all_nodes()?;
        self.start_schedule(first, period)
    }

    async fn reconfigure(&mut self, params: &[PolicyParam]) -> Result<(), PolicyError> {
        let (user, provider) = PolicyCore::parse_access(params)?;
        let period = ParamReader::new(&params[ACCESS_PARAM_COUNT..]).millis(0, "checkNodeStateEach")?;
        let first = Self::first_check(period)?;

        self.core.scheduler_mut().cancel();
        self.check_every = Some(period);
        self.core.set_access(user, provider);
        self.start_schedule(first, period)
    }

    async fn on_tick(&mut self, tick: TickKind) -> Result<(), PolicyError> {
        match tick {
            TickKind::HealthCheck => self.check_nodes().await,
            TickKind::ReplaceRemoved { confirmed } => self.replace_removed(confirmed),
            other => {
                debug!(policy = NAME, tick = ?other, "Ignoring unexpected tick");
                Ok(())
            }
        }
    }

    async fn on_event(&mut self, event: RmEvent) {
        self.events.observe(&event);

        if let RmEvent::Node(node) = &event {
            if node.event_type == RmEventType::NodeStateChanged && !node.node_state.is_usable() {
                debug!(policy = NAME, node_url = %node.node_url, state = ?node.node_state, "Node became unusable");
            }
        }
    }

    async fn shutdown(&mut self, initiator: &Caller) {
        self.events.unsubscribe(&self.core).await;
        self.core.shutdown(initiator).await;
    }
}
