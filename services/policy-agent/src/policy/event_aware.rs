//! Resource manager event subscription for policies that react to events.
//!
//! Events are forwarded into the policy mailbox, so they are handled in
//! order with every other policy message.

use std::sync::Arc;

use nsp_events::{CoreEvent, InitialState, NodeEvent, NodeSourceEvent, RmEvent};
use tracing::{debug, info, warn};

use super::{PolicyCore, PolicyMessage};
use crate::actors::{ActorError, ActorHandle};
use crate::error::PolicyError;
use crate::inventory::RmEventListener;

/// Listener that posts every event to a policy mailbox.
#[derive(Debug)]
pub struct MailboxListener {
    listener_id: String,
    mailbox: ActorHandle<PolicyMessage>,
}

impl MailboxListener {
    pub fn new(listener_id: impl Into<String>, mailbox: ActorHandle<PolicyMessage>) -> Self {
        Self {
            listener_id: listener_id.into(),
            mailbox,
        }
    }

    /// Post `event` without blocking the resource manager.
    ///
    /// Events are dropped when the mailbox is full, except resource manager
    /// shutdown events, which wait for room on a separate task.
    fn forward(&self, event: RmEvent) {
        let is_shutdown = matches!(&event, RmEvent::Core(core) if core.event_type.is_shutdown());
        let retained = is_shutdown.then(|| event.clone());

        match (self.mailbox.try_send(PolicyMessage::Event(event)), retained) {
            (Ok(()), _) => {}
            (Err(ActorError::MailboxFull), Some(event)) => self.deliver_later(event),
            (Err(e), _) => {
                debug!(listener_id = %self.listener_id, error = %e, "Dropping resource manager event");
            }
        }
    }

    fn deliver_later(&self, event: RmEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(listener_id = %self.listener_id, "No runtime to deliver shutdown event, dropping it");
            return;
        };

        debug!(listener_id = %self.listener_id, "Mailbox full, queueing shutdown event");
        let mailbox = self.mailbox.clone();
        let listener_id = self.listener_id.clone();
        runtime.spawn(async move {
            if mailbox.send(PolicyMessage::Event(event)).await.is_err() {
                debug!(listener_id = %listener_id, "Policy stopped before shutdown event was delivered");
            }
        });
    }
}

impl RmEventListener for MailboxListener {
    fn listener_id(&self) -> &str {
        &self.listener_id
    }

    fn core_event(&self, event: CoreEvent) {
        self.forward(RmEvent::Core(event));
    }

    fn node_source_event(&self, event: NodeSourceEvent) {
        self.forward(RmEvent::NodeSource(event));
    }

    fn node_event(&self, event: NodeEvent) {
        self.forward(RmEvent::Node(event));
    }

    fn dispatch(&self, event: RmEvent) {
        self.forward(event);
    }
}

/// Subscription state of an event-aware policy.
#[derive(Debug, Default)]
pub struct EventSubscription {
    listener_id: Option<String>,
    rm_shutting_down: bool,
    initial_state: Option<InitialState>,
}

impl EventSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe the policy mailbox to resource manager events.
    pub async fn subscribe(&mut self, core: &PolicyCore) -> Result<&InitialState, PolicyError> {
        let monitoring = core.inventory()?.core().monitoring();
        let listener_id = format!("{}-events", core.identity());
        let listener = Arc::new(MailboxListener::new(listener_id.clone(), core.mailbox()?.clone()));

        let state = monitoring.subscribe(listener).await?;
        info!(
            policy = %core.name(),
            listener_id = %listener_id,
            nodes = state.nodes.len(),
            "Subscribed to resource manager events"
        );

        self.listener_id = Some(listener_id);
        self.rm_shutting_down = false;
        Ok(self.initial_state.insert(state))
    }

    /// Track resource manager shutdown from an incoming event.
    pub fn observe(&mut self, event: &RmEvent) {
        if let RmEvent::Core(core) = event {
            if core.event_type.is_shutdown() && !self.rm_shutting_down {
                info!(event = %core.event_type, "Resource manager is shutting down");
                self.rm_shutting_down = true;
            }
        }
    }

    /// True once the resource manager announced its shutdown.
    pub fn rm_shutting_down(&self) -> bool {
        self.rm_shutting_down
    }

    pub fn is_subscribed(&self) -> bool {
        self.listener_id.is_some()
    }

    /// Snapshot received when subscribing.
    pub fn initial_state(&self) -> Option<&InitialState> {
        self.initial_state.as_ref()
    }

    /// Drop the subscription. Skipped while the resource manager shuts down;
    /// failures are logged only.
    pub async fn unsubscribe(&mut self, core: &PolicyCore) {
        let Some(listener_id) = self.listener_id.take() else {
            return;
        };

        if self.rm_shutting_down {
            debug!(listener_id = %listener_id, "Resource manager shutting down, not unsubscribing");
            return;
        }

        let monitoring = match core.inventory() {
            Ok(inventory) => inventory.core().monitoring(),
            Err(e) => {
                warn!(listener_id = %listener_id, error = %e, "Cannot reach monitoring to unsubscribe");
                return;
            }
        };

        match monitoring.unsubscribe(&listener_id).await {
            Ok(()) => debug!(listener_id = %listener_id, "Unsubscribed from resource manager events"),
            Err(e) => warn!(listener_id = %listener_id, error = %e, "Failed to unsubscribe from resource manager events"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsp_events::RmEventType;
    use tokio::sync::mpsc;

    fn full_listener() -> (MailboxListener, mpsc::Receiver<PolicyMessage>) {
        let (tx, rx) = mpsc::channel(1);
        let mailbox = ActorHandle::new(tx, "policy_test");
        mailbox
            .try_send(PolicyMessage::Event(RmEvent::Core(CoreEvent::new(RmEventType::Started).unwrap())))
            .unwrap();
        (MailboxListener::new("policy_test-events", mailbox), rx)
    }

    fn event_type(msg: Option<PolicyMessage>) -> RmEventType {
        match msg {
            Some(PolicyMessage::Event(event)) => event.event_type(),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_event_waits_for_room() {
        let (listener, mut rx) = full_listener();

        listener.core_event(CoreEvent::new(RmEventType::ShuttingDown).unwrap());

        assert_eq!(event_type(rx.recv().await), RmEventType::Started);
        assert_eq!(event_type(rx.recv().await), RmEventType::ShuttingDown);
    }

    #[tokio::test]
    async fn test_other_events_are_dropped_when_full() {
        let (listener, mut rx) = full_listener();

        listener.core_event(CoreEvent::new(RmEventType::Started).unwrap());

        assert_eq!(event_type(rx.recv().await), RmEventType::Started);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
