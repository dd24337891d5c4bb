//! Core actor framework types and traits.
//!
//! Provides the building blocks used to promote plain policy objects into
//! independently scheduled actors:
//! - `Actor` trait for defining actor behavior
//! - `Promoter` for spawning and terminating actors
//! - `ActorHandle` for sending messages to actors

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

// =============================================================================
// Core Traits
// =============================================================================

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// The Actor trait defines behavior for an actor.
///
/// Actors:
/// - Process messages one at a time (no internal concurrency)
/// - Own mutable state not shared with other actors
/// - Communicate only via message passing
#[async_trait]
pub trait Actor: Send + 'static {
    /// The message type this actor handles.
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Receive the actor's own handle before the actor loop starts.
    ///
    /// Background tasks owned by the actor use it to re-enter the mailbox
    /// instead of touching actor state directly.
    fn bind_self(&mut self, _handle: ActorHandle<Self::Message>) {}

    /// Handle a single message.
    ///
    /// Returns `Ok(true)` to continue, `Ok(false)` to stop, or `Err` on failure.
    async fn handle(&mut self, msg: Self::Message, ctx: &mut ActorContext) -> Result<bool, ActorError>;

    /// Called when the actor starts.
    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called when the actor is about to stop.
    async fn on_stop(&mut self, _ctx: &mut ActorContext) {
        // Default: no cleanup
    }

    /// Called after a handler returned an error.
    fn on_crash(&mut self, _error: &ActorError) {
        // Default: keep current state
    }
}

/// Context provided to actors during message handling.
pub struct ActorContext {
    /// Actor's unique ID.
    pub actor_id: String,

    /// Shutdown signal receiver.
    pub shutdown: watch::Receiver<bool>,

    /// Message counter.
    pub messages_processed: u64,

    /// Last message processing time.
    pub last_message_at: Option<Instant>,

    /// Current actor state (for introspection).
    pub state: ActorState,
}

impl ActorContext {
    /// Create a new actor context.
    pub fn new(actor_id: String, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            actor_id,
            shutdown,
            messages_processed: 0,
            last_message_at: None,
            state: ActorState::Starting,
        }
    }

    /// Check if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Actor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Actor is starting up.
    Starting,
    /// Actor is running and processing messages.
    Running,
    /// Actor is stopping.
    Stopping,
    /// Actor has stopped.
    Stopped,
    /// Actor has failed.
    Failed,
}

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in actors.
#[derive(Debug, Error)]
pub enum ActorError {
    /// Transient error; the actor keeps processing messages.
    #[error("transient error: {0}")]
    Transient(String),

    /// Permanent error; the actor stops.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Actor mailbox is full.
    #[error("mailbox full")]
    MailboxFull,

    /// Actor has stopped.
    #[error("actor stopped")]
    ActorStopped,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

// =============================================================================
// Actor Handle
// =============================================================================

/// Handle for sending messages to an actor.
pub struct ActorHandle<M: Message> {
    /// Sender for the actor's mailbox.
    tx: mpsc::Sender<M>,

    /// Actor ID for logging.
    actor_id: String,
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> Debug for ActorHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("actor_id", &self.actor_id)
            .finish()
    }
}

impl<M: Message> ActorHandle<M> {
    /// Build a handle over an existing mailbox sender.
    pub fn new(tx: mpsc::Sender<M>, actor_id: impl Into<String>) -> Self {
        Self {
            tx,
            actor_id: actor_id.into(),
        }
    }

    /// Send a message to the actor.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ActorError::ActorStopped)
    }

    /// Try to send a message without blocking.
    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ActorError::MailboxFull,
            mpsc::error::TrySendError::Closed(_) => ActorError::ActorStopped,
        })
    }

    /// Get the actor ID.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Returns true once the actor loop has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Type-erased actor reference held by the promoter.
pub struct ActorRef {
    /// Actor ID.
    pub actor_id: String,

    /// Actor type name.
    pub actor_type: String,

    /// Task handle.
    task_handle: tokio::task::JoinHandle<()>,

    /// Shutdown sender.
    shutdown_tx: watch::Sender<bool>,
}

impl ActorRef {
    /// Signal the actor to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Check if the actor task is still running.
    pub fn is_running(&self) -> bool {
        !self.task_handle.is_finished()
    }

    /// Abort the actor task immediately.
    pub fn abort(&self) {
        self.task_handle.abort();
    }
}

// =============================================================================
// Promoter
// =============================================================================

/// Promotes plain objects into actors and keeps track of them.
#[derive(Default)]
pub struct Promoter {
    /// Promoted actors.
    children: HashMap<String, ActorRef>,
}

impl Promoter {
    /// Create an empty promoter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `actor` on its own task with a mailbox of `mailbox_size` messages.
    pub fn promote<A>(&mut self, mut actor: A, mailbox_size: usize) -> ActorHandle<A::Message>
    where
        A: Actor,
    {
        let actor_id = format!("{}_{}", actor.name(), generate_actor_id());
        let actor_type = actor.name().to_string();
        let (tx, rx) = mpsc::channel(mailbox_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = ActorHandle::new(tx, actor_id.clone());
        actor.bind_self(handle.clone());

        let actor_id_clone = actor_id.clone();
        let task_handle = tokio::spawn(async move {
            run_actor_loop(actor, rx, shutdown_rx, actor_id_clone).await;
        });

        self.children.insert(
            actor_id.clone(),
            ActorRef {
                actor_id: actor_id.clone(),
                actor_type: actor_type.clone(),
                task_handle,
                shutdown_tx,
            },
        );

        info!(actor_id = %actor_id, actor_type = %actor_type, "Promoted actor");

        handle
    }

    /// Signal a single actor to stop. Returns false if the actor is unknown.
    pub fn terminate(&mut self, actor_id: &str) -> bool {
        match self.children.remove(actor_id) {
            Some(actor_ref) => {
                debug!(actor_id = %actor_id, "Terminating actor");
                actor_ref.stop();
                true
            }
            None => false,
        }
    }

    /// Forget actors whose task has already finished.
    pub fn prune(&mut self) -> usize {
        let before = self.children.len();
        self.children.retain(|_, actor_ref| actor_ref.is_running());
        before - self.children.len()
    }

    /// Stop all promoted actors.
    pub async fn stop_all(&mut self) {
        info!(count = self.children.len(), "Stopping all actors");

        for actor_ref in self.children.values() {
            actor_ref.stop();
        }

        // Wait for all to finish with timeout
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if self.children.values().all(|c| !c.is_running()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Force abort any remaining
        for (actor_id, actor_ref) in &self.children {
            if actor_ref.is_running() {
                warn!(actor_id = %actor_id, actor_type = %actor_ref.actor_type, "Force aborting actor");
                actor_ref.abort();
            }
        }

        self.children.clear();
    }

    /// Get count of running actors.
    pub fn running_count(&self) -> usize {
        self.children.values().filter(|c| c.is_running()).count()
    }
}

// =============================================================================
// Actor Loop
// =============================================================================

/// Run the main actor loop.
async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    mut shutdown: watch::Receiver<bool>,
    actor_id: String,
) {
    let mut ctx = ActorContext::new(actor_id.clone(), shutdown.clone());

    if let Err(e) = actor.on_start(&mut ctx).await {
        error!(actor_id = %actor_id, error = %e, "Actor failed to start");
        return;
    }

    ctx.state = ActorState::Running;
    debug!(actor_id = %actor_id, "Actor started");

    loop {
        tokio::select! {
            biased;

            // Check shutdown first
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(actor_id = %actor_id, "Actor received shutdown signal");
                    break;
                }
            }

            msg = rx.recv() => {
                match msg {
                    Some(msg) => {
                        ctx.messages_processed += 1;
                        ctx.last_message_at = Some(Instant::now());

                        match actor.handle(msg, &mut ctx).await {
                            Ok(true) => {}
                            Ok(false) => {
                                info!(actor_id = %actor_id, "Actor requested stop");
                                break;
                            }
                            Err(e) => {
                                error!(actor_id = %actor_id, error = %e, "Actor error");
                                actor.on_crash(&e);
                                if matches!(e, ActorError::Permanent(_)) {
                                    ctx.state = ActorState::Failed;
                                    break;
                                }
                            }
                        }
                    }
                    None => {
                        debug!(actor_id = %actor_id, "Actor mailbox closed");
                        break;
                    }
                }
            }
        }
    }

    // Close the mailbox so pending and future senders observe the stop.
    rx.close();

    ctx.state = ActorState::Stopping;
    actor.on_stop(&mut ctx).await;
    ctx.state = ActorState::Stopped;

    info!(
        actor_id = %actor_id,
        messages_processed = ctx.messages_processed,
        "Actor stopped"
    );
}

// =============================================================================
// Helpers
// =============================================================================

static ACTOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_actor_id() -> u64 {
    ACTOR_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum CounterMessage {
        Add(u64),
        Get(tokio::sync::oneshot::Sender<u64>),
        Stop,
    }

    struct Counter {
        total: u64,
        own: Option<ActorHandle<CounterMessage>>,
    }

    #[async_trait]
    impl Actor for Counter {
        type Message = CounterMessage;

        fn name(&self) -> &str {
            "counter"
        }

        fn bind_self(&mut self, handle: ActorHandle<CounterMessage>) {
            self.own = Some(handle);
        }

        async fn handle(&mut self, msg: CounterMessage, _ctx: &mut ActorContext) -> Result<bool, ActorError> {
            match msg {
                CounterMessage::Add(n) => {
                    self.total += n;
                    if n == 0 {
                        return Err(ActorError::Transient("zero".to_string()));
                    }
                }
                CounterMessage::Get(reply_to) => {
                    let _ = reply_to.send(self.total);
                }
                CounterMessage::Stop => return Ok(false),
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_actor_handle_send() {
        let (tx, mut rx) = mpsc::channel::<CounterMessage>(16);
        let handle = ActorHandle::new(tx, "test");

        handle.send(CounterMessage::Add(3)).await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, CounterMessage::Add(3)));
        assert_eq!(handle.actor_id(), "test");
    }

    #[tokio::test]
    async fn test_try_send_reports_full_mailbox() {
        let (tx, _rx) = mpsc::channel::<CounterMessage>(1);
        let handle = ActorHandle::new(tx, "test");

        handle.try_send(CounterMessage::Add(1)).unwrap();
        let err = handle.try_send(CounterMessage::Add(1)).unwrap_err();
        assert!(matches!(err, ActorError::MailboxFull));
    }

    #[tokio::test]
    async fn test_promoted_actor_processes_in_order() {
        let mut promoter = Promoter::new();
        let handle = promoter.promote(Counter { total: 0, own: None }, 16);
        assert!(handle.actor_id().starts_with("counter_"));

        handle.send(CounterMessage::Add(2)).await.unwrap();
        // Transient errors keep the actor alive.
        handle.send(CounterMessage::Add(0)).await.unwrap();
        handle.send(CounterMessage::Add(5)).await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        handle.send(CounterMessage::Get(tx)).await.unwrap();
        assert_eq!(rx.await.unwrap(), 7);
        assert_eq!(promoter.running_count(), 1);
    }

    #[tokio::test]
    async fn test_actor_stop_closes_mailbox() {
        let mut promoter = Promoter::new();
        let handle = promoter.promote(Counter { total: 0, own: None }, 16);

        handle.send(CounterMessage::Stop).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let err = handle.send(CounterMessage::Add(1)).await.unwrap_err();
        assert!(matches!(err, ActorError::ActorStopped));
    }

    #[tokio::test]
    async fn test_terminate_unknown_actor() {
        let mut promoter = Promoter::new();
        assert!(!promoter.terminate("nope_0"));

        let handle = promoter.promote(Counter { total: 0, own: None }, 4);
        assert!(promoter.terminate(handle.actor_id()));
        promoter.stop_all().await;
        assert_eq!(promoter.running_count(), 0);
    }

    #[test]
    fn test_context_reports_shutdown_signal() {
        let (tx, rx) = watch::channel(false);
        let ctx = ActorContext::new("counter_0".to_string(), rx);
        assert!(!ctx.is_shutdown());

        tx.send(true).unwrap();
        assert!(ctx.is_shutdown());
    }
}
