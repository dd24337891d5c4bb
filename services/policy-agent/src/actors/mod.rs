//! Actor framework for node source policies.
//!
//! A lightweight mailbox actor runtime on top of tokio. Every promoted policy
//! runs on its own task and handles administrative calls, resource manager
//! events and scheduler ticks strictly one at a time.
//!
//! ## Design Principles
//!
//! - **One actor per policy**: the actor owns all policy state; nothing else
//!   holds a reference to it
//! - **Re-entry through the mailbox**: timers and background completions only
//!   ever send messages to the actor's own handle
//! - **At-most-once delivery**: messages sent after the actor stopped are
//!   dropped by the sender

mod framework;

pub use framework::{
    Actor, ActorContext, ActorError, ActorHandle, ActorRef, ActorState, Message, Promoter,
};
