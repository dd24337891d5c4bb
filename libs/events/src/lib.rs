//! # nsp-events
//!
//! Event model of the resource manager, as seen by node source policies.
//!
//! ## Event Families
//!
//! - Core events (`rm.*`): resource manager started, shutting down, shut down
//! - Node source events (`node_source.*`): created, removed, policy updated
//! - Node events (`node.*`): added, state changed, removed
//!
//! A subscriber first receives an [`InitialState`] snapshot, then a stream of
//! [`RmEvent`]s in emission order.

mod error;
mod types;

pub use error::EventError;
pub use types::*;
