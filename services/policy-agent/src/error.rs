//! Error types for policy configuration, lifecycle and creation.

use std::path::PathBuf;

use nsp_access::AccessError;
use thiserror::Error;

use crate::actors::ActorError;
use crate::inventory::InventoryError;
use crate::policy::LifecycleState;

/// Errors surfaced by node source policies and the policy factory.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Invalid policy parameters (bad cron, unparsable date, negative count, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed access control spec.
    #[error("invalid {field} access spec: {source}")]
    Access {
        field: &'static str,
        #[source]
        source: AccessError,
    },

    /// The requested policy is not on the allow-list.
    #[error("policy {0} is not supported")]
    NotSupported(String),

    /// The policy is allowed but cannot be instantiated.
    #[error("cannot instantiate policy {name}: {reason}")]
    Instantiation { name: String, reason: String },

    /// The operation is not valid in the policy's current lifecycle state.
    #[error("cannot {operation} a policy in state {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// The allow-list file could not be read.
    #[error("cannot read policy allow-list {}: {source}", path.display())]
    AllowList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A node inventory, core or monitoring call failed.
    #[error("collaborator error: {0}")]
    Collaborator(#[from] InventoryError),

    /// The policy actor is unreachable.
    #[error("policy actor error: {0}")]
    Actor(#[from] ActorError),
}

impl PolicyError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        PolicyError::Configuration(message.into())
    }

    /// Returns true for errors caused by bad parameters.
    pub fn is_configuration(&self) -> bool {
        matches!(self, PolicyError::Configuration(_) | PolicyError::Access { .. })
    }
}
