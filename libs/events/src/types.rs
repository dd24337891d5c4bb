//! Event type definitions for resource manager events.
//!
//! Each event family has a payload struct; [`RmEvent`] wraps them for
//! delivery through a single listener channel.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    // Resource manager core
    pub const RM_STARTED: &str = "rm.started";
    pub const RM_SHUTTING_DOWN: &str = "rm.shutting_down";
    pub const RM_SHUTDOWN: &str = "rm.shutdown";

    // Node source
    pub const NODE_SOURCE_CREATED: &str = "node_source.created";
    pub const NODE_SOURCE_REMOVED: &str = "node_source.removed";
    pub const NODE_SOURCE_POLICY_UPDATED: &str = "node_source.policy_updated";

    // Node
    pub const NODE_ADDED: &str = "node.added";
    pub const NODE_STATE_CHANGED: &str = "node.state_changed";
    pub const NODE_REMOVED: &str = "node.removed";
}

// =============================================================================
// Event Types
// =============================================================================

/// Type of a resource manager event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RmEventType {
    Started,
    ShuttingDown,
    Shutdown,
    NodeSourceCreated,
    NodeSourceRemoved,
    NodeSourcePolicyUpdated,
    NodeAdded,
    NodeStateChanged,
    NodeRemoved,
}

impl RmEventType {
    /// Dotted event type name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RmEventType::Started => event_types::RM_STARTED,
            RmEventType::ShuttingDown => event_types::RM_SHUTTING_DOWN,
            RmEventType::Shutdown => event_types::RM_SHUTDOWN,
            RmEventType::NodeSourceCreated => event_types::NODE_SOURCE_CREATED,
            RmEventType::NodeSourceRemoved => event_types::NODE_SOURCE_REMOVED,
            RmEventType::NodeSourcePolicyUpdated => event_types::NODE_SOURCE_POLICY_UPDATED,
            RmEventType::NodeAdded => event_types::NODE_ADDED,
            RmEventType::NodeStateChanged => event_types::NODE_STATE_CHANGED,
            RmEventType::NodeRemoved => event_types::NODE_REMOVED,
        }
    }

    /// Family prefix of the event type (`rm`, `node_source` or `node`).
    pub fn family(&self) -> &'static str {
        match self {
            RmEventType::Started | RmEventType::ShuttingDown | RmEventType::Shutdown => "rm",
            RmEventType::NodeSourceCreated
            | RmEventType::NodeSourceRemoved
            | RmEventType::NodeSourcePolicyUpdated => "node_source",
            RmEventType::NodeAdded | RmEventType::NodeStateChanged | RmEventType::NodeRemoved => {
                "node"
            }
        }
    }

    /// Returns true if the resource manager is going away.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, RmEventType::ShuttingDown | RmEventType::Shutdown)
    }
}

impl fmt::Display for RmEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RmEventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let event_type = match s {
            event_types::RM_STARTED => RmEventType::Started,
            event_types::RM_SHUTTING_DOWN => RmEventType::ShuttingDown,
            event_types::RM_SHUTDOWN => RmEventType::Shutdown,
            event_types::NODE_SOURCE_CREATED => RmEventType::NodeSourceCreated,
            event_types::NODE_SOURCE_REMOVED => RmEventType::NodeSourceRemoved,
            event_types::NODE_SOURCE_POLICY_UPDATED => RmEventType::NodeSourcePolicyUpdated,
            event_types::NODE_ADDED => RmEventType::NodeAdded,
            event_types::NODE_STATE_CHANGED => RmEventType::NodeStateChanged,
            event_types::NODE_REMOVED => RmEventType::NodeRemoved,
            other => return Err(EventError::UnknownEventType(other.to_string())),
        };
        Ok(event_type)
    }
}

// =============================================================================
// Status Enums
// =============================================================================

/// State of a node known to the resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Free,
    Busy,
    Configuring,
    Deploying,
    Lost,
    Down,
    ToBeRemoved,
    Locked,
}

impl NodeState {
    /// Returns true if the node can run work (not deploying, lost or down).
    pub fn is_usable(&self) -> bool {
        !matches!(self, NodeState::Deploying | NodeState::Lost | NodeState::Down)
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Resource manager core event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreEvent {
    pub event_type: RmEventType,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
}

impl CoreEvent {
    /// Build a core event occurring now.
    pub fn new(event_type: RmEventType) -> Result<Self, EventError> {
        expect_family(event_type, "rm")?;
        Ok(Self {
            event_type,
            occurred_at: Utc::now(),
            initiator: None,
        })
    }
}

/// Node source lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSourceEvent {
    pub event_type: RmEventType,
    pub node_source: String,
    pub policy_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Node lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub event_type: RmEventType,
    pub node_url: String,
    pub node_source: String,
    pub node_state: NodeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<NodeState>,
    pub occurred_at: DateTime<Utc>,
}

impl NodeEvent {
    /// Build a node event occurring now.
    pub fn new(
        event_type: RmEventType,
        node_url: impl Into<String>,
        node_source: impl Into<String>,
        node_state: NodeState,
    ) -> Result<Self, EventError> {
        expect_family(event_type, "node")?;
        Ok(Self {
            event_type,
            node_url: node_url.into(),
            node_source: node_source.into(),
            node_state,
            previous_state: None,
            occurred_at: Utc::now(),
        })
    }
}

fn expect_family(event_type: RmEventType, family: &'static str) -> Result<(), EventError> {
    if event_type.family() == family {
        Ok(())
    } else {
        Err(EventError::WrongFamily {
            event_type: event_type.to_string(),
            family,
        })
    }
}

/// Any resource manager event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "event", rename_all = "snake_case")]
pub enum RmEvent {
    Core(CoreEvent),
    NodeSource(NodeSourceEvent),
    Node(NodeEvent),
}

impl RmEvent {
    /// Type of the wrapped event.
    pub fn event_type(&self) -> RmEventType {
        match self {
            RmEvent::Core(event) => event.event_type,
            RmEvent::NodeSource(event) => event.event_type,
            RmEvent::Node(event) => event.event_type,
        }
    }
}

/// Snapshot returned to a new subscriber.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    pub node_sources: Vec<NodeSourceEvent>,
    pub nodes: Vec<NodeEvent>,
}

impl InitialState {
    /// Number of usable nodes in the snapshot, optionally restricted to one node source.
    pub fn usable_nodes(&self, node_source: Option<&str>) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.node_state.is_usable())
            .filter(|n| node_source.is_none_or(|source| n.node_source == source))
            .count()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names_roundtrip() {
        let types = [
            RmEventType::Started,
            RmEventType::ShuttingDown,
            RmEventType::Shutdown,
            RmEventType::NodeSourceCreated,
            RmEventType::NodeSourceRemoved,
            RmEventType::NodeSourcePolicyUpdated,
            RmEventType::NodeAdded,
            RmEventType::NodeStateChanged,
            RmEventType::NodeRemoved,
        ];
        for event_type in types {
            let parsed: RmEventType = event_type.as_str().parse().unwrap();
            assert_eq!(parsed, event_type);
        }
        assert!("rm.exploded".parse::<RmEventType>().is_err());
    }

    #[test]
    fn test_core_event_rejects_node_type() {
        assert!(CoreEvent::new(RmEventType::ShuttingDown).is_ok());
        let err = CoreEvent::new(RmEventType::NodeAdded).unwrap_err();
        assert!(matches!(err, EventError::WrongFamily { family: "rm", .. }));
    }

    #[test]
    fn test_rm_event_serialization() {
        let event = RmEvent::Node(
            NodeEvent::new(RmEventType::NodeAdded, "pnp://host:1/n1", "ns", NodeState::Free)
                .unwrap(),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"family\":\"node\""));
        assert!(json.contains("\"node_state\":\"free\""));

        let parsed: RmEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_initial_state_usable_nodes() {
        let mk = |url: &str, source: &str, state| {
            NodeEvent::new(RmEventType::NodeAdded, url, source, state).unwrap()
        };
        let snapshot = InitialState {
            node_sources: vec![],
            nodes: vec![
                mk("n1", "a", NodeState::Free),
                mk("n2", "a", NodeState::Down),
                mk("n3", "b", NodeState::Busy),
                mk("n4", "a", NodeState::Deploying),
            ],
        };
        assert_eq!(snapshot.usable_nodes(None), 2);
        assert_eq!(snapshot.usable_nodes(Some("a")), 1);
    }
}
