//! nsp Policy Agent Library
//!
//! Node source policies decide when a node source acquires and releases
//! nodes: all at once, on cron schedules, inside time windows, or by
//! replacing nodes that went down.
//!
//! ## Architecture
//!
//! Every policy runs as an actor with its own mailbox:
//!
//! ```text
//! PolicyFactory
//! ├── AllowList               (which policies may be created)
//! ├── PolicyRegistry          (which policies are built in)
//! └── PolicyActor(id)         (one per node source)
//!     ├── Scheduler           (timer tasks posting ticks to the mailbox)
//!     └── EventSubscription   (resource manager events, if event-aware)
//! ```
//!
//! ## Modules
//!
//! - `actors`: Actor framework
//! - `policy`: Policy trait, shared core, actor and handle
//! - `policies`: Built-in strategies
//! - `factory`: Registry, allow-list and policy creation
//! - `inventory`: Node source and resource manager interfaces
//! - `mock`: In-memory collaborators for development and tests

pub mod actors;
pub mod config;
pub mod error;
pub mod factory;
pub mod inventory;
pub mod mock;
pub mod policies;
pub mod policy;

// Re-export commonly used types
pub use error::PolicyError;
pub use factory::{AllowList, PolicyFactory, PolicyRegistry};
pub use inventory::{NodeInventory, ResourceCore};
pub use mock::{InventoryCall, MockInventory};
pub use policy::{LifecycleState, NodeSourcePolicy, PolicyHandle, PolicyParam, PolicyStatus};
