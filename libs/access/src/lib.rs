//! # nsp-access
//!
//! Access control for node sources: who may use the nodes a node source
//! acquires, and who may add nodes to it.
//!
//! ## Text Grammar
//!
//! ```text
//! ME | ALL | MY_GROUPS | PROVIDER | PROVIDER_GROUPS
//! users=u1,u2[;groups=g1,g2][;tokens=t1,t2]
//! ```
//!
//! The fixed tags resolve against the caller's identity. The custom form lists
//! principals explicitly and never draws from the caller.
//!
//! `ALL` carries no principals: it means "no restriction" and is interpreted by
//! the consumer (see [`AccessControlSpec::permits`]).

mod error;
mod principal;
mod spec;

pub use error::AccessError;
pub use principal::{Caller, Principal};
pub use spec::{AccessControlSpec, AccessTag};
