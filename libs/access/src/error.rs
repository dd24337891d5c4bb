//! Error types for access spec parsing.

use thiserror::Error;

/// Errors that can occur when parsing an access control spec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The spec text is empty.
    #[error("access spec cannot be empty")]
    Empty,

    /// A clause is not of the form `key=values`.
    #[error("malformed access clause '{0}': expected key=v1,v2,...")]
    MalformedClause(String),

    /// A clause uses a key other than `users`, `groups` or `tokens`.
    #[error("unknown access clause key '{0}': expected users, groups or tokens")]
    UnknownKey(String),

    /// The same key appears in more than one clause.
    #[error("duplicate access clause key '{0}'")]
    DuplicateKey(String),

    /// A clause has no values.
    #[error("access clause '{0}' has an empty value list")]
    EmptyValueList(String),

    /// A value list contains an empty item (e.g. `users=a,,b`).
    #[error("access clause '{0}' contains an empty value")]
    EmptyValue(String),
}
