//! Caller identity and the principals derived from it.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An identity principal an access check can match on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Principal {
    /// A user name.
    User(String),
    /// A group name.
    Group(String),
    /// A token identifier.
    Token(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(name) => write!(f, "user:{name}"),
            Principal::Group(name) => write!(f, "group:{name}"),
            Principal::Token(id) => write!(f, "token:{id}"),
        }
    }
}

/// The authenticated client issuing a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller {
    /// User name.
    pub name: String,

    /// Groups the user belongs to.
    #[serde(default)]
    pub groups: BTreeSet<String>,

    /// Tokens the user holds.
    #[serde(default)]
    pub tokens: BTreeSet<String>,
}

impl Caller {
    /// Create a caller with no groups or tokens.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: BTreeSet::new(),
            tokens: BTreeSet::new(),
        }
    }

    /// Add groups to the caller.
    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Add tokens to the caller.
    #[must_use]
    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// The caller's user-name principal.
    pub fn user_principal(&self) -> Principal {
        Principal::User(self.name.clone())
    }

    /// The caller's group principals.
    pub fn group_principals(&self) -> BTreeSet<Principal> {
        self.groups.iter().cloned().map(Principal::Group).collect()
    }

    /// Every principal the caller can present.
    pub fn principals(&self) -> BTreeSet<Principal> {
        let mut all = self.group_principals();
        all.insert(self.user_principal());
        all.extend(self.tokens.iter().cloned().map(Principal::Token));
        all
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_principals() {
        let caller = Caller::new("alice")
            .with_groups(["ops", "dev"])
            .with_tokens(["gpu"]);

        let principals = caller.principals();
        assert_eq!(principals.len(), 4);
        assert!(principals.contains(&Principal::User("alice".to_string())));
        assert!(principals.contains(&Principal::Group("ops".to_string())));
        assert!(principals.contains(&Principal::Token("gpu".to_string())));
    }

    #[test]
    fn test_principal_display() {
        assert_eq!(Principal::User("bob".into()).to_string(), "user:bob");
        assert_eq!(Principal::Group("ops".into()).to_string(), "group:ops");
    }
}
