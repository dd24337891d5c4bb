//! Access control spec parsing and principal resolution.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AccessError;
use crate::principal::{Caller, Principal};

const CLAUSE_SEPARATOR: char = ';';
const VALUE_SEPARATOR: char = ',';

const USERS_KEY: &str = "users";
const GROUPS_KEY: &str = "groups";
const TOKENS_KEY: &str = "tokens";

/// The form an access spec was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessTag {
    /// Only the caller.
    Me,
    /// Anyone.
    All,
    /// The caller's groups.
    MyGroups,
    /// Deprecated alias of `Me` for provider access.
    Provider,
    /// Deprecated alias of `MyGroups` for provider access.
    ProviderGroups,
    /// Explicit `users=..;groups=..;tokens=..` lists.
    Custom,
}

impl AccessTag {
    /// Text form of the fixed tags. `None` for `Custom`.
    pub const fn as_fixed_str(&self) -> Option<&'static str> {
        match self {
            AccessTag::Me => Some("ME"),
            AccessTag::All => Some("ALL"),
            AccessTag::MyGroups => Some("MY_GROUPS"),
            AccessTag::Provider => Some("PROVIDER"),
            AccessTag::ProviderGroups => Some("PROVIDER_GROUPS"),
            AccessTag::Custom => None,
        }
    }
}

/// A parsed, immutable access control spec.
///
/// Equality and hashing use the raw text the spec was parsed from, so
/// `users=a,b` and `users=b,a` are different specs. Use
/// [`AccessControlSpec::is_equivalent`] to compare parsed content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessControlSpec {
    tag: AccessTag,
    raw: Cow<'static, str>,
    users: BTreeSet<String>,
    groups: BTreeSet<String>,
    tokens: BTreeSet<String>,
}

impl AccessControlSpec {
    /// Only the caller.
    pub const ME: Self = Self::fixed(AccessTag::Me, "ME");
    /// Anyone.
    pub const ALL: Self = Self::fixed(AccessTag::All, "ALL");
    /// The caller's groups.
    pub const MY_GROUPS: Self = Self::fixed(AccessTag::MyGroups, "MY_GROUPS");
    /// Deprecated: the caller, for provider access.
    pub const PROVIDER: Self = Self::fixed(AccessTag::Provider, "PROVIDER");
    /// Deprecated: the caller's groups, for provider access.
    pub const PROVIDER_GROUPS: Self = Self::fixed(AccessTag::ProviderGroups, "PROVIDER_GROUPS");

    const fn fixed(tag: AccessTag, raw: &'static str) -> Self {
        Self {
            tag,
            raw: Cow::Borrowed(raw),
            users: BTreeSet::new(),
            groups: BTreeSet::new(),
            tokens: BTreeSet::new(),
        }
    }

    /// Parse an access spec from its text form.
    pub fn parse(text: &str) -> Result<Self, AccessError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AccessError::Empty);
        }

        match text {
            "ME" => return Ok(Self::ME),
            "ALL" => return Ok(Self::ALL),
            "MY_GROUPS" => return Ok(Self::MY_GROUPS),
            "PROVIDER" => return Ok(Self::PROVIDER),
            "PROVIDER_GROUPS" => return Ok(Self::PROVIDER_GROUPS),
            _ => {}
        }

        let mut users = None;
        let mut groups = None;
        let mut tokens = None;

        for clause in text.split(CLAUSE_SEPARATOR) {
            let clause = clause.trim();
            let (key, values) = split_clause(clause)?;
            let slot = match key {
                USERS_KEY => &mut users,
                GROUPS_KEY => &mut groups,
                TOKENS_KEY => &mut tokens,
                other => return Err(AccessError::UnknownKey(other.to_string())),
            };
            if slot.is_some() {
                return Err(AccessError::DuplicateKey(key.to_string()));
            }
            *slot = Some(parse_values(clause, values)?);
        }

        Ok(Self {
            tag: AccessTag::Custom,
            raw: Cow::Owned(text.to_string()),
            users: users.unwrap_or_default(),
            groups: groups.unwrap_or_default(),
            tokens: tokens.unwrap_or_default(),
        })
    }

    /// The form this spec was written in.
    pub fn tag(&self) -> AccessTag {
        self.tag
    }

    /// The raw text this spec was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Explicit user names (custom form only).
    pub fn users(&self) -> &BTreeSet<String> {
        &self.users
    }

    /// Explicit group names (custom form only).
    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Explicit token identifiers (custom form only).
    pub fn tokens(&self) -> &BTreeSet<String> {
        &self.tokens
    }

    /// Returns true for `ALL`.
    pub fn is_unrestricted(&self) -> bool {
        self.tag == AccessTag::All
    }

    /// Returns true for the deprecated provider tags.
    pub fn is_deprecated(&self) -> bool {
        matches!(self.tag, AccessTag::Provider | AccessTag::ProviderGroups)
    }

    /// Resolve the principals this spec grants, relative to `caller`.
    ///
    /// `ALL` resolves to an empty set; callers must check
    /// [`is_unrestricted`](Self::is_unrestricted) first.
    pub fn resolve_principals(&self, caller: &Caller) -> BTreeSet<Principal> {
        match self.tag {
            AccessTag::Me | AccessTag::Provider => BTreeSet::from([caller.user_principal()]),
            AccessTag::MyGroups | AccessTag::ProviderGroups => caller.group_principals(),
            AccessTag::Custom => self
                .users
                .iter()
                .cloned()
                .map(Principal::User)
                .chain(self.groups.iter().cloned().map(Principal::Group))
                .chain(self.tokens.iter().cloned().map(Principal::Token))
                .collect(),
            AccessTag::All => BTreeSet::new(),
        }
    }

    /// Whether `requester` may use a resource owned by `owner` under this spec.
    pub fn permits(&self, owner: &Caller, requester: &Caller) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let granted = self.resolve_principals(owner);
        requester
            .principals()
            .iter()
            .any(|principal| granted.contains(principal))
    }

    /// Compare parsed content instead of raw text.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        let normalize = |tag: AccessTag| match tag {
            AccessTag::Provider => AccessTag::Me,
            AccessTag::ProviderGroups => AccessTag::MyGroups,
            tag => tag,
        };
        normalize(self.tag) == normalize(other.tag)
            && self.users == other.users
            && self.groups == other.groups
            && self.tokens == other.tokens
    }
}

fn split_clause(clause: &str) -> Result<(&str, &str), AccessError> {
    let mut parts = clause.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(values), None) if !key.trim().is_empty() => Ok((key.trim(), values)),
        _ => Err(AccessError::MalformedClause(clause.to_string())),
    }
}

fn parse_values(clause: &str, values: &str) -> Result<BTreeSet<String>, AccessError> {
    if values.trim().is_empty() {
        return Err(AccessError::EmptyValueList(clause.to_string()));
    }
    values
        .split(VALUE_SEPARATOR)
        .map(|value| {
            let value = value.trim();
            if value.is_empty() {
                Err(AccessError::EmptyValue(clause.to_string()))
            } else {
                Ok(value.to_string())
            }
        })
        .collect()
}

impl PartialEq for AccessControlSpec {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for AccessControlSpec {}

impl Hash for AccessControlSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for AccessControlSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for AccessControlSpec {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccessControlSpec {
    type Error = AccessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessControlSpec> for String {
    fn from(spec: AccessControlSpec) -> Self {
        spec.raw.into_owned()
    }
}
