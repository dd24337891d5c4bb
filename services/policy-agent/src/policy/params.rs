//! Policy parameter vectors.
//!
//! Parameters arrive as an ordered list of loosely typed values. Positions 0
//! and 1 are always the user and provider access specs; the rest belong to
//! the strategy.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Number of leading access spec parameters.
pub const ACCESS_PARAM_COUNT: usize = 2;

/// Longest timer period accepted, in milliseconds (about a century).
///
/// Keeps every firing time computed from a period inside the range of
/// `chrono::DateTime` and `tokio::time::Instant`.
pub const MAX_PERIOD_MILLIS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// A single policy parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyParam {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl PolicyParam {
    /// Text form of the parameter.
    pub fn to_text(&self) -> String {
        match self {
            PolicyParam::Bool(value) => value.to_string(),
            PolicyParam::Int(value) => value.to_string(),
            PolicyParam::Text(value) => value.clone(),
        }
    }
}

impl fmt::Display for PolicyParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for PolicyParam {
    fn from(value: &str) -> Self {
        PolicyParam::Text(value.to_string())
    }
}

impl From<String> for PolicyParam {
    fn from(value: String) -> Self {
        PolicyParam::Text(value)
    }
}

impl From<bool> for PolicyParam {
    fn from(value: bool) -> Self {
        PolicyParam::Bool(value)
    }
}

impl From<i64> for PolicyParam {
    fn from(value: i64) -> Self {
        PolicyParam::Int(value)
    }
}

/// Typed reads over the strategy part of a parameter vector.
///
/// Indexes are relative to the strategy slice; error messages report the
/// absolute position.
#[derive(Debug, Clone, Copy)]
pub struct ParamReader<'a> {
    params: &'a [PolicyParam],
}

impl<'a> ParamReader<'a> {
    /// Read over the strategy slice (the vector from index 2).
    pub fn new(params: &'a [PolicyParam]) -> Self {
        Self { params }
    }

    fn get(&self, index: usize, name: &str) -> Result<&'a PolicyParam, PolicyError> {
        self.params.get(index).ok_or_else(|| {
            PolicyError::config(format!(
                "missing parameter {} ({name})",
                index + ACCESS_PARAM_COUNT
            ))
        })
    }

    /// A text parameter.
    pub fn text(&self, index: usize, name: &str) -> Result<String, PolicyError> {
        Ok(self.get(index, name)?.to_text())
    }

    /// A boolean parameter, given as a bool or as `true`/`false` text.
    pub fn flag(&self, index: usize, name: &str) -> Result<bool, PolicyError> {
        match self.get(index, name)? {
            PolicyParam::Bool(value) => Ok(*value),
            PolicyParam::Text(text) if text.trim().eq_ignore_ascii_case("true") => Ok(true),
            PolicyParam::Text(text) if text.trim().eq_ignore_ascii_case("false") => Ok(false),
            other => Err(PolicyError::config(format!(
                "parameter {} ({name}) must be true or false, got '{other}'",
                index + ACCESS_PARAM_COUNT
            ))),
        }
    }

    /// A positive duration given in milliseconds, at most `MAX_PERIOD_MILLIS`.
    pub fn millis(&self, index: usize, name: &str) -> Result<Duration, PolicyError> {
        let param = self.get(index, name)?;
        let millis = match param {
            PolicyParam::Int(value) => u64::try_from(*value).ok(),
            PolicyParam::Text(text) => text.trim().parse::<u64>().ok(),
            PolicyParam::Bool(_) => None,
        };
        match millis {
            Some(millis) if millis > 0 && millis <= MAX_PERIOD_MILLIS => Ok(Duration::from_millis(millis)),
            _ => Err(PolicyError::config(format!(
                "parameter {} ({name}) must be between 1 and {MAX_PERIOD_MILLIS} milliseconds, got '{param}'",
                index + ACCESS_PARAM_COUNT
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_deserialize_untagged() {
        let params: Vec<PolicyParam> =
            serde_json::from_str(r#"["ALL", "ME", 3000, true, "0 * * * *"]"#).unwrap();
        assert_eq!(
            params,
            vec![
                PolicyParam::from("ALL"),
                PolicyParam::from("ME"),
                PolicyParam::Int(3000),
                PolicyParam::Bool(true),
                PolicyParam::from("0 * * * *"),
            ]
        );
    }

    #[test]
    fn test_reader_flags() {
        let params = vec![PolicyParam::from("TRUE"), PolicyParam::Bool(false), "yes".into()];
        let reader = ParamReader::new(&params);
        assert!(reader.flag(0, "a").unwrap());
        assert!(!reader.flag(1, "b").unwrap());

        let err = reader.flag(2, "c").unwrap_err();
        assert!(err.to_string().contains("parameter 4 (c)"));
    }

    #[test]
    fn test_reader_millis() {
        let params = vec![PolicyParam::Int(1500), "250".into(), PolicyParam::Int(-1), "0".into()];
        let reader = ParamReader::new(&params);
        assert_eq!(reader.millis(0, "a").unwrap(), Duration::from_millis(1500));
        assert_eq!(reader.millis(1, "b").unwrap(), Duration::from_millis(250));
        assert!(reader.millis(2, "c").is_err());
        assert!(reader.millis(3, "d").is_err());
        assert!(reader.millis(4, "e").unwrap_err().to_string().contains("missing parameter 6"));
    }

    #[test]
    fn test_reader_millis_upper_bound() {
        let params = vec![
            PolicyParam::Int(MAX_PERIOD_MILLIS as i64),
            PolicyParam::Int(MAX_PERIOD_MILLIS as i64 + 1),
            PolicyParam::Int(9_000_000_000_000_000),
            "18446744073709551615".into(),
        ];
        let reader = ParamReader::new(&params);
        assert_eq!(reader.millis(0, "a").unwrap(), Duration::from_millis(MAX_PERIOD_MILLIS));
        for index in 1..4 {
            assert!(reader.millis(index, "b").unwrap_err().is_configuration());
        }
    }
}
