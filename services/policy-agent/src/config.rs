//! Configuration for the policy agent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::factory::{resolve_path, AllowListRefresh, DEFAULT_MAILBOX_SIZE};
use crate::policy::PolicyParam;

/// Policy agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Installation root; relative paths resolve against it.
    pub home: PathBuf,

    /// Policy allow-list file.
    pub allow_list_path: PathBuf,

    /// Allow-list refresh mode.
    pub allow_list_refresh: AllowListRefresh,

    /// Policy mailbox capacity.
    pub mailbox_size: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Node source the policy manages.
    pub node_source: String,

    /// Policy to run.
    pub policy: String,

    /// Policy parameter vector.
    pub policy_params: Vec<PolicyParam>,

    /// Infrastructure type of the node source.
    pub infrastructure: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = PathBuf::from(lookup("NSP_HOME").unwrap_or_else(|| ".".to_string()));

        let allow_list_path = lookup("NSP_ALLOW_LIST")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config/policies.conf"));
        let allow_list_path = resolve_path(&allow_list_path, &home);

        let allow_list_refresh = match lookup("NSP_ALLOW_LIST_REFRESH_SECS") {
            Some(secs) => {
                let secs: u64 = secs
                    .trim()
                    .parse()
                    .with_context(|| format!("NSP_ALLOW_LIST_REFRESH_SECS is not a number: {secs}"))?;
                match secs {
                    0 => AllowListRefresh::Manual,
                    secs => AllowListRefresh::Every(Duration::from_secs(secs)),
                }
            }
            None => AllowListRefresh::Every(Duration::from_secs(60)),
        };

        let mailbox_size = lookup("NSP_MAILBOX_SIZE")
            .and_then(|s| s.trim().parse().ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_MAILBOX_SIZE);

        let log_level = lookup("NSP_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let node_source = lookup("NSP_NODE_SOURCE").unwrap_or_else(|| "Default".to_string());

        let policy = lookup("NSP_POLICY").unwrap_or_else(|| "StaticPolicy".to_string());

        let policy_params = match lookup("NSP_POLICY_PARAMS") {
            Some(json) => serde_json::from_str(&json)
                .with_context(|| format!("NSP_POLICY_PARAMS is not a JSON parameter array: {json}"))?,
            None => vec![PolicyParam::from("ALL"), PolicyParam::from("ME")],
        };

        let infrastructure =
            lookup("NSP_INFRASTRUCTURE").unwrap_or_else(|| "LocalInfrastructure".to_string());

        Ok(Self {
            home,
            allow_list_path,
            allow_list_refresh,
            mailbox_size,
            log_level,
            node_source,
            policy,
            policy_params,
            infrastructure,
        })
    }
}
