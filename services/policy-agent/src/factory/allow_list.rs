//! Externally managed list of policies that may be created.
//!
//! The file is line oriented: one policy name per line, optionally followed
//! by `=value` or `: value` (the value is ignored). Blank lines and lines
//! starting with `#` or `!` are comments.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::PolicyError;

/// How the allow-list is kept current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowListRefresh {
    /// Only on explicit request (e.g. SIGHUP).
    Manual,
    /// Also on a fixed timer.
    Every(Duration),
}

/// Parse allow-list text into a set of names.
pub fn parse_allow_list(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let end = line
                .find(|c: char| c == '=' || c == ':' || c.is_whitespace())
                .unwrap_or(line.len());
            let name = line[..end].trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// Resolve `path` against `install_root` unless it is absolute.
pub fn resolve_path(path: &Path, install_root: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        install_root.join(path)
    }
}

/// The allowed policy names, reloadable from disk.
#[derive(Debug)]
pub struct AllowList {
    path: Option<PathBuf>,
    names: RwLock<BTreeSet<String>>,
}

impl AllowList {
    /// Load the allow-list file at `path`.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, PolicyError> {
        let path = path.into();
        let names = read_names(&path).await?;
        info!(path = %path.display(), policies = names.len(), "Loaded policy allow-list");

        Ok(Self {
            path: Some(path),
            names: RwLock::new(names),
        })
    }

    /// A fixed allow-list not backed by a file.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: None,
            names: RwLock::new(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the file. On failure the previous names stay in effect.
    pub async fn reload(&self) -> Result<usize, PolicyError> {
        let Some(path) = &self.path else {
            debug!("Allow-list has no backing file, nothing to reload");
            return Ok(self.names.read().await.len());
        };

        let names = read_names(path).await?;
        let count = names.len();

        let mut current = self.names.write().await;
        if *current != names {
            info!(path = %path.display(), policies = count, "Policy allow-list changed");
        }
        *current = names;
        Ok(count)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.names.read().await.contains(name)
    }

    /// Allowed names, sorted.
    pub async fn names(&self) -> Vec<String> {
        self.names.read().await.iter().cloned().collect()
    }
}

async fn read_names(path: &Path) -> Result<BTreeSet<String>, PolicyError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| PolicyError::AllowList {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(parse_allow_list(&text))
}

/// Reload `allow_list` every `every` until `shutdown` flips to true.
pub async fn run_refresh_loop(allow_list: Arc<AllowList>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("Allow-list refresh stopped");
                    return;
                }
            }
            _ = interval.tick() => {
                if let Err(e) = allow_list.reload().await {
                    warn!(error = %e, "Failed to refresh policy allow-list, keeping previous list");
                }
            }
        }
    }
}
