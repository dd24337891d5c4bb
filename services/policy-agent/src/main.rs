//! nsp Policy Agent
//!
//! Runs one node source policy against a development node source and keeps
//! the policy allow-list current.
//!
//! ## Signals
//!
//! - **SIGHUP**: reload the allow-list
//! - **Ctrl-C**: shut the policy down and exit

use std::sync::Arc;

use anyhow::{Context, Result};
use nsp_access::Caller;
use nsp_policy_agent::config::Config;
use nsp_policy_agent::factory::{run_refresh_loop, AllowList, AllowListRefresh, PolicyFactory, PolicyRegistry};
use nsp_policy_agent::MockInventory;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting nsp policy agent");
    info!(
        home = %config.home.display(),
        allow_list = %config.allow_list_path.display(),
        node_source = %config.node_source,
        policy = %config.policy,
        "Configuration loaded"
    );

    let allow_list = Arc::new(
        AllowList::load(&config.allow_list_path)
            .await
            .context("loading policy allow-list")?,
    );
    let mut factory = PolicyFactory::new(PolicyRegistry::builtin(), Arc::clone(&allow_list))
        .with_mailbox_size(config.mailbox_size);

    for supported in factory.list_supported_policies().await {
        info!(policy = %supported.name, description = %supported.description, "Policy available");
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresh_handle = match config.allow_list_refresh {
        AllowListRefresh::Every(every) => Some(tokio::spawn(run_refresh_loop(
            Arc::clone(&allow_list),
            every,
            shutdown_rx.clone(),
        ))),
        AllowListRefresh::Manual => None,
    };

    // Development node source
    let inventory = Arc::new(MockInventory::new(config.node_source.clone()));

    let policy = factory
        .create(&config.policy, &config.infrastructure, config.policy_params.clone())
        .await
        .with_context(|| format!("creating policy {}", config.policy))?;
    policy.set_inventory(inventory).await?;
    policy.activate().await?;

    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;

    // Wait for shutdown signal
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = hangup.recv() => {
                match factory.reload_allow_list().await {
                    Ok(count) => info!(policies = count, "Reloaded policy allow-list"),
                    Err(e) => warn!(error = %e, "Failed to reload policy allow-list, keeping previous list"),
                }
            }
        }
    }

    if let Err(e) = policy.shutdown(Caller::new("policy-agent")).await {
        error!(error = %e, "Policy shutdown failed");
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);
    factory.shutdown().await;

    if let Some(handle) = refresh_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Allow-list refresh task panicked");
        }
    }

    info!("Policy agent shutdown complete");
    Ok(())
}
