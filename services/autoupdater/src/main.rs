//! Autoupdater
//!
//! Polls a container registry for the digest of one `repository:tag` and
//! updates the configured service whenever that digest changes.
//!
//! ## Architecture
//!
//! - **Active Fetcher**: Polling loop, runs on its own task until Ctrl-C
//! - **Registry Client**: Token and manifest lookups against a v2 registry
//! - **Updater**: External command, or a logging dry run when none is set

use std::sync::Arc;

use anyhow::{Context, Result};
use autoupdater::config::Config;
use autoupdater::{ActiveFetcher, CommandUpdater, FetcherState, MockUpdater, Updater};
use autoupdater_registry::RegistryClient;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let log_level =
        std::env::var("AUTOUPDATER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_level.into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env().inspect_err(|e| {
        error!(error = %e, "Invalid configuration");
    })?;

    info!(
        service = %config.service,
        repository = %config.repository,
        tag = %config.tag,
        registry_url = %config.registry_url,
        interval_secs = config.poll_interval.as_secs(),
        log_level = %config.log_level,
        "Starting autoupdater"
    );

    let registry = RegistryClient::new(config.registry_config())
        .context("Failed to create registry client")?;

    let updater: Arc<dyn Updater> = match &config.update_command {
        Some(template) => Arc::new(
            CommandUpdater::from_template(template).context("Invalid update command")?,
        ),
        None => {
            warn!("AUTOUPDATER_UPDATE_COMMAND not set, running in dry-run mode");
            Arc::new(MockUpdater::new())
        }
    };

    let fetcher = Arc::new(ActiveFetcher::new(config.fetch_target(), registry, updater));
    fetcher.set_interval(config.poll_interval);
    info!(
        token_url = %fetcher.target().token_url(),
        manifest_url = %fetcher.target().manifest_url(),
        "Watching image"
    );

    let mut fetcher_handle = tokio::spawn({
        let fetcher = Arc::clone(&fetcher);
        async move { fetcher.start().await }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut fetcher_handle => {
            match result {
                Ok(Ok(())) => info!("Fetcher exited"),
                Ok(Err(e)) => error!(error = %e, "Fetcher failed to start"),
                Err(e) => error!(error = %e, "Fetcher task panicked"),
            }
            return Ok(());
        }
    }

    // A signal can arrive before the task has entered the loop
    let _ = fetcher
        .subscribe_state()
        .wait_for(|state| *state != FetcherState::Idle)
        .await;
    fetcher.stop();

    info!("Waiting for the current tick to finish...");
    match fetcher_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Fetcher failed to start"),
        Err(e) => error!(error = %e, "Fetcher task panicked"),
    }

    info!("Autoupdater shutdown complete");
    Ok(())
}
