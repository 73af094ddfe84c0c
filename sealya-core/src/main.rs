// Sealya - headless host for the letter journal core
// Entry point and application setup

use sealya::app::AppState;
use sealya::clock::SystemClock;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Overrides the data directory
const DATA_DIR_ENV: &str = "SEALYA_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "sealya-data";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sealya=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sealya");

    let data_dir = std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    let state = AppState::open(data_dir, SystemClock::shared()).await?;
    let (scheduler, ticker) = state.start_background().await?;

    tracing::info!(
        "Ready: {} letters, tier {}, theme {:?}",
        state.letters.list().await.len(),
        state.subscription.current_tier().await,
        state.theme.theme().await
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    state.on_unload().await;
    ticker.abort();
    scheduler.shutdown().await?;
    state.close().await;

    tracing::info!("Sealya stopped");
    Ok(())
}
