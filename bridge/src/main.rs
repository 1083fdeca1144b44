//! EventSub bridge server binary.
//!
//! Starts the axum server, the upstream session loop, and the background
//! pruner, then waits for Ctrl+C.

use tracing_subscriber::EnvFilter;

use eventsub_bridge::app::Core;
use eventsub_bridge::config::BridgeConfig;
use eventsub_bridge::{background, server, shutdown, upstream};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting EventSub bridge");

    let config = BridgeConfig::load()?;
    let db = bridge_db::Database::open(&config.db_path)?;
    let core = Core::new(config, db);

    // Boot-time reconciliation: adopt or tear down upstream subscriptions
    // so the invariant (one live subscription per interested key) holds
    // before traffic arrives.
    if let Err(e) = core.manager().reconcile_startup().await {
        tracing::warn!(error = %e, "Startup reconciliation incomplete");
    }

    let server_core = core.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::start_server(server_core).await {
            tracing::error!("Server failed: {e}");
        }
    });

    let c = core.clone();
    tokio::spawn(async move { upstream::run(c).await });

    let c = core.clone();
    tokio::spawn(async move { background::prune_loop(c).await });

    tracing::info!(
        port = core.config().server_port,
        "EventSub bridge running. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c().await?;
    shutdown::graceful_shutdown(&core).await;

    server_handle.abort();
    Ok(())
}
