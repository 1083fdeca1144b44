//! Graceful shutdown sequence.
//!
//! Upstream subscriptions are left untouched: they survive the restart and
//! the next boot reconciles them.

use std::time::Duration;

use crate::app::Core;

const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

pub async fn graceful_shutdown(core: &Core) {
    tracing::info!("Shutdown sequence started");

    core.shutdown_token().cancel();
    tracing::info!("Shutdown: background loops cancelled");

    if let Some(tx) = core.take_session_stop().await {
        if tx.send(()).await.is_ok() {
            tracing::info!("Shutdown: upstream session stop signal sent");
        } else {
            tracing::warn!("Shutdown: failed to send upstream session stop signal");
        }
    }

    core.fanout().drain_deliveries(DRAIN_DEADLINE).await;
    tracing::info!("Shutdown: pending deliveries drained");

    core.fanout().close_all();
    tracing::info!("Shutdown sequence completed");
}
