//! Background maintenance loops.

use std::collections::HashSet;

use chrono::Utc;

use crate::app::Core;
use crate::config::{PRUNE_INTERVAL, STALE_INTEREST_TTL};
use crate::types::InterestKey;

/// Prune interests without a heartbeat, then release orphaned keys.
pub async fn prune_loop(core: Core) {
    let shutdown = core.shutdown_token().clone();
    let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
    // The first tick fires immediately; skip it so boot reconciliation
    // settles first.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Prune loop stopped (shutdown)");
                return;
            }
            _ = ticker.tick() => {}
        }

        let cutoff = Utc::now().timestamp() - STALE_INTEREST_TTL.as_secs() as i64;
        let removed = match core.registry().prune_stale(cutoff) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "Stale interest prune failed");
                continue;
            }
        };
        if removed.is_empty() {
            continue;
        }

        let keys: HashSet<InterestKey> = removed.iter().map(InterestKey::of).collect();
        for key in keys {
            if !core.registry().lookup(&key).is_empty() {
                continue;
            }
            if let Err(e) = core.manager().release(&key).await {
                tracing::warn!(key = %key, error = %e, "Release of pruned key failed");
            }
        }
    }
}
