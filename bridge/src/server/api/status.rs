//! Liveness and runtime counters.

use axum::Json;
use axum::extract::State;
use serde_json::json;

use crate::app::Core;

use super::{ApiResult, err_json};

/// GET /status
pub async fn status_handler(State(core): State<Core>) -> ApiResult {
    let webhook_failures = core
        .db()
        .list_webhook_failures()
        .map_err(|e| err_json(500, &e.to_string()))?;

    Ok(Json(json!({
        "status": "ok",
        "upstream": {
            "session_id": core.manager().current_session_id(),
            "webhook_configured": core.config().webhook_upstream_available(),
            "keys": core.manager().state_counts(),
        },
        "interests": core.registry().counts_by_service(),
        "fanout": {
            "ws_connections": core.fanout().connection_count(),
            "pending_deliveries": core.fanout().pending_deliveries(),
            "webhook_failures": webhook_failures
                .into_iter()
                .map(|(service, count)| json!({ "service_id": service, "failures": count }))
                .collect::<Vec<_>>(),
        },
    })))
}
