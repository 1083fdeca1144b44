//! Interest CRUD + heartbeat API.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::app::Core;
use crate::registry::UpsertRequest;
use crate::types::DownstreamTransport;

use super::{ApiResult, authenticate, bridge_err, err_json};

#[derive(Debug, Deserialize)]
pub struct CreateInterestBody {
    pub bot_account_id: String,
    pub event_type: String,
    pub broadcaster_user_id: String,
    pub transport: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn interest_json(row: &bridge_db::interests::InterestRow, created: bool) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "created": created,
        "interest": {
            "id": row.id,
            "bot_account_id": row.bot_account_id,
            "event_type": row.event_type,
            "broadcaster_user_id": row.broadcaster_user_id,
            "transport": row.transport,
            "webhook_url": if row.webhook_url.is_empty() { Value::Null } else { json!(row.webhook_url) },
            "updated_at": row.updated_at,
        }
    }))
}

/// POST /v1/interests
pub async fn create_interest(
    State(core): State<Core>,
    headers: HeaderMap,
    Json(body): Json<CreateInterestBody>,
) -> ApiResult {
    let service = authenticate(&core, &headers).map_err(|e| bridge_err(&e))?;

    let transport = match body.transport.as_str() {
        "ws" => DownstreamTransport::Ws,
        "webhook" => match body.webhook_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => DownstreamTransport::Webhook { url },
            None => return Err(err_json(422, "webhook_url is required for webhook transport")),
        },
        other => return Err(err_json(422, &format!("unknown transport: {other}"))),
    };

    let outcome = core
        .registry()
        .upsert(
            &service,
            UpsertRequest {
                bot_account_id: body.bot_account_id,
                event_type: body.event_type,
                broadcaster: body.broadcaster_user_id,
                transport,
            },
        )
        .await
        .map_err(|e| bridge_err(&e))?;

    // The primary key is ensured synchronously so permission failures
    // surface to the caller; companions follow in the background.
    let mut ensure_keys = outcome.ensure_keys.into_iter();
    if let Some(primary) = ensure_keys.next() {
        core.manager()
            .ensure(&primary)
            .await
            .map_err(|e| bridge_err(&e))?;
    }
    for key in ensure_keys {
        let manager = core.manager().clone();
        tokio::spawn(async move {
            if let Err(e) = manager.ensure(&key).await {
                tracing::warn!(key = %key, error = %e, "Companion ensure failed");
            }
        });
    }

    Ok(interest_json(&outcome.interest, outcome.created))
}

/// DELETE /v1/interests/{id}
pub async fn delete_interest(
    State(core): State<Core>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let service = authenticate(&core, &headers).map_err(|e| bridge_err(&e))?;

    let outcome = core
        .registry()
        .delete(&service.id, &id)
        .await
        .map_err(|e| bridge_err(&e))?;

    if outcome.last_for_key {
        let key = crate::types::InterestKey::of(&outcome.interest);
        if let Err(e) = core.manager().release(&key).await {
            tracing::warn!(key = %key, error = %e, "Release after delete failed");
        }
    }

    Ok(Json(json!({
        "status": "ok",
        "deleted": outcome.interest.id,
        "last_for_key": outcome.last_for_key,
    })))
}

/// POST /v1/interests/{id}/heartbeat
pub async fn heartbeat(
    State(core): State<Core>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let service = authenticate(&core, &headers).map_err(|e| bridge_err(&e))?;

    let touched = core
        .registry()
        .heartbeat(&service.id, &id)
        .map_err(|e| bridge_err(&e))?;

    Ok(Json(json!({ "status": "ok", "touched": touched })))
}
