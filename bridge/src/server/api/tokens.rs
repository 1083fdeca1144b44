//! WebSocket auth token minting.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde_json::json;

use crate::app::Core;

use super::{ApiResult, authenticate, bridge_err};

/// POST /v1/ws-token
pub async fn mint_ws_token(State(core): State<Core>, headers: HeaderMap) -> ApiResult {
    let service = authenticate(&core, &headers).map_err(|e| bridge_err(&e))?;

    let token = core.ws_tokens().mint(&service.id);
    Ok(Json(json!({
        "token": token,
        "expires_in": core.ws_tokens().ttl().as_secs(),
    })))
}
