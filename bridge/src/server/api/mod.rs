//! REST API handlers for the service-facing surface.

pub mod interests;
pub mod status;
pub mod tokens;

use axum::Json;
use axum::http::HeaderMap;
use bridge_db::accounts::ServiceAccount;
use serde_json::{Value, json};

use crate::app::Core;
use crate::errors::BridgeError;

pub type ApiResult = Result<Json<Value>, (axum::http::StatusCode, Json<Value>)>;

/// Standard error response.
pub fn err_json(status: u16, message: &str) -> (axum::http::StatusCode, Json<Value>) {
    (
        axum::http::StatusCode::from_u16(status)
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR),
        Json(json!({ "status": "error", "error": message })),
    )
}

/// Map a core error to the gateway response.
pub fn bridge_err(e: &BridgeError) -> (axum::http::StatusCode, Json<Value>) {
    err_json(e.http_status(), &e.to_string())
}

/// Authenticate the calling service from `X-Service-Id`/`X-Service-Secret`.
pub fn authenticate(core: &Core, headers: &HeaderMap) -> Result<ServiceAccount, BridgeError> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let service_id = get("x-service-id");
    let secret = get("x-service-secret");
    if service_id.is_empty() || secret.is_empty() {
        return Err(BridgeError::InvalidServiceCredentials);
    }
    core.verify_service(&service_id, &secret)
}
