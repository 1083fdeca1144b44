use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;

use super::{api, eventsub_webhook, websocket};
use crate::app::Core;

/// Create the axum router with all routes.
pub fn create_router(core: Core) -> Router {
    Router::new()
        // --- Core ---
        .route("/status", get(api::status::status_handler))
        .route("/ws/events", get(websocket::ws_handler))
        // --- Interests ---
        .route("/v1/interests", post(api::interests::create_interest))
        .route("/v1/interests/{id}", delete(api::interests::delete_interest))
        .route(
            "/v1/interests/{id}/heartbeat",
            post(api::interests::heartbeat),
        )
        // --- WS auth tokens ---
        .route("/v1/ws-token", post(api::tokens::mint_ws_token))
        // --- Upstream Twitch ingress ---
        .route(
            "/webhooks/twitch/eventsub",
            post(eventsub_webhook::ingress_handler),
        )
        // --- Middleware ---
        .layer(CorsLayer::permissive())
        .with_state(core)
}
