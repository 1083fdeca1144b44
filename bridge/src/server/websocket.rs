//! Downstream service WebSocket endpoint.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::app::Core;
use crate::errors::BridgeError;

use super::api::err_json;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub ws_token: Option<String>,
    // Legacy: direct credentials in the query string.
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub service_secret: Option<String>,
}

/// GET /ws/events
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(core): State<Core>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    let service_id = match authenticate(&core, &q) {
        Ok(id) => id,
        Err(e) => return err_json(e.http_status(), &e.to_string()).into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, core, service_id))
        .into_response()
}

fn authenticate(core: &Core, q: &WsQuery) -> Result<String, BridgeError> {
    if let Some(token) = &q.ws_token {
        return core.ws_tokens().consume(token);
    }
    if let (Some(id), Some(secret)) = (&q.service_id, &q.service_secret) {
        return Ok(core.verify_service(id, secret)?.id);
    }
    Err(BridgeError::InvalidServiceCredentials)
}

async fn handle_socket(socket: WebSocket, core: Core, service_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let conn = core.fanout().register(&service_id);

    // Send connection confirmation
    let welcome = serde_json::json!({
        "type": "connected",
        "data": { "clientId": conn.id }
    });
    if sender
        .send(Message::Text(welcome.to_string().into()))
        .await
        .is_err()
    {
        core.fanout().unregister(&conn);
        return;
    }

    tracing::info!(service_id, conn_id = %conn.id, "Service WebSocket connected");

    // Drain the fan-out queue into the socket.
    let writer = conn.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = writer.next().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames are keepalive only; anything from the client is
    // discarded until it closes.
    let cid = conn.id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                _ => {}
            }
        }
        tracing::info!(conn_id = %cid, "Service WebSocket disconnected");
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    core.fanout().unregister(&conn);
}
