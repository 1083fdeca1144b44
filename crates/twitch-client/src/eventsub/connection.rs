use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;

use super::*;

#[derive(Debug, Deserialize)]
struct WsMessage {
    metadata: WsMetadata,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WsMetadata {
    message_type: String,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    message_timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WelcomePayload {
    session: SessionInfo,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    id: String,
    #[serde(default)]
    keepalive_timeout_seconds: Option<u64>,
}

enum MessageAction {
    Continue,
    Reconnect(String),
}

impl EventSubSession {
    pub(super) async fn connect_once(
        ws_url: &str,
        event_tx: &mpsc::Sender<SessionEvent>,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> Result<ConnectOutcome, TwitchError> {
        use tokio_tungstenite::tungstenite::Message as Msg;

        tracing::info!(ws_url = %ws_url, "Connecting to EventSub WebSocket");
        let (mut ws, _) = connect_async(ws_url).await?;
        let (session_id, keepalive) = Self::wait_for_welcome(&mut ws).await?;
        if event_tx
            .send(SessionEvent::Welcome {
                session_id: session_id.clone(),
            })
            .await
            .is_err()
        {
            let _ = ws.close(None).await;
            return Ok(ConnectOutcome::Shutdown);
        }

        // Idle beyond 1.5x the advertised keepalive means the session is gone.
        let watchdog = keepalive + keepalive / 2;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("EventSub shutdown during listen");
                    let _ = ws.close(None).await;
                    return Ok(ConnectOutcome::Shutdown);
                }
                result = tokio::time::timeout(watchdog, ws.next()) => {
                    match result {
                        Ok(Some(Ok(Msg::Text(text)))) => {
                            match Self::handle_message(&text, event_tx).await? {
                                MessageAction::Continue => {}
                                MessageAction::Reconnect(next_url) => {
                                    tracing::info!(next_url = %next_url, "EventSub session_reconnect received");
                                    let _ = ws.close(None).await;
                                    return Ok(ConnectOutcome::Reconnect(next_url));
                                }
                            }
                        }
                        Ok(Some(Ok(Msg::Ping(data)))) => {
                            let _ = ws.send(Msg::Pong(data)).await;
                        }
                        Ok(Some(Ok(Msg::Close(_)))) | Ok(None) => {
                            tracing::warn!("EventSub WebSocket closed by server");
                            return Ok(ConnectOutcome::Dropped { welcomed: true });
                        }
                        Ok(Some(Err(e))) => {
                            tracing::warn!(error = %e, "EventSub WebSocket read error");
                            return Ok(ConnectOutcome::Dropped { welcomed: true });
                        }
                        Ok(Some(Ok(_))) => {}
                        Err(_) => {
                            tracing::warn!("EventSub keepalive watchdog expired");
                            return Ok(ConnectOutcome::Dropped { welcomed: true });
                        }
                    }
                }
            }
        }
    }

    async fn wait_for_welcome(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Result<(String, Duration), TwitchError> {
        use tokio_tungstenite::tungstenite::Message as Msg;
        loop {
            match tokio::time::timeout(DEFAULT_KEEPALIVE, ws.next()).await {
                Ok(Some(Ok(Msg::Text(text)))) => {
                    let ws_msg: WsMessage = serde_json::from_str(&text)?;
                    if ws_msg.metadata.message_type == "session_welcome" {
                        let p: WelcomePayload = serde_json::from_value(ws_msg.payload)?;
                        let keepalive = p
                            .session
                            .keepalive_timeout_seconds
                            .map(Duration::from_secs)
                            .unwrap_or(DEFAULT_KEEPALIVE);
                        tracing::info!(session_id = %p.session.id, "EventSub welcome");
                        return Ok((p.session.id, keepalive));
                    }
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => return Err(TwitchError::WebSocket(e)),
                Ok(None) => return Err(TwitchError::EventSub("Connection closed".into())),
                Err(_) => return Err(TwitchError::Timeout),
            }
        }
    }

    async fn handle_message(
        text: &str,
        event_tx: &mpsc::Sender<SessionEvent>,
    ) -> Result<MessageAction, TwitchError> {
        let ws_msg: WsMessage = serde_json::from_str(text)?;
        match ws_msg.metadata.message_type.as_str() {
            "session_keepalive" => {
                tracing::trace!("EventSub keepalive received");
                Ok(MessageAction::Continue)
            }
            "notification" => {
                if let Some(frame) = Self::parse_notification(&ws_msg) {
                    tracing::debug!(
                        event_type = %frame.event_type,
                        message_id = %frame.message_id,
                        "EventSub notification"
                    );
                    let _ = event_tx.send(SessionEvent::Notification(frame)).await;
                }
                Ok(MessageAction::Continue)
            }
            "session_reconnect" => {
                if let Some(next_url) = Self::parse_reconnect_url(&ws_msg.payload) {
                    Ok(MessageAction::Reconnect(next_url))
                } else {
                    Err(TwitchError::EventSub(
                        "session_reconnect missing reconnect_url".into(),
                    ))
                }
            }
            "revocation" => {
                let sub = ws_msg.payload.get("subscription");
                let get = |field: &str| {
                    sub.and_then(|s| s.get(field))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                let subscription_id = get("id");
                let event_type = get("type");
                let status = get("status");
                tracing::warn!(%subscription_id, %event_type, %status, "EventSub subscription revoked");
                let _ = event_tx
                    .send(SessionEvent::Revocation {
                        subscription_id,
                        event_type,
                        status,
                    })
                    .await;
                Ok(MessageAction::Continue)
            }
            other => {
                tracing::debug!(msg_type = other, "Unhandled EventSub message");
                Ok(MessageAction::Continue)
            }
        }
    }

    pub(super) fn parse_notification(msg: &WsMessage) -> Option<NotificationFrame> {
        let sub = msg.payload.get("subscription")?;
        let subscription_id = sub.get("id")?.as_str()?.to_string();
        let event_type = sub.get("type")?.as_str()?.to_string();
        let event = msg
            .payload
            .get("event")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Some(NotificationFrame {
            message_id: msg.metadata.message_id.clone()?,
            message_timestamp: msg.metadata.message_timestamp.clone().unwrap_or_default(),
            subscription_id,
            event_type,
            event,
        })
    }

    pub(super) fn parse_reconnect_url(payload: &serde_json::Value) -> Option<String> {
        payload
            .get("session")
            .and_then(|session| session.get("reconnect_url"))
            .and_then(|url| url.as_str())
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(ToOwned::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_notification_frame() {
        let text = serde_json::json!({
            "metadata": {
                "message_id": "m1",
                "message_type": "notification",
                "message_timestamp": "2025-06-01T12:00:00.000Z"
            },
            "payload": {
                "subscription": { "id": "sub-1", "type": "channel.chat.message" },
                "event": { "broadcaster_user_id": "12345", "message": { "text": "hi" } }
            }
        })
        .to_string();

        let msg: WsMessage = serde_json::from_str(&text).unwrap();
        let frame = EventSubSession::parse_notification(&msg).unwrap();
        assert_eq!(frame.message_id, "m1");
        assert_eq!(frame.subscription_id, "sub-1");
        assert_eq!(frame.event_type, "channel.chat.message");
        assert_eq!(frame.event["broadcaster_user_id"], "12345");
    }

    #[test]
    fn notification_without_message_id_is_dropped() {
        let text = serde_json::json!({
            "metadata": { "message_type": "notification" },
            "payload": {
                "subscription": { "id": "sub-1", "type": "channel.follow" },
                "event": {}
            }
        })
        .to_string();

        let msg: WsMessage = serde_json::from_str(&text).unwrap();
        assert!(EventSubSession::parse_notification(&msg).is_none());
    }
}
