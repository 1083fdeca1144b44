//! The uniform fan-out envelope and its enrichment hook.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use twitch_client::auth::TwitchAuth;
use twitch_client::chat_assets::{ChatAssetClient, ChatAssets};

/// Cached chat assets stay valid this long.
const ASSET_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Build the envelope delivered to downstream services.
pub fn build(message_id: &str, event_type: &str, event_timestamp: &str, event: &Value) -> Value {
    let timestamp = if event_timestamp.is_empty() {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    } else {
        event_timestamp.to_string()
    };
    json!({
        "id": message_id,
        "provider": "twitch",
        "type": event_type,
        "event_timestamp": timestamp,
        "event": event,
    })
}

/// Build a synthetic `subscription.error` envelope.
#[allow(clippy::too_many_arguments)]
pub fn build_subscription_error(
    envelope_id: &str,
    error_code: &str,
    reason: &str,
    hint: &str,
    event_type: &str,
    broadcaster_user_id: &str,
    bot_account_id: &str,
    upstream_transport: &str,
) -> Value {
    build(
        envelope_id,
        "subscription.error",
        "",
        &json!({
            "error_code": error_code,
            "reason": reason,
            "hint": hint,
            "event_type": event_type,
            "broadcaster_user_id": broadcaster_user_id,
            "bot_account_id": bot_account_id,
            "upstream_transport": upstream_transport,
        }),
    )
}

/// Attaches `twitch_chat_assets` to chat envelopes, best-effort.
pub struct Enricher {
    assets: ChatAssetClient,
    auth: Arc<TwitchAuth>,
    cache: Mutex<HashMap<String, (Instant, ChatAssets)>>,
}

impl Enricher {
    pub fn new(client_id: String, auth: Arc<TwitchAuth>) -> Self {
        Self {
            assets: ChatAssetClient::new(client_id),
            auth,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an event type gets chat-asset enrichment.
    pub fn applies_to(event_type: &str) -> bool {
        event_type.starts_with("channel.chat.")
    }

    /// Attach broadcaster chat assets to the envelope. Any failure leaves
    /// the envelope untouched; fan-out never waits on a retry.
    pub async fn enrich(&self, envelope: &mut Value, broadcaster_user_id: &str) {
        let assets = match self.fetch_cached(broadcaster_user_id).await {
            Some(assets) => assets,
            None => return,
        };
        match serde_json::to_value(&assets) {
            Ok(v) => {
                envelope["twitch_chat_assets"] = v;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize chat assets");
            }
        }
    }

    async fn fetch_cached(&self, broadcaster_user_id: &str) -> Option<ChatAssets> {
        {
            let cache = self.cache.lock().await;
            if let Some((fetched_at, assets)) = cache.get(broadcaster_user_id) {
                if fetched_at.elapsed() < ASSET_CACHE_TTL {
                    return Some(assets.clone());
                }
            }
        }

        let token = match self.auth.get_app_token().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "Chat asset enrichment skipped: no app token");
                return None;
            }
        };

        let assets = self.assets.fetch(&token, broadcaster_user_id).await;
        let mut cache = self.cache.lock().await;
        cache.insert(
            broadcaster_user_id.to_string(),
            (Instant::now(), assets.clone()),
        );
        Some(assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let event = json!({ "broadcaster_user_id": "12345", "message": { "text": "hi" } });
        let env = build("m1", "channel.chat.message", "2025-06-01T12:00:00Z", &event);

        assert_eq!(env["id"], "m1");
        assert_eq!(env["provider"], "twitch");
        assert_eq!(env["type"], "channel.chat.message");
        assert_eq!(env["event_timestamp"], "2025-06-01T12:00:00Z");
        assert_eq!(env["event"]["message"]["text"], "hi");
    }

    #[test]
    fn missing_timestamp_is_filled() {
        let env = build("m1", "stream.online", "", &json!({}));
        let ts = env["event_timestamp"].as_str().unwrap();
        assert!(ts.ends_with('Z'), "expected UTC timestamp, got {ts}");
    }

    #[test]
    fn subscription_error_envelope_fields() {
        let env = build_subscription_error(
            "e1",
            "missing_scope",
            "bot lacks user:read:chat",
            "re-authorize the bot account with the required scope",
            "channel.chat.message",
            "12345",
            "bot1",
            "ws",
        );
        assert_eq!(env["type"], "subscription.error");
        assert_eq!(env["event"]["error_code"], "missing_scope");
        assert_eq!(env["event"]["bot_account_id"], "bot1");
        assert_eq!(env["event"]["upstream_transport"], "ws");
    }

    #[test]
    fn enrichment_only_for_chat_types() {
        assert!(Enricher::applies_to("channel.chat.message"));
        assert!(Enricher::applies_to("channel.chat.notification"));
        assert!(!Enricher::applies_to("channel.follow"));
        assert!(!Enricher::applies_to("stream.online"));
    }
}
