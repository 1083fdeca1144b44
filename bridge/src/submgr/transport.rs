//! Upstream transport selection per event type.

use crate::config::BridgeConfig;
use crate::errors::BridgeError;
use crate::events;
use crate::types::UpstreamTransport;

/// Pick the upstream transport for an event type under the current
/// deployment configuration.
pub fn select(config: &BridgeConfig, event_type: &str) -> Result<UpstreamTransport, BridgeError> {
    let info = events::lookup(event_type)
        .ok_or_else(|| BridgeError::UnknownEventType(event_type.to_string()))?;

    if info.webhook_only {
        return if config.webhook_upstream_available() {
            Ok(UpstreamTransport::Webhook)
        } else {
            Err(BridgeError::UnsupportedUpstream(event_type.to_string()))
        };
    }
    if config.webhook_upstream_available() && info.webhook_capable {
        return Ok(UpstreamTransport::Webhook);
    }
    if info.ws_capable {
        return Ok(UpstreamTransport::Ws);
    }
    Err(BridgeError::UnsupportedUpstream(event_type.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(webhook: bool) -> BridgeConfig {
        BridgeConfig {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            eventsub_ws_url: "wss://example".into(),
            webhook_callback_url: webhook.then(|| "https://bridge.example/cb".into()),
            webhook_secret: webhook.then(|| "0123456789abc".into()),
            service_signing_secret: None,
            server_port: 8900,
            db_path: ":memory:".into(),
        }
    }

    #[test]
    fn ws_when_no_callback_configured() {
        assert_eq!(
            select(&config(false), "channel.chat.message").unwrap(),
            UpstreamTransport::Ws
        );
    }

    #[test]
    fn webhook_preferred_when_configured() {
        assert_eq!(
            select(&config(true), "channel.chat.message").unwrap(),
            UpstreamTransport::Webhook
        );
    }

    #[test]
    fn webhook_only_types_need_callback() {
        assert_eq!(
            select(&config(true), "user.authorization.revoke").unwrap(),
            UpstreamTransport::Webhook
        );
        assert!(matches!(
            select(&config(false), "user.authorization.revoke"),
            Err(BridgeError::UnsupportedUpstream(_))
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(matches!(
            select(&config(true), "channel.made_up"),
            Err(BridgeError::UnknownEventType(_))
        ));
    }
}
