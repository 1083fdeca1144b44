//! Upstream Twitch webhook ingress.
//!
//! Fixed endpoint (`/webhooks/twitch/eventsub`): HMAC verification over the
//! raw body, timestamp freshness, message-id dedupe, then dispatch by
//! message type. Any configured IP allowlist does not apply here; Twitch's
//! edge addresses are not enumerable.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::app::Core;
use crate::config::INGRESS_FRESHNESS;
use crate::dedupe::Seen;
use crate::errors::BridgeError;
use crate::submgr::RoutedNotification;
use crate::types::UpstreamTransport;

type HmacSha256 = Hmac<Sha256>;

const HEADER_MESSAGE_ID: &str = "twitch-eventsub-message-id";
const HEADER_TIMESTAMP: &str = "twitch-eventsub-message-timestamp";
const HEADER_SIGNATURE: &str = "twitch-eventsub-message-signature";
const HEADER_MESSAGE_TYPE: &str = "twitch-eventsub-message-type";

const SIGNATURE_PREFIX: &str = "sha256=";

/// POST /webhooks/twitch/eventsub
pub async fn ingress_handler(
    State(core): State<Core>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = core.config().webhook_secret.clone() else {
        tracing::warn!("Webhook ingress hit without a configured secret");
        return StatusCode::FORBIDDEN.into_response();
    };

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let message_id = header(HEADER_MESSAGE_ID);
    let timestamp = header(HEADER_TIMESTAMP);
    let signature = header(HEADER_SIGNATURE);
    let message_type = header(HEADER_MESSAGE_TYPE);

    if let Err(e) = verify_signature(&secret, &message_id, &timestamp, &body, &signature) {
        tracing::warn!(message_id, "Webhook signature rejected");
        return (StatusCode::FORBIDDEN, e.to_string()).into_response();
    }
    if let Err(e) = verify_freshness(&timestamp, Utc::now()) {
        tracing::warn!(message_id, timestamp, "Webhook timestamp rejected");
        return (StatusCode::FORBIDDEN, e.to_string()).into_response();
    }

    // Dedupe only after the message is authenticated; a forged id must not
    // be able to shadow a real delivery.
    if core.seen_message(&message_id) == Seen::Duplicate {
        tracing::debug!(message_id, "Duplicate webhook message acknowledged");
        return StatusCode::NO_CONTENT.into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(message_id, error = %e, "Webhook body is not valid JSON");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match message_type.as_str() {
        "webhook_callback_verification" => {
            let challenge = payload
                .get("challenge")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            if let Some(sub_id) = payload
                .get("subscription")
                .and_then(|s| s.get("id"))
                .and_then(|v| v.as_str())
            {
                core.manager().on_webhook_verified(sub_id);
                tracing::info!(subscription_id = sub_id, "Webhook subscription verified");
            }
            (
                StatusCode::OK,
                [("content-type", "text/plain")],
                challenge,
            )
                .into_response()
        }
        "notification" => {
            let subscription = payload.get("subscription");
            let get = |field: &str| {
                subscription
                    .and_then(|s| s.get(field))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            let notification = RoutedNotification {
                message_id,
                message_timestamp: timestamp,
                subscription_id: get("id"),
                event_type: get("type"),
                event: payload
                    .get("event")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
                upstream_transport: UpstreamTransport::Webhook,
            };
            if let Err(e) = core.manager().route(notification).await {
                tracing::warn!(error = %e, "Webhook notification routing failed");
            }
            StatusCode::NO_CONTENT.into_response()
        }
        "revocation" => {
            let sub_id = payload
                .get("subscription")
                .and_then(|s| s.get("id"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let status = payload
                .get("subscription")
                .and_then(|s| s.get("status"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            core.manager().on_revocation(sub_id, status).await;
            StatusCode::NO_CONTENT.into_response()
        }
        other => {
            tracing::debug!(message_type = other, "Unhandled webhook message type");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Constant-time HMAC check over `message_id || timestamp || raw_body`.
fn verify_signature(
    secret: &str,
    message_id: &str,
    timestamp: &str,
    body: &[u8],
    signature_header: &str,
) -> Result<(), BridgeError> {
    let hex_sig = signature_header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(BridgeError::InvalidSignature)?;
    let expected = hex::decode(hex_sig).map_err(|_| BridgeError::InvalidSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| BridgeError::InvalidSignature)?;
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| BridgeError::InvalidSignature)
}

fn verify_freshness(timestamp: &str, now: DateTime<Utc>) -> Result<(), BridgeError> {
    let ts = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| BridgeError::StaleTimestamp)?
        .with_timezone(&Utc);
    let skew = (now - ts).num_seconds().unsigned_abs();
    if skew > INGRESS_FRESHNESS.as_secs() {
        return Err(BridgeError::StaleTimestamp);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const SECRET: &str = "0123456789secret";

    fn sign(message_id: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(message_id.as_bytes());
        mac.update(timestamp.as_bytes());
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_passes() {
        let body = br#"{"event":{}}"#;
        let sig = sign("m1", "2025-06-01T12:00:00Z", body);
        verify_signature(SECRET, "m1", "2025-06-01T12:00:00Z", body, &sig).unwrap();
    }

    #[test]
    fn any_flipped_bit_rejects() {
        let body = br#"{"event":{}}"#.to_vec();
        let sig = sign("m1", "2025-06-01T12:00:00Z", &body);

        // Flipped body byte.
        let mut tampered = body.clone();
        tampered[3] ^= 0x01;
        assert!(
            verify_signature(SECRET, "m1", "2025-06-01T12:00:00Z", &tampered, &sig).is_err()
        );

        // Flipped message id.
        assert!(verify_signature(SECRET, "m2", "2025-06-01T12:00:00Z", &body, &sig).is_err());

        // Flipped timestamp.
        assert!(verify_signature(SECRET, "m1", "2025-06-01T12:00:01Z", &body, &sig).is_err());

        // Flipped signature byte.
        let mut bad_sig = sig.clone().into_bytes();
        let last = bad_sig.len() - 1;
        bad_sig[last] = if bad_sig[last] == b'0' { b'1' } else { b'0' };
        assert!(
            verify_signature(
                SECRET,
                "m1",
                "2025-06-01T12:00:00Z",
                &body,
                &String::from_utf8(bad_sig).unwrap()
            )
            .is_err()
        );
    }

    #[test]
    fn signature_without_prefix_rejects() {
        assert!(matches!(
            verify_signature(SECRET, "m1", "t", b"{}", "deadbeef"),
            Err(BridgeError::InvalidSignature)
        ));
    }

    #[test]
    fn freshness_window_is_ten_minutes() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        verify_freshness("2025-06-01T11:51:00Z", now).unwrap();
        verify_freshness("2025-06-01T12:09:00Z", now).unwrap();
        assert!(matches!(
            verify_freshness("2025-06-01T11:49:59Z", now),
            Err(BridgeError::StaleTimestamp)
        ));
        assert!(matches!(
            verify_freshness("2025-06-01T12:10:01Z", now),
            Err(BridgeError::StaleTimestamp)
        ));
        assert!(matches!(
            verify_freshness("not-a-timestamp", now),
            Err(BridgeError::StaleTimestamp)
        ));
    }
}
