//! Core value types shared across the bridge.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use bridge_db::interests::InterestRow;

use crate::errors::BridgeError;

/// The fan-in dimension: all interests sharing this key share one
/// upstream subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterestKey {
    pub bot_account_id: String,
    pub event_type: String,
    pub broadcaster_user_id: String,
}

impl InterestKey {
    pub fn new(
        bot_account_id: impl Into<String>,
        event_type: impl Into<String>,
        broadcaster_user_id: impl Into<String>,
    ) -> Self {
        Self {
            bot_account_id: bot_account_id.into(),
            event_type: event_type.into(),
            broadcaster_user_id: broadcaster_user_id.into(),
        }
    }

    pub fn of(row: &InterestRow) -> Self {
        Self {
            bot_account_id: row.bot_account_id.clone(),
            event_type: row.event_type.clone(),
            broadcaster_user_id: row.broadcaster_user_id.clone(),
        }
    }
}

impl fmt::Display for InterestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.bot_account_id, self.event_type, self.broadcaster_user_id
        )
    }
}

/// How Twitch delivers to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamTransport {
    Ws,
    Webhook,
}

impl UpstreamTransport {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamTransport::Ws => "ws",
            UpstreamTransport::Webhook => "webhook",
        }
    }
}

/// How the bridge delivers to a downstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownstreamTransport {
    Ws,
    Webhook { url: String },
}

impl DownstreamTransport {
    /// Interpret the persisted `(transport, webhook_url)` pair.
    pub fn of(row: &InterestRow) -> Result<Self, BridgeError> {
        match row.transport.as_str() {
            "ws" => Ok(DownstreamTransport::Ws),
            "webhook" if !row.webhook_url.is_empty() => Ok(DownstreamTransport::Webhook {
                url: row.webhook_url.clone(),
            }),
            "webhook" => Err(BridgeError::WebhookUrlRequired),
            other => Err(BridgeError::NotFound(format!("transport {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DownstreamTransport::Ws => "ws",
            DownstreamTransport::Webhook { .. } => "webhook",
        }
    }
}

/// Per-`InterestKey` mutexes shared by the registry and the subscription
/// manager so `ensure`/`release`/`upsert` on the same key serialize.
#[derive(Default)]
pub struct KeyLocks {
    inner: Mutex<HashMap<InterestKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for a key, created on first use.
    pub fn for_key(&self, key: &InterestKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(transport: &str, url: &str) -> InterestRow {
        InterestRow {
            id: "i1".into(),
            service_id: "svc".into(),
            bot_account_id: "bot".into(),
            event_type: "channel.follow".into(),
            broadcaster_user_id: "123".into(),
            transport: transport.into(),
            webhook_url: url.into(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn downstream_transport_parses_row() {
        assert_eq!(DownstreamTransport::of(&row("ws", "")).unwrap(), DownstreamTransport::Ws);
        assert_eq!(
            DownstreamTransport::of(&row("webhook", "https://svc.example/hook")).unwrap(),
            DownstreamTransport::Webhook {
                url: "https://svc.example/hook".into()
            }
        );
        assert!(matches!(
            DownstreamTransport::of(&row("webhook", "")),
            Err(BridgeError::WebhookUrlRequired)
        ));
    }

    #[test]
    fn key_locks_return_same_lock_for_same_key() {
        let locks = KeyLocks::new();
        let k = InterestKey::new("bot", "channel.follow", "123");
        let a = locks.for_key(&k);
        let b = locks.for_key(&k);
        assert!(Arc::ptr_eq(&a, &b));

        let other = locks.for_key(&InterestKey::new("bot", "channel.follow", "456"));
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
