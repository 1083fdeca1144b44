//! Runtime configuration loaded from the environment.

use std::time::Duration;

use anyhow::{Context, bail};

pub const DEFAULT_EVENTSUB_WS_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

/// How long a seen message id (or throttle key) stays in the dedupe window.
pub const DEDUPE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Interests without a heartbeat for this long are garbage-collected.
pub const STALE_INTEREST_TTL: Duration = Duration::from_secs(60 * 60);

/// Interval of the stale-interest pruning loop.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Throttle window for repeated `subscription.error` envelopes and for the
/// re-ensure cooldown after a terminal creation error.
pub const ERROR_COOLDOWN: Duration = Duration::from_secs(60);

/// Lifetime of a minted WebSocket auth token.
pub const WS_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Outgoing webhook delivery timeout per attempt.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection fan-out send queue depth.
pub const WS_SEND_QUEUE: usize = 256;

/// Total queued webhook delivery jobs across the worker pool.
pub const DELIVERY_QUEUE: usize = 1024;

/// Webhook delivery worker count.
pub const DELIVERY_WORKERS: usize = 32;

/// Maximum attempts for upstream subscription creation and for outgoing
/// webhook delivery.
pub const MAX_ATTEMPTS: u32 = 3;

/// Accepted clock skew for webhook ingress timestamps.
pub const INGRESS_FRESHNESS: Duration = Duration::from_secs(10 * 60);

/// Runtime configuration populated from the environment.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub client_id: String,
    pub client_secret: String,
    pub eventsub_ws_url: String,
    /// When set, webhook upstream transport is available.
    pub webhook_callback_url: Option<String>,
    pub webhook_secret: Option<String>,
    /// HMAC secret for outgoing downstream webhooks.
    pub service_signing_secret: Option<String>,
    pub server_port: u16,
    pub db_path: String,
}

impl BridgeConfig {
    /// Load configuration from the environment (a `.env` file is honored).
    pub fn load() -> Result<Self, anyhow::Error> {
        let _ = dotenvy::dotenv();

        let client_id =
            std::env::var("TWITCH_CLIENT_ID").context("TWITCH_CLIENT_ID is required")?;
        let client_secret =
            std::env::var("TWITCH_CLIENT_SECRET").context("TWITCH_CLIENT_SECRET is required")?;

        let eventsub_ws_url = std::env::var("TWITCH_EVENTSUB_WS_URL")
            .unwrap_or_else(|_| DEFAULT_EVENTSUB_WS_URL.to_string());

        let webhook_callback_url = non_empty(std::env::var("TWITCH_EVENTSUB_WEBHOOK_CALLBACK_URL").ok());
        let webhook_secret = non_empty(std::env::var("TWITCH_EVENTSUB_WEBHOOK_SECRET").ok());
        let service_signing_secret = non_empty(std::env::var("SERVICE_SIGNING_SECRET").ok());

        if let Some(secret) = &webhook_secret {
            if !(10..=100).contains(&secret.len()) || !secret.is_ascii() {
                bail!("TWITCH_EVENTSUB_WEBHOOK_SECRET must be 10-100 ASCII characters");
            }
        }
        if webhook_callback_url.is_some() && webhook_secret.is_none() {
            bail!("TWITCH_EVENTSUB_WEBHOOK_CALLBACK_URL requires TWITCH_EVENTSUB_WEBHOOK_SECRET");
        }

        let server_port = parse_u16(&std::env::var("BRIDGE_SERVER_PORT").unwrap_or_default(), 8900);
        let db_path =
            std::env::var("BRIDGE_DB_PATH").unwrap_or_else(|_| "bridge.db".to_string());

        Ok(Self {
            client_id,
            client_secret,
            eventsub_ws_url,
            webhook_callback_url,
            webhook_secret,
            service_signing_secret,
            server_port,
            db_path,
        })
    }

    /// Whether webhook upstream transport can be used by this deployment.
    pub fn webhook_upstream_available(&self) -> bool {
        self.webhook_callback_url.is_some() && self.webhook_secret.is_some()
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn parse_u16(s: &str, default: u16) -> u16 {
    if s.is_empty() {
        return default;
    }
    s.parse().unwrap_or(default)
}
