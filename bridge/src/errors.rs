//! Closed error taxonomy surfaced by the bridge core.
//!
//! HTTP status mapping lives with the server layer; core code matches on
//! the variants themselves.

use bridge_db::DbError;
use twitch_client::TwitchError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // Validation
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Broadcaster could not be resolved: {0}")]
    InvalidBroadcaster(String),

    #[error("webhook_url is required for webhook transport")]
    WebhookUrlRequired,

    // Auth
    #[error("Invalid service credentials")]
    InvalidServiceCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Expired token")]
    ExpiredToken,

    #[error("Token already used")]
    AlreadyUsed,

    #[error("Bot account not accessible: {0}")]
    BotNotAccessible(String),

    // Upstream permission
    #[error("Bot is missing a required scope for {0}")]
    MissingScope(String),

    #[error("Insufficient permissions for {0}")]
    InsufficientPermissions(String),

    // Upstream terminal
    #[error("Upstream rejected credentials")]
    Unauthorized,

    #[error("Upstream subscription creation failed: {0}")]
    SubscriptionCreateFailed(String),

    #[error("No upstream transport supports event type {0}")]
    UnsupportedUpstream(String),

    // Webhook ingress
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Webhook timestamp outside freshness window")]
    StaleTimestamp,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Twitch error: {0}")]
    Twitch(#[from] TwitchError),
}

impl BridgeError {
    /// Suggested HTTP status for the gateway layer.
    pub fn http_status(&self) -> u16 {
        match self {
            BridgeError::UnknownEventType(_)
            | BridgeError::InvalidBroadcaster(_)
            | BridgeError::WebhookUrlRequired
            | BridgeError::UnsupportedUpstream(_) => 422,
            BridgeError::InvalidServiceCredentials
            | BridgeError::InvalidToken
            | BridgeError::ExpiredToken
            | BridgeError::AlreadyUsed => 401,
            BridgeError::BotNotAccessible(_)
            | BridgeError::MissingScope(_)
            | BridgeError::InsufficientPermissions(_)
            | BridgeError::InvalidSignature
            | BridgeError::StaleTimestamp => 403,
            BridgeError::NotFound(_) => 404,
            BridgeError::Unauthorized
            | BridgeError::SubscriptionCreateFailed(_) => 502,
            BridgeError::Db(_) | BridgeError::Twitch(_) => 500,
        }
    }
}
