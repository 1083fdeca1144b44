//! Twitch integration client library.
//!
//! Provides OAuth authentication (app and user tokens), Helix reads,
//! EventSub subscription management, the EventSub WebSocket session,
//! and chat asset (badge/emote) lookup.

pub mod api;
pub mod auth;
pub mod chat_assets;
pub mod eventsub;

use serde::{Deserialize, Serialize};

/// Token data for OAuth authentication.
///
/// The caller is responsible for persisting this (e.g. via bridge-db).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub scope: String,
    pub expires_at: i64,
}

impl Token {
    /// A token carrying only an access token (app tokens have no refresh).
    pub fn bearer_only(access_token: String, expires_at: i64) -> Self {
        Self {
            access_token,
            refresh_token: String::new(),
            scope: String::new(),
            expires_at,
        }
    }
}

/// Unified error type for the twitch-client crate.
#[derive(Debug, thiserror::Error)]
pub enum TwitchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication required: no valid token")]
    AuthRequired,

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Twitch API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("EventSub error: {0}")]
    EventSub(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl TwitchError {
    /// Whether a retry with backoff can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TwitchError::Http(e) => e.is_timeout() || e.is_connect(),
            TwitchError::Timeout => true,
            TwitchError::ApiError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
