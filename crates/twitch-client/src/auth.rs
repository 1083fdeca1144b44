//! OAuth token management for Twitch authentication.
//!
//! Handles app access tokens (client credentials), user token refresh,
//! and the refresh-before-expiry margin logic.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{Token, TwitchError};

const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Refresh a token this long before it actually expires.
const REFRESH_MARGIN_SECS: i64 = 30 * 60;

/// Twitch OAuth token response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<Vec<String>>,
}

/// Twitch OAuth error response.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

/// Manages Twitch OAuth tokens for the bridge.
///
/// Callers persist refreshed user tokens themselves; the cached app token
/// lives only in memory.
pub struct TwitchAuth {
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
    app_token: Arc<Mutex<Option<Token>>>,
}

impl TwitchAuth {
    pub fn new(client_id: String, client_secret: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client_id,
            client_secret,
            http,
            app_token: Arc::new(Mutex::new(None)),
        }
    }

    /// Get a valid app access token, requesting a new one via the
    /// client-credentials grant when the cached one is absent or expiring.
    pub async fn get_app_token(&self) -> Result<Token, TwitchError> {
        let mut cached = self.app_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now().timestamp() < token.expires_at - REFRESH_MARGIN_SECS {
                return Ok(token.clone());
            }
        }

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ];
        let resp = self.http.post(TOKEN_URL).form(&params).send().await?;
        let token = self.parse_token_response(resp).await?;
        tracing::info!(expires_at = token.expires_at, "App access token acquired");
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Refresh an expired user token using its refresh token.
    pub async fn refresh_user_token(&self, refresh_token: &str) -> Result<Token, TwitchError> {
        tracing::info!("Refreshing Twitch user OAuth token");

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let resp = self.http.post(TOKEN_URL).form(&params).send().await?;
        self.parse_token_response(resp).await
    }

    /// Get a valid user token, auto-refreshing if it expires within 30 minutes.
    ///
    /// Returns `Ok(None)` if no refresh was needed. Returns `Ok(Some(token))`
    /// with the refreshed token; the caller should persist it.
    pub async fn get_or_refresh_token(
        &self,
        current: &Token,
    ) -> Result<Option<Token>, TwitchError> {
        let now = Utc::now().timestamp();
        if now < current.expires_at - REFRESH_MARGIN_SECS {
            return Ok(None);
        }

        if current.refresh_token.is_empty() {
            return Err(TwitchError::AuthRequired);
        }

        tracing::info!(
            expires_in_secs = current.expires_at - now,
            "User token expiring soon, refreshing"
        );

        let new_token = self.refresh_user_token(&current.refresh_token).await?;
        Ok(Some(new_token))
    }

    async fn parse_token_response(&self, resp: reqwest::Response) -> Result<Token, TwitchError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let err: ErrorResponse = serde_json::from_str(&body).unwrap_or(ErrorResponse {
                error: Some(status.to_string()),
                error_description: Some(body.clone()),
            });
            return Err(TwitchError::TokenRefreshFailed(format!(
                "{}: {}",
                err.error.unwrap_or_default(),
                err.error_description.unwrap_or_default()
            )));
        }

        let token_resp: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            TwitchError::TokenRefreshFailed(format!("failed to parse response: {e}"))
        })?;

        Ok(Token {
            access_token: token_resp.access_token,
            refresh_token: token_resp.refresh_token.unwrap_or_default(),
            scope: token_resp.scope.map(|s| s.join(" ")).unwrap_or_default(),
            expires_at: Utc::now().timestamp() + token_resp.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_refresh_still_valid() {
        let auth = TwitchAuth::new("id".into(), "secret".into());
        let token = Token {
            access_token: "abc".into(),
            refresh_token: "def".into(),
            scope: "read".into(),
            expires_at: Utc::now().timestamp() + 7200, // 2 hours from now
        };

        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(auth.get_or_refresh_token(&token)).unwrap();
        assert!(result.is_none(), "Should not refresh a valid token");
    }

    #[test]
    fn test_expired_token_without_refresh_token() {
        let auth = TwitchAuth::new("id".into(), "secret".into());
        let token = Token::bearer_only("abc".into(), Utc::now().timestamp() - 10);

        let rt = tokio::runtime::Runtime::new().unwrap();
        match rt.block_on(auth.get_or_refresh_token(&token)) {
            Err(TwitchError::AuthRequired) => {}
            other => panic!("expected AuthRequired, got {other:?}"),
        }
    }
}
