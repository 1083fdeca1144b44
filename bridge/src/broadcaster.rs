//! Broadcaster input resolution.
//!
//! Downstream requests may name a broadcaster by numeric id, Twitch login,
//! or channel URL. Everything is normalized to the numeric user id before
//! persisting, with a small in-memory cache over the Helix lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use twitch_client::TwitchError;
use twitch_client::api::TwitchApiClient;
use twitch_client::auth::TwitchAuth;

use crate::errors::BridgeError;

pub struct BroadcasterResolver {
    api: Arc<TwitchApiClient>,
    auth: Arc<TwitchAuth>,
    /// login -> numeric id
    cache: Mutex<HashMap<String, String>>,
}

impl BroadcasterResolver {
    pub fn new(api: Arc<TwitchApiClient>, auth: Arc<TwitchAuth>) -> Self {
        Self {
            api,
            auth,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a broadcaster input to a numeric Twitch user id.
    pub async fn resolve(&self, input: &str) -> Result<String, BridgeError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(BridgeError::InvalidBroadcaster(input.to_string()));
        }
        if input.chars().all(|c| c.is_ascii_digit()) {
            return Ok(input.to_string());
        }

        let login = Self::extract_login(input)
            .ok_or_else(|| BridgeError::InvalidBroadcaster(input.to_string()))?;

        if let Some(id) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&login)
        {
            return Ok(id.clone());
        }

        let token = self.auth.get_app_token().await?;
        let user = match self.api.get_user_by_login(&token, &login).await {
            Ok(user) => user,
            Err(TwitchError::ApiError { status: 404, .. }) => {
                return Err(BridgeError::InvalidBroadcaster(input.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(login, user.id.clone());
        Ok(user.id)
    }

    /// Extract a login from a raw login or a channel URL.
    fn extract_login(input: &str) -> Option<String> {
        let mut candidate = input;
        for prefix in ["https://", "http://"] {
            if let Some(rest) = candidate.strip_prefix(prefix) {
                candidate = rest;
            }
        }
        for prefix in ["www.twitch.tv/", "twitch.tv/", "m.twitch.tv/"] {
            if let Some(rest) = candidate.strip_prefix(prefix) {
                candidate = rest;
            }
        }
        let login = candidate
            .split(['/', '?'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        let valid = !login.is_empty()
            && login.len() <= 25
            && login
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        valid.then_some(login)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_login_variants() {
        for input in [
            "somestreamer",
            "SomeStreamer",
            "twitch.tv/somestreamer",
            "https://twitch.tv/somestreamer",
            "https://www.twitch.tv/somestreamer",
            "https://www.twitch.tv/somestreamer?tab=videos",
            "https://m.twitch.tv/somestreamer/clips",
        ] {
            assert_eq!(
                BroadcasterResolver::extract_login(input).as_deref(),
                Some("somestreamer"),
                "input: {input}"
            );
        }
    }

    #[test]
    fn extract_login_rejects_garbage() {
        for input in ["", "https://twitch.tv/", "bad name", "name!with#chars"] {
            assert!(
                BroadcasterResolver::extract_login(input).is_none(),
                "input: {input}"
            );
        }
    }
}
