//! Chat asset (badge + emote) lookup for envelope enrichment.
//!
//! Fetches broadcaster badges and emotes from the Helix API. Lookups are
//! best-effort: a failed fetch yields whatever half was available.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Token, TwitchError};

const HELIX_BASE: &str = "https://api.twitch.tv/helix";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A badge set (e.g. `subscriber`) with its versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeSet {
    pub set_id: String,
    pub versions: Vec<BadgeVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeVersion {
    pub id: String,
    pub image_url_1x: String,
    pub image_url_2x: String,
    pub image_url_4x: String,
    #[serde(default)]
    pub title: String,
}

/// A single Twitch emote with image URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emote {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub images: EmoteImages,
    #[serde(default)]
    pub emote_type: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub format: Vec<String>,
    #[serde(default)]
    pub scale: Vec<String>,
}

/// Image URLs at different scales.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmoteImages {
    pub url_1x: String,
    pub url_2x: String,
    pub url_4x: String,
}

/// Badges and emotes for one broadcaster, attached to chat envelopes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatAssets {
    pub badges: Vec<BadgeSet>,
    pub emotes: Vec<Emote>,
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: Vec<T>,
}

/// Fetches chat assets over Helix.
pub struct ChatAssetClient {
    client_id: String,
    http: reqwest::Client,
}

impl ChatAssetClient {
    pub fn new(client_id: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client_id, http }
    }

    /// Fetch badges and emotes for a broadcaster. Each half is fetched
    /// independently; partial results are returned rather than an error.
    pub async fn fetch(&self, token: &Token, broadcaster_id: &str) -> ChatAssets {
        let mut assets = ChatAssets::default();

        match self.get_channel_badges(token, broadcaster_id).await {
            Ok(badges) => assets.badges = badges,
            Err(e) => {
                tracing::warn!(error = %e, broadcaster_id, "Failed to fetch channel badges");
            }
        }

        match self.get_channel_emotes(token, broadcaster_id).await {
            Ok(emotes) => assets.emotes = emotes,
            Err(e) => {
                tracing::warn!(error = %e, broadcaster_id, "Failed to fetch channel emotes");
            }
        }

        assets
    }

    async fn get_channel_badges(
        &self,
        token: &Token,
        broadcaster_id: &str,
    ) -> Result<Vec<BadgeSet>, TwitchError> {
        let url = format!("{HELIX_BASE}/chat/badges?broadcaster_id={broadcaster_id}");
        let resp: DataResponse<BadgeSet> = self.get_json(&url, token).await?;
        Ok(resp.data)
    }

    async fn get_channel_emotes(
        &self,
        token: &Token,
        broadcaster_id: &str,
    ) -> Result<Vec<Emote>, TwitchError> {
        let url = format!("{HELIX_BASE}/chat/emotes?broadcaster_id={broadcaster_id}");
        let resp: DataResponse<Emote> = self.get_json(&url, token).await?;
        Ok(resp.data)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        token: &Token,
    ) -> Result<T, TwitchError> {
        let resp = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", token.access_token))
            .header("Client-Id", &self.client_id)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(TwitchError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}
