//! Response models for the Helix endpoints the bridge consumes.

use serde::{Deserialize, Serialize};

/// Generic Helix `{ "data": [...] }` wrapper.
#[derive(Debug, Deserialize)]
pub struct HelixResponse<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct HelixPaginatedResponse<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: HelixPagination,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub total_cost: Option<u64>,
    #[serde(default)]
    pub max_total_cost: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HelixPagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitchUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default)]
    pub profile_image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    #[serde(rename = "type")]
    pub stream_type: String,
    #[serde(default)]
    pub started_at: String,
}

/// An EventSub subscription as reported by Twitch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubSubscription {
    pub id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: String,
    pub condition: serde_json::Value,
    pub transport: EventSubTransportInfo,
    #[serde(default)]
    pub cost: i64,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubTransportInfo {
    pub method: String,
    #[serde(default)]
    pub callback: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl EventSubSubscription {
    /// The `broadcaster_user_id`-like condition field, when present.
    pub fn condition_broadcaster(&self) -> Option<&str> {
        for field in [
            "broadcaster_user_id",
            "to_broadcaster_user_id",
        ] {
            if let Some(v) = self.condition.get(field).and_then(|v| v.as_str()) {
                return Some(v);
            }
        }
        None
    }
}
