//! Twitch Helix REST API client.
//!
//! Provides typed access to the Helix endpoints the bridge uses
//! (users, streams, EventSub subscription management) with automatic
//! Bearer token + Client-ID header injection.

mod eventsub_api;
mod request;
mod streams;
mod users;

pub mod models;

pub use eventsub_api::{CreateErrorKind, CreateSubscriptionRequest, SubscriptionTransport};
pub use models::{
    EventSubSubscription, HelixPaginatedResponse, HelixPagination, HelixResponse, StreamInfo,
    TwitchUser,
};

use std::time::Duration;

use crate::{Token, TwitchError};

const HELIX_BASE: &str = "https://api.twitch.tv/helix";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Twitch Helix API client with automatic auth header injection.
pub struct TwitchApiClient {
    pub(super) http: reqwest::Client,
    pub(super) client_id: String,
}
