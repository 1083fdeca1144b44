//! EventSub subscription management over Helix.

use serde::Serialize;

use super::*;

const SUBSCRIPTIONS_URL: &str = "https://api.twitch.tv/helix/eventsub/subscriptions";

/// Transport descriptor for subscription creation.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionTransport {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl SubscriptionTransport {
    pub fn webhook(callback: String, secret: String) -> Self {
        Self {
            method: "webhook".into(),
            callback: Some(callback),
            secret: Some(secret),
            session_id: None,
        }
    }

    pub fn websocket(session_id: String) -> Self {
        Self {
            method: "websocket".into(),
            callback: None,
            secret: None,
            session_id: Some(session_id),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateSubscriptionRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: String,
    pub condition: serde_json::Value,
    pub transport: SubscriptionTransport,
}

/// How a failed subscription creation should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateErrorKind {
    InsufficientPermissions,
    MissingScope,
    Unauthorized,
    Transient,
    CreateFailed,
}

impl CreateErrorKind {
    /// Classify a creation error into the bridge's retry policy buckets.
    pub fn classify(error: &TwitchError) -> Self {
        match error {
            TwitchError::ApiError { status: 401, .. } => CreateErrorKind::Unauthorized,
            TwitchError::ApiError {
                status: 403,
                message,
            } => {
                if message.contains("scope") {
                    CreateErrorKind::MissingScope
                } else {
                    CreateErrorKind::InsufficientPermissions
                }
            }
            e if e.is_transient() => CreateErrorKind::Transient,
            _ => CreateErrorKind::CreateFailed,
        }
    }

    /// Stable code string used in `subscription.error` envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            CreateErrorKind::InsufficientPermissions => "insufficient_permissions",
            CreateErrorKind::MissingScope => "missing_scope",
            CreateErrorKind::Unauthorized => "unauthorized",
            CreateErrorKind::Transient => "transient",
            CreateErrorKind::CreateFailed => "subscription_create_failed",
        }
    }
}

impl TwitchApiClient {
    /// Create an EventSub subscription. Returns the accepted row.
    pub async fn create_eventsub_subscription(
        &self,
        token: &Token,
        req: &CreateSubscriptionRequest,
    ) -> Result<models::EventSubSubscription, TwitchError> {
        let (_, body) = self
            .authenticated_post(SUBSCRIPTIONS_URL, token, req)
            .await?;
        let resp: HelixResponse<models::EventSubSubscription> = serde_json::from_str(&body)?;
        resp.data
            .into_iter()
            .next()
            .ok_or_else(|| TwitchError::EventSub("create returned no subscription".into()))
    }

    /// List all EventSub subscriptions for this client id, following
    /// pagination cursors.
    pub async fn list_eventsub_subscriptions(
        &self,
        token: &Token,
    ) -> Result<Vec<models::EventSubSubscription>, TwitchError> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let url = match &cursor {
                Some(c) => format!("{SUBSCRIPTIONS_URL}?after={c}"),
                None => SUBSCRIPTIONS_URL.to_string(),
            };
            let body = self.authenticated_get(&url, token).await?;
            let resp: HelixPaginatedResponse<models::EventSubSubscription> =
                serde_json::from_str(&body)?;
            all.extend(resp.data);

            match resp.pagination.cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(all)
    }

    /// Delete an EventSub subscription by id. A 404 is treated as success:
    /// the subscription is gone either way.
    pub async fn delete_eventsub_subscription(
        &self,
        token: &Token,
        subscription_id: &str,
    ) -> Result<(), TwitchError> {
        let url = format!("{SUBSCRIPTIONS_URL}?id={subscription_id}");
        match self.authenticated_delete(&url, token).await {
            Ok(()) => Ok(()),
            Err(TwitchError::ApiError { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_permission_errors() {
        let e = TwitchError::ApiError {
            status: 403,
            message: "subscription missing proper authorization".into(),
        };
        assert_eq!(
            CreateErrorKind::classify(&e),
            CreateErrorKind::InsufficientPermissions
        );

        let e = TwitchError::ApiError {
            status: 403,
            message: "missing scope: channel:read:subscriptions".into(),
        };
        assert_eq!(CreateErrorKind::classify(&e), CreateErrorKind::MissingScope);
    }

    #[test]
    fn classify_retryable_errors() {
        for status in [429u16, 500, 503] {
            let e = TwitchError::ApiError {
                status,
                message: String::new(),
            };
            assert_eq!(CreateErrorKind::classify(&e), CreateErrorKind::Transient);
        }
        assert_eq!(
            CreateErrorKind::classify(&TwitchError::Timeout),
            CreateErrorKind::Transient
        );
    }

    #[test]
    fn classify_terminal_errors() {
        let e = TwitchError::ApiError {
            status: 401,
            message: "invalid token".into(),
        };
        assert_eq!(CreateErrorKind::classify(&e), CreateErrorKind::Unauthorized);

        let e = TwitchError::ApiError {
            status: 400,
            message: "bad condition".into(),
        };
        assert_eq!(CreateErrorKind::classify(&e), CreateErrorKind::CreateFailed);
    }

    #[test]
    fn transport_serializes_without_empty_fields() {
        let t = SubscriptionTransport::websocket("sess1".into());
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["method"], "websocket");
        assert_eq!(json["session_id"], "sess1");
        assert!(json.get("callback").is_none());
        assert!(json.get("secret").is_none());
    }
}
