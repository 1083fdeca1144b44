//! Subscription manager: reconciles interests against upstream Twitch
//! EventSub subscriptions and routes notifications into the fan-out hub.
//!
//! Per-key state machine: Absent -> Pending -> Enabled, with an
//! ErrorCooldown arc after terminal creation failures. All transitions for
//! one key run under that key's shared lock.

pub mod transport;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bridge_db::Database;
use bridge_db::accounts::BotAccount;
use bridge_db::subscriptions::SubscriptionRow;
use chrono::Utc;
use twitch_client::Token;
use twitch_client::api::{
    CreateErrorKind, CreateSubscriptionRequest, SubscriptionTransport, TwitchApiClient,
};
use twitch_client::auth::TwitchAuth;
use uuid::Uuid;

use crate::config::{BridgeConfig, ERROR_COOLDOWN, MAX_ATTEMPTS};
use crate::dedupe::{DedupeWindow, Seen};
use crate::envelope::{self, Enricher};
use crate::errors::BridgeError;
use crate::events;
use crate::fanout::FanoutHub;
use crate::registry::InterestRegistry;
use crate::types::{DownstreamTransport, InterestKey, KeyLocks, UpstreamTransport};

const CREATE_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// A notification ready for routing, from either upstream transport.
#[derive(Debug, Clone)]
pub struct RoutedNotification {
    pub message_id: String,
    pub message_timestamp: String,
    pub subscription_id: String,
    pub event_type: String,
    pub event: serde_json::Value,
    pub upstream_transport: UpstreamTransport,
}

#[derive(Debug, Clone)]
enum Phase {
    /// Waiting for a WS session to bind to.
    Pending,
    Enabled { subscription_id: String },
    ErrorCooldown { until: Instant, kind: CreateErrorKind },
}

pub struct SubscriptionManager {
    db: Database,
    config: Arc<BridgeConfig>,
    api: Arc<TwitchApiClient>,
    auth: Arc<TwitchAuth>,
    registry: Arc<InterestRegistry>,
    fanout: Arc<FanoutHub>,
    enricher: Enricher,
    locks: Arc<KeyLocks>,
    states: Mutex<HashMap<InterestKey, Phase>>,
    session_id: Mutex<Option<String>>,
    error_throttle: Mutex<DedupeWindow>,
}

impl SubscriptionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        config: Arc<BridgeConfig>,
        api: Arc<TwitchApiClient>,
        auth: Arc<TwitchAuth>,
        registry: Arc<InterestRegistry>,
        fanout: Arc<FanoutHub>,
        enricher: Enricher,
        locks: Arc<KeyLocks>,
    ) -> Self {
        Self {
            db,
            config,
            api,
            auth,
            registry,
            fanout,
            enricher,
            locks,
            states: Mutex::new(HashMap::new()),
            session_id: Mutex::new(None),
            error_throttle: Mutex::new(DedupeWindow::new(ERROR_COOLDOWN, 4096)),
        }
    }

    /// The current upstream WS session id, if connected.
    pub fn current_session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Guarantee exactly one live upstream subscription for the key.
    /// Idempotent; concurrent calls for the same key coalesce on its lock.
    pub async fn ensure(&self, key: &InterestKey) -> Result<(), BridgeError> {
        let lock = self.locks.for_key(key);
        let _guard = lock.lock().await;
        self.ensure_locked(key).await
    }

    async fn ensure_locked(&self, key: &InterestKey) -> Result<(), BridgeError> {
        match self.phase_of(key) {
            Some(Phase::ErrorCooldown { until, kind }) => {
                if Instant::now() < until {
                    return Err(self.cooldown_error(key, kind));
                }
                self.set_phase(key, None);
            }
            Some(Phase::Enabled { subscription_id }) => {
                if self.db.get_subscription(&subscription_id)?.is_some() {
                    return Ok(());
                }
                self.set_phase(key, None);
            }
            Some(Phase::Pending) | None => {}
        }

        let upstream = transport::select(&self.config, &key.event_type)?;

        if let Some(row) = self.db.find_live_subscription(
            &key.bot_account_id,
            &key.event_type,
            &key.broadcaster_user_id,
            upstream.as_str(),
        )? {
            self.set_phase(
                key,
                Some(Phase::Enabled {
                    subscription_id: row.id,
                }),
            );
            return Ok(());
        }

        let bot = self.accessible_bot(key)?;
        if bot.disabled_event_types.iter().any(|t| t == &key.event_type) {
            return Err(self.fail_terminal(
                key,
                upstream,
                CreateErrorKind::MissingScope,
                "bot is disabled for this event type pending re-authorization",
            ));
        }

        let (token, session_id) = match upstream {
            UpstreamTransport::Webhook => (self.auth.get_app_token().await?, None),
            UpstreamTransport::Ws => {
                let Some(session_id) = self.current_session_id() else {
                    // No live session yet. The welcome handler re-ensures
                    // every WS-bound key, so just hold in Pending.
                    self.set_phase(key, Some(Phase::Pending));
                    return Ok(());
                };
                (self.bot_user_token(&bot).await?, Some(session_id))
            }
        };

        let info = events::lookup(&key.event_type)
            .ok_or_else(|| BridgeError::UnknownEventType(key.event_type.clone()))?;
        let request = CreateSubscriptionRequest {
            event_type: key.event_type.clone(),
            version: info.version.to_string(),
            condition: events::condition(
                info,
                &key.broadcaster_user_id,
                &bot.twitch_user_id,
                &self.config.client_id,
            ),
            transport: match upstream {
                UpstreamTransport::Webhook => SubscriptionTransport::webhook(
                    self.config.webhook_callback_url.clone().unwrap_or_default(),
                    self.config.webhook_secret.clone().unwrap_or_default(),
                ),
                UpstreamTransport::Ws => {
                    SubscriptionTransport::websocket(session_id.clone().unwrap_or_default())
                }
            },
        };

        let created = match self.create_with_retry(&token, &request).await {
            Ok(sub) => sub,
            Err(e) => {
                let kind = CreateErrorKind::classify(&e);
                if kind == CreateErrorKind::MissingScope {
                    if let Err(db_err) = self
                        .db
                        .disable_bot_event_type(&key.bot_account_id, &key.event_type)
                    {
                        tracing::warn!(error = %db_err, "Failed to persist scope disable");
                    }
                }
                return Err(self.fail_terminal(key, upstream, kind, &e.to_string()));
            }
        };

        let now = Utc::now().timestamp();
        let row = SubscriptionRow {
            id: created.id.clone(),
            bot_account_id: key.bot_account_id.clone(),
            event_type: key.event_type.clone(),
            broadcaster_user_id: key.broadcaster_user_id.clone(),
            transport: upstream.as_str().to_string(),
            status: map_upstream_status(&created.status),
            session_id,
            cost: created.cost,
            created_at: now,
            updated_at: now,
        };
        match self.db.insert_subscription(&row) {
            Ok(()) => {}
            Err(bridge_db::DbError::Conflict) => {
                // A live row slipped in (e.g. reconcile). Keep one upstream
                // subscription per key: drop the one we just created.
                tracing::warn!(key = %key, "Duplicate live subscription, deleting ours");
                let _ = self
                    .api
                    .delete_eventsub_subscription(&token, &created.id)
                    .await;
                let existing = self.db.find_live_subscription(
                    &key.bot_account_id,
                    &key.event_type,
                    &key.broadcaster_user_id,
                    upstream.as_str(),
                )?;
                if let Some(existing) = existing {
                    self.set_phase(
                        key,
                        Some(Phase::Enabled {
                            subscription_id: existing.id,
                        }),
                    );
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            key = %key,
            subscription_id = %row.id,
            transport = row.transport,
            "Upstream subscription created"
        );
        self.set_phase(
            key,
            Some(Phase::Enabled {
                subscription_id: row.id,
            }),
        );
        Ok(())
    }

    /// Tear down the upstream subscription when no interest remains.
    /// Idempotent.
    pub async fn release(&self, key: &InterestKey) -> Result<(), BridgeError> {
        let lock = self.locks.for_key(key);
        let _guard = lock.lock().await;

        if !self.registry.lookup(key).is_empty() {
            return Ok(());
        }
        self.set_phase(key, None);

        for upstream in [UpstreamTransport::Ws, UpstreamTransport::Webhook] {
            let row = self.db.find_live_subscription(
                &key.bot_account_id,
                &key.event_type,
                &key.broadcaster_user_id,
                upstream.as_str(),
            )?;
            let Some(row) = row else { continue };

            let token = match upstream {
                UpstreamTransport::Webhook => self.auth.get_app_token().await?,
                UpstreamTransport::Ws => match self.db.get_bot_account(&key.bot_account_id)? {
                    Some(bot) => self.bot_user_token(&bot).await?,
                    None => {
                        tracing::warn!(key = %key, "Releasing WS subscription without bot account");
                        self.db
                            .delete_subscriptions_for_key(
                                &key.bot_account_id,
                                &key.event_type,
                                &key.broadcaster_user_id,
                            )?;
                        continue;
                    }
                },
            };
            if let Err(e) = self.api.delete_eventsub_subscription(&token, &row.id).await {
                tracing::warn!(key = %key, error = %e, "Upstream delete failed, dropping record anyway");
            }
        }

        self.db.delete_subscriptions_for_key(
            &key.bot_account_id,
            &key.event_type,
            &key.broadcaster_user_id,
        )?;
        tracing::info!(key = %key, "Released upstream subscription");
        Ok(())
    }

    /// Route one upstream notification to every interested downstream.
    pub async fn route(&self, n: RoutedNotification) -> Result<(), BridgeError> {
        let key = match self.resolve_key(&n)? {
            Some(key) => key,
            None => {
                tracing::warn!(
                    subscription_id = %n.subscription_id,
                    event_type = %n.event_type,
                    "Notification for unknown subscription, dropped"
                );
                return Ok(());
            }
        };

        self.track_channel_state(&key, &n);

        let interests = self.registry.lookup(&key);
        if interests.is_empty() {
            tracing::debug!(key = %key, "Notification matched no interests");
            return Ok(());
        }

        let mut env = envelope::build(&n.message_id, &n.event_type, &n.message_timestamp, &n.event);
        if Enricher::applies_to(&n.event_type) {
            self.enricher
                .enrich(&mut env, &key.broadcaster_user_id)
                .await;
        }
        let frame = env.to_string();

        for interest in &interests {
            match DownstreamTransport::of(interest) {
                Ok(t) => self.fanout.deliver(
                    &interest.service_id,
                    &t,
                    &frame,
                    &n.event_type,
                    &key.broadcaster_user_id,
                ),
                Err(e) => {
                    tracing::warn!(interest_id = %interest.id, error = %e, "Undeliverable interest");
                }
            }
        }
        Ok(())
    }

    /// Fan a synthetic `subscription.error` envelope to every service
    /// interested in the key, throttled per `(service, key, code)`.
    pub fn emit_subscription_error(
        &self,
        key: &InterestKey,
        code: &str,
        reason: &str,
        upstream: UpstreamTransport,
    ) {
        let hint = hint_for(code);
        for interest in self.registry.lookup(key) {
            let throttle_key = format!("{}|{}|{}", interest.service_id, key, code);
            let seen = self
                .error_throttle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .add(&throttle_key);
            if seen == Seen::Duplicate {
                continue;
            }

            let env = envelope::build_subscription_error(
                &Uuid::new_v4().to_string(),
                code,
                reason,
                hint,
                &key.event_type,
                &key.broadcaster_user_id,
                &key.bot_account_id,
                upstream.as_str(),
            );
            match DownstreamTransport::of(&interest) {
                Ok(t) => self.fanout.deliver(
                    &interest.service_id,
                    &t,
                    &env.to_string(),
                    "subscription.error",
                    &key.broadcaster_user_id,
                ),
                Err(e) => {
                    tracing::warn!(interest_id = %interest.id, error = %e, "Undeliverable interest");
                }
            }
        }
    }

    /// Handle a (re)established upstream WS session. All WS-bound rows are
    /// invalidated and re-ensured under the new session id.
    pub async fn on_session_welcome(&self, session_id: &str) {
        {
            let mut current = self.session_id.lock().unwrap_or_else(|e| e.into_inner());
            if current.as_deref() == Some(session_id) {
                return;
            }
            if let Some(old) = current.replace(session_id.to_string()) {
                tracing::info!(old = %old, new = %session_id, "EventSub session rotated");
            } else {
                tracing::info!(session_id, "EventSub session established");
            }
        }

        if let Err(e) = self.db.delete_ws_subscriptions() {
            tracing::warn!(error = %e, "Failed to invalidate WS subscription rows");
        }

        for key in self.registry.keys() {
            if !matches!(
                transport::select(&self.config, &key.event_type),
                Ok(UpstreamTransport::Ws)
            ) {
                continue;
            }
            self.set_phase(&key, None);
            if let Err(e) = self.ensure(&key).await {
                tracing::warn!(key = %key, error = %e, "Re-ensure after session rotation failed");
            }
        }
    }

    /// The upstream session dropped; WS-bound keys go back to Pending so
    /// the next welcome re-creates them. Nothing is deleted upstream.
    pub fn on_session_lost(&self) {
        let mut current = self.session_id.lock().unwrap_or_else(|e| e.into_inner());
        if current.take().is_some() {
            tracing::info!("EventSub session lost, WS subscriptions parked");
        }
    }

    /// Twitch revoked a subscription: record it and re-ensure if interests
    /// remain for the key.
    pub async fn on_revocation(&self, subscription_id: &str, status: &str) {
        let row = match self.db.get_subscription(subscription_id) {
            Ok(Some(row)) => row,
            Ok(None) => {
                tracing::warn!(subscription_id, "Revocation for unknown subscription");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Revocation lookup failed");
                return;
            }
        };

        tracing::warn!(
            subscription_id,
            event_type = %row.event_type,
            status,
            "Upstream subscription revoked"
        );
        if let Err(e) =
            self.db
                .set_subscription_status(subscription_id, "revoked", Utc::now().timestamp())
        {
            tracing::warn!(error = %e, "Failed to mark subscription revoked");
        }

        let key = InterestKey::new(
            row.bot_account_id,
            row.event_type,
            row.broadcaster_user_id,
        );
        self.set_phase(&key, None);

        if !self.registry.lookup(&key).is_empty() {
            if let Err(e) = self.ensure(&key).await {
                tracing::warn!(key = %key, error = %e, "Re-ensure after revocation failed");
            }
        }
    }

    /// A webhook subscription finished callback verification.
    pub fn on_webhook_verified(&self, subscription_id: &str) {
        if let Err(e) =
            self.db
                .set_subscription_status(subscription_id, "enabled", Utc::now().timestamp())
        {
            tracing::warn!(error = %e, "Failed to mark subscription enabled");
        }
    }

    /// Boot-time reconciliation: load interests, adopt matching upstream
    /// rows, delete orphans, create what is missing.
    pub async fn reconcile_startup(&self) -> Result<(), BridgeError> {
        let interests = self.registry.load_from_db()?;
        tracing::info!(interests, "Loaded interests from mirror");

        // WS subscriptions did not survive the restart: the session died
        // with the old process.
        let dropped = self.db.delete_ws_subscriptions()?;
        if dropped > 0 {
            tracing::info!(dropped, "Discarded stale WS subscription rows");
        }

        if self.config.webhook_upstream_available() {
            self.reconcile_webhooks().await?;
        }

        for key in self.registry.keys() {
            if let Err(e) = self.ensure(&key).await {
                tracing::warn!(key = %key, error = %e, "Startup ensure failed");
            }
        }

        self.refresh_channel_liveness().await;
        Ok(())
    }

    async fn reconcile_webhooks(&self) -> Result<(), BridgeError> {
        let token = self.auth.get_app_token().await?;
        let upstream = self.api.list_eventsub_subscriptions(&token).await?;
        let keys = self.registry.keys();
        let now = Utc::now().timestamp();

        let mut confirmed: HashSet<String> = HashSet::new();
        for sub in upstream {
            if sub.transport.method != "webhook" {
                continue;
            }
            if events::PERMANENT_SYSTEM_TYPES.contains(&sub.event_type.as_str()) {
                confirmed.insert(sub.id.clone());
                continue;
            }

            let matched = sub.condition_broadcaster().and_then(|broadcaster| {
                keys.iter().find(|k| {
                    k.event_type == sub.event_type && k.broadcaster_user_id == broadcaster
                })
            });
            match matched {
                Some(key) => {
                    confirmed.insert(sub.id.clone());
                    self.adopt_webhook_row(key, &sub.id, &sub.status, sub.cost, now)?;
                    tracing::info!(key = %key, subscription_id = %sub.id, "Adopted upstream subscription");
                }
                None => {
                    tracing::info!(
                        subscription_id = %sub.id,
                        event_type = %sub.event_type,
                        "Deleting orphaned upstream subscription"
                    );
                    if let Err(e) = self.api.delete_eventsub_subscription(&token, &sub.id).await {
                        tracing::warn!(error = %e, "Orphan delete failed");
                    }
                    let _ = self.db.delete_subscription(&sub.id);
                }
            }
        }

        // Local webhook rows Twitch no longer knows about are dead weight.
        for row in self.db.list_subscriptions()? {
            if row.transport == "webhook" && !confirmed.contains(&row.id) {
                self.db.delete_subscription(&row.id)?;
            }
        }
        Ok(())
    }

    fn adopt_webhook_row(
        &self,
        key: &InterestKey,
        subscription_id: &str,
        status: &str,
        cost: i64,
        now: i64,
    ) -> Result<(), BridgeError> {
        if self.db.get_subscription(subscription_id)?.is_some() {
            self.db
                .set_subscription_status(subscription_id, &map_upstream_status(status), now)?;
        } else {
            // Clear any stale live row first so the partial index accepts
            // the adopted one.
            self.db.delete_subscriptions_for_key(
                &key.bot_account_id,
                &key.event_type,
                &key.broadcaster_user_id,
            )?;
            self.db.insert_subscription(&SubscriptionRow {
                id: subscription_id.to_string(),
                bot_account_id: key.bot_account_id.clone(),
                event_type: key.event_type.clone(),
                broadcaster_user_id: key.broadcaster_user_id.clone(),
                transport: "webhook".into(),
                status: map_upstream_status(status),
                session_id: None,
                cost,
                created_at: now,
                updated_at: now,
            })?;
        }
        self.set_phase(
            key,
            Some(Phase::Enabled {
                subscription_id: subscription_id.to_string(),
            }),
        );
        Ok(())
    }

    /// Refresh cached liveness for every tracked `(bot, broadcaster)`.
    async fn refresh_channel_liveness(&self) {
        let mut pairs: HashSet<(String, String)> = match self.db.list_channel_state_keys() {
            Ok(keys) => keys.into_iter().collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Channel state key listing failed");
                HashSet::new()
            }
        };
        for key in self.registry.keys() {
            pairs.insert((key.bot_account_id, key.broadcaster_user_id));
        }
        if pairs.is_empty() {
            return;
        }

        let broadcasters: Vec<String> = pairs
            .iter()
            .map(|(_, b)| b.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let token = match self.auth.get_app_token().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "Liveness refresh skipped: no app token");
                return;
            }
        };
        let live: HashSet<String> = match self.api.get_streams(&token, &broadcasters).await {
            Ok(streams) => streams.into_iter().map(|s| s.user_id).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Liveness refresh failed");
                return;
            }
        };

        let now = Utc::now().timestamp();
        for (bot, broadcaster) in pairs {
            let is_live = live.contains(&broadcaster);
            if let Err(e) = self
                .db
                .upsert_channel_state(&bot, &broadcaster, is_live, now)
            {
                tracing::warn!(error = %e, "Channel state update failed");
            }
        }
    }

    // -- internals ----------------------------------------------------------

    fn phase_of(&self, key: &InterestKey) -> Option<Phase> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set_phase(&self, key: &InterestKey, phase: Option<Phase>) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        match phase {
            Some(p) => {
                states.insert(key.clone(), p);
            }
            None => {
                states.remove(key);
            }
        }
    }

    fn accessible_bot(&self, key: &InterestKey) -> Result<BotAccount, BridgeError> {
        let bot = self
            .db
            .get_bot_account(&key.bot_account_id)?
            .ok_or_else(|| BridgeError::BotNotAccessible(key.bot_account_id.clone()))?;
        if !bot.enabled {
            return Err(BridgeError::BotNotAccessible(key.bot_account_id.clone()));
        }
        Ok(bot)
    }

    /// The bot's user token, refreshed and persisted when near expiry.
    async fn bot_user_token(&self, bot: &BotAccount) -> Result<Token, BridgeError> {
        let current = Token {
            access_token: bot.access_token.clone(),
            refresh_token: bot.refresh_token.clone(),
            scope: bot.scope.clone(),
            expires_at: bot.expires_at,
        };
        if current.access_token.is_empty() {
            return Err(BridgeError::BotNotAccessible(bot.id.clone()));
        }
        match self.auth.get_or_refresh_token(&current).await? {
            Some(refreshed) => {
                self.db.save_bot_token(
                    &bot.id,
                    &refreshed.access_token,
                    &refreshed.refresh_token,
                    &refreshed.scope,
                    refreshed.expires_at,
                )?;
                Ok(refreshed)
            }
            None => Ok(current),
        }
    }

    async fn create_with_retry(
        &self,
        token: &Token,
        request: &CreateSubscriptionRequest,
    ) -> Result<twitch_client::api::EventSubSubscription, twitch_client::TwitchError> {
        let mut attempt = 1u32;
        loop {
            match self.api.create_eventsub_subscription(token, request).await {
                Ok(sub) => return Ok(sub),
                Err(e) => {
                    let kind = CreateErrorKind::classify(&e);
                    if kind != CreateErrorKind::Transient || attempt >= MAX_ATTEMPTS {
                        return Err(e);
                    }
                    let backoff = CREATE_RETRY_BACKOFF * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        event_type = %request.event_type,
                        attempt,
                        error = %e,
                        "Transient create failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Terminal failure: cool the key down, emit the error envelope, and
    /// hand back the caller-facing error.
    fn fail_terminal(
        &self,
        key: &InterestKey,
        upstream: UpstreamTransport,
        kind: CreateErrorKind,
        reason: &str,
    ) -> BridgeError {
        tracing::warn!(key = %key, code = kind.code(), reason, "Subscription creation failed");
        self.set_phase(
            key,
            Some(Phase::ErrorCooldown {
                until: Instant::now() + ERROR_COOLDOWN,
                kind,
            }),
        );
        self.emit_subscription_error(key, kind.code(), reason, upstream);
        self.cooldown_error(key, kind)
    }

    fn cooldown_error(&self, key: &InterestKey, kind: CreateErrorKind) -> BridgeError {
        match kind {
            CreateErrorKind::MissingScope => BridgeError::MissingScope(key.event_type.clone()),
            CreateErrorKind::InsufficientPermissions => {
                BridgeError::InsufficientPermissions(key.event_type.clone())
            }
            CreateErrorKind::Unauthorized => BridgeError::Unauthorized,
            CreateErrorKind::Transient | CreateErrorKind::CreateFailed => {
                BridgeError::SubscriptionCreateFailed(key.event_type.clone())
            }
        }
    }

    fn resolve_key(&self, n: &RoutedNotification) -> Result<Option<InterestKey>, BridgeError> {
        if let Some(row) = self.db.get_subscription(&n.subscription_id)? {
            return Ok(Some(InterestKey::new(
                row.bot_account_id,
                row.event_type,
                row.broadcaster_user_id,
            )));
        }

        // Legacy fallback: match on (type, broadcaster) from the event body.
        let broadcaster = n
            .event
            .get("broadcaster_user_id")
            .or_else(|| n.event.get("to_broadcaster_user_id"))
            .and_then(|v| v.as_str());
        let Some(broadcaster) = broadcaster else {
            return Ok(None);
        };
        Ok(self
            .db
            .find_subscription_by_type_and_broadcaster(&n.event_type, broadcaster)?
            .map(|row| {
                InterestKey::new(row.bot_account_id, row.event_type, row.broadcaster_user_id)
            }))
    }

    fn track_channel_state(&self, key: &InterestKey, n: &RoutedNotification) {
        let is_live = match n.event_type.as_str() {
            events::EVENT_STREAM_ONLINE => true,
            events::EVENT_STREAM_OFFLINE => false,
            _ => return,
        };
        if let Err(e) = self.db.upsert_channel_state(
            &key.bot_account_id,
            &key.broadcaster_user_id,
            is_live,
            Utc::now().timestamp(),
        ) {
            tracing::warn!(error = %e, "Channel state update failed");
        }
    }

    /// Status snapshot for the HTTP surface.
    pub fn state_counts(&self) -> HashMap<&'static str, usize> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for phase in states.values() {
            let label = match phase {
                Phase::Pending => "pending",
                Phase::Enabled { .. } => "enabled",
                Phase::ErrorCooldown { .. } => "error_cooldown",
            };
            *counts.entry(label).or_default() += 1;
        }
        counts
    }
}

fn map_upstream_status(status: &str) -> String {
    match status {
        "enabled" => "enabled".to_string(),
        s if s.contains("pending") => "pending".to_string(),
        s if s.contains("fail") => "failed".to_string(),
        _ => "enabled".to_string(),
    }
}

fn hint_for(code: &str) -> &'static str {
    match code {
        "missing_scope" => "re-authorize the bot account with the required scope",
        "insufficient_permissions" => "the broadcaster has not authorized this bot",
        "unauthorized" => "bot credentials were rejected, re-link the bot account",
        _ => "creation failed upstream, the bridge will retry after the cooldown",
    }
}
