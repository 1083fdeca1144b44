//! Interest registry: in-memory `InterestKey -> interests` plus the
//! persistent mirror in bridge-db.
//!
//! All mutating operations serialize per `InterestKey` through the shared
//! `KeyLocks`; reads clone a snapshot and never block writers for long.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use bridge_db::Database;
use bridge_db::DbError;
use bridge_db::accounts::ServiceAccount;
use bridge_db::interests::InterestRow;
use chrono::Utc;
use uuid::Uuid;

use crate::broadcaster::BroadcasterResolver;
use crate::errors::BridgeError;
use crate::events;
use crate::types::{DownstreamTransport, InterestKey, KeyLocks};

/// A validated interest creation request.
#[derive(Debug, Clone)]
pub struct UpsertRequest {
    pub bot_account_id: String,
    pub event_type: String,
    pub broadcaster: String,
    pub transport: DownstreamTransport,
}

/// Result of an upsert, carrying every key the subscription manager
/// should (re-)ensure.
#[derive(Debug)]
pub struct UpsertOutcome {
    pub interest: InterestRow,
    /// False when the unique tuple already existed and was touched.
    pub created: bool,
    pub ensure_keys: Vec<InterestKey>,
}

/// Result of a delete.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub interest: InterestRow,
    /// True when no interest remains for the key across all services.
    pub last_for_key: bool,
}

pub struct InterestRegistry {
    db: Database,
    resolver: Arc<BroadcasterResolver>,
    locks: Arc<KeyLocks>,
    by_key: RwLock<HashMap<InterestKey, Vec<InterestRow>>>,
    by_service: RwLock<HashMap<String, HashSet<String>>>,
}

impl InterestRegistry {
    pub fn new(db: Database, resolver: Arc<BroadcasterResolver>, locks: Arc<KeyLocks>) -> Self {
        Self {
            db,
            resolver,
            locks,
            by_key: RwLock::new(HashMap::new()),
            by_service: RwLock::new(HashMap::new()),
        }
    }

    /// Warm the in-memory maps from the persistent mirror.
    pub fn load_from_db(&self) -> Result<usize, BridgeError> {
        let rows = self.db.list_interests()?;
        let count = rows.len();

        let mut by_key: HashMap<InterestKey, Vec<InterestRow>> = HashMap::new();
        let mut by_service: HashMap<String, HashSet<String>> = HashMap::new();
        for row in rows {
            by_service
                .entry(row.service_id.clone())
                .or_default()
                .insert(row.id.clone());
            by_key.entry(InterestKey::of(&row)).or_default().push(row);
        }

        *self.by_key.write().unwrap_or_else(|e| e.into_inner()) = by_key;
        *self.by_service.write().unwrap_or_else(|e| e.into_inner()) = by_service;
        Ok(count)
    }

    /// Create or touch an interest; companion `stream.online`/`stream.offline`
    /// interests are ensured alongside any fresh insert.
    pub async fn upsert(
        &self,
        service: &ServiceAccount,
        req: UpsertRequest,
    ) -> Result<UpsertOutcome, BridgeError> {
        if events::lookup(&req.event_type).is_none() {
            return Err(BridgeError::UnknownEventType(req.event_type));
        }
        self.check_bot_access(service, &req.bot_account_id)?;
        let broadcaster_user_id = self.resolver.resolve(&req.broadcaster).await?;

        let (interest, created) = self
            .upsert_one(
                &service.id,
                &req.bot_account_id,
                &req.event_type,
                &broadcaster_user_id,
                &req.transport,
            )
            .await?;

        let mut ensure_keys = vec![InterestKey::of(&interest)];
        if created {
            for companion_type in [events::EVENT_STREAM_ONLINE, events::EVENT_STREAM_OFFLINE] {
                if companion_type == req.event_type {
                    continue;
                }
                // Companions are pinned to WS transport regardless of the
                // caller's own transport.
                let (companion, companion_created) = self
                    .upsert_one(
                        &service.id,
                        &req.bot_account_id,
                        companion_type,
                        &broadcaster_user_id,
                        &DownstreamTransport::Ws,
                    )
                    .await?;
                if companion_created {
                    ensure_keys.push(InterestKey::of(&companion));
                }
            }
        }

        Ok(UpsertOutcome {
            interest,
            created,
            ensure_keys,
        })
    }

    /// Insert or touch a single row under its key lock. No companion logic.
    async fn upsert_one(
        &self,
        service_id: &str,
        bot_account_id: &str,
        event_type: &str,
        broadcaster_user_id: &str,
        transport: &DownstreamTransport,
    ) -> Result<(InterestRow, bool), BridgeError> {
        let key = InterestKey::new(bot_account_id, event_type, broadcaster_user_id);
        let lock = self.locks.for_key(&key);
        let _guard = lock.lock().await;

        let webhook_url = match transport {
            DownstreamTransport::Ws => String::new(),
            DownstreamTransport::Webhook { url } => url.clone(),
        };
        let now = Utc::now().timestamp();

        if let Some(existing) = self.db.find_interest_by_tuple(
            service_id,
            bot_account_id,
            event_type,
            broadcaster_user_id,
            transport.as_str(),
            &webhook_url,
        )? {
            self.db.touch_interest(&existing.id, now)?;
            let mut touched = existing;
            touched.updated_at = now;
            self.replace_in_maps(&key, touched.clone());
            return Ok((touched, false));
        }

        let row = InterestRow {
            id: Uuid::new_v4().to_string(),
            service_id: service_id.to_string(),
            bot_account_id: bot_account_id.to_string(),
            event_type: event_type.to_string(),
            broadcaster_user_id: broadcaster_user_id.to_string(),
            transport: transport.as_str().to_string(),
            webhook_url,
            created_at: now,
            updated_at: now,
        };

        match self.db.insert_interest(&row) {
            Ok(()) => {
                self.replace_in_maps(&key, row.clone());
                Ok((row, true))
            }
            // Lost an insert race outside our lock (e.g. a previous
            // deployment's row): re-read the winner and touch it.
            Err(DbError::Conflict) => {
                let existing = self
                    .db
                    .find_interest_by_tuple(
                        service_id,
                        bot_account_id,
                        event_type,
                        broadcaster_user_id,
                        row.transport.as_str(),
                        &row.webhook_url,
                    )?
                    .ok_or_else(|| {
                        BridgeError::NotFound("interest vanished after conflict".into())
                    })?;
                self.db.touch_interest(&existing.id, now)?;
                let mut touched = existing;
                touched.updated_at = now;
                self.replace_in_maps(&key, touched.clone());
                Ok((touched, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove an interest owned by the calling service.
    pub async fn delete(
        &self,
        service_id: &str,
        interest_id: &str,
    ) -> Result<DeleteOutcome, BridgeError> {
        let row = self
            .db
            .get_interest(interest_id)?
            .filter(|r| r.service_id == service_id)
            .ok_or_else(|| BridgeError::NotFound(format!("interest {interest_id}")))?;

        let key = InterestKey::of(&row);
        let lock = self.locks.for_key(&key);
        let _guard = lock.lock().await;

        if !self.db.delete_interest(interest_id)? {
            return Err(BridgeError::NotFound(format!("interest {interest_id}")));
        }
        let last_for_key = self.remove_from_maps(&key, &row);

        Ok(DeleteOutcome {
            interest: row,
            last_for_key,
        })
    }

    /// Touch every interest of the calling service that shares
    /// `(bot, broadcaster)` with the target. Keeping one member of the
    /// cluster alive keeps the whole cluster alive.
    pub fn heartbeat(&self, service_id: &str, interest_id: &str) -> Result<usize, BridgeError> {
        let row = self
            .db
            .get_interest(interest_id)?
            .filter(|r| r.service_id == service_id)
            .ok_or_else(|| BridgeError::NotFound(format!("interest {interest_id}")))?;

        let now = Utc::now().timestamp();
        let touched = self.db.touch_interest_group(
            service_id,
            &row.bot_account_id,
            &row.broadcaster_user_id,
            now,
        )?;

        let mut by_key = self.by_key.write().unwrap_or_else(|e| e.into_inner());
        for interests in by_key.values_mut() {
            for i in interests.iter_mut() {
                if i.service_id == service_id
                    && i.bot_account_id == row.bot_account_id
                    && i.broadcaster_user_id == row.broadcaster_user_id
                {
                    i.updated_at = now;
                }
            }
        }

        Ok(touched)
    }

    /// Snapshot of the interests for a key.
    pub fn lookup(&self, key: &InterestKey) -> Vec<InterestRow> {
        self.by_key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// All keys with at least one live interest.
    pub fn keys(&self) -> Vec<InterestKey> {
        self.by_key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Interest counts per service, for the status surface.
    pub fn counts_by_service(&self) -> HashMap<String, usize> {
        self.by_service
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect()
    }

    /// Drop interests without a heartbeat since the cutoff. Returns the
    /// removed rows; keys left without any interest are the caller's to
    /// release upstream.
    pub fn prune_stale(&self, cutoff: i64) -> Result<Vec<InterestRow>, BridgeError> {
        let removed = self.db.delete_stale_interests(cutoff)?;
        if removed.is_empty() {
            return Ok(removed);
        }

        for row in &removed {
            self.remove_from_maps(&InterestKey::of(row), row);
        }
        tracing::info!(count = removed.len(), "Pruned stale interests");
        Ok(removed)
    }

    fn check_bot_access(
        &self,
        service: &ServiceAccount,
        bot_account_id: &str,
    ) -> Result<(), BridgeError> {
        let bot = self
            .db
            .get_bot_account(bot_account_id)?
            .ok_or_else(|| BridgeError::BotNotAccessible(bot_account_id.to_string()))?;
        if !bot.enabled {
            return Err(BridgeError::BotNotAccessible(bot_account_id.to_string()));
        }
        if let Some(allowlist) = &service.bot_allowlist {
            if !allowlist.iter().any(|id| id == bot_account_id) {
                return Err(BridgeError::BotNotAccessible(bot_account_id.to_string()));
            }
        }
        Ok(())
    }

    /// Insert or replace a row in both maps.
    fn replace_in_maps(&self, key: &InterestKey, row: InterestRow) {
        {
            let mut by_key = self.by_key.write().unwrap_or_else(|e| e.into_inner());
            let interests = by_key.entry(key.clone()).or_default();
            interests.retain(|i| i.id != row.id);
            interests.push(row.clone());
        }
        self.by_service
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(row.service_id.clone())
            .or_default()
            .insert(row.id);
    }

    /// Remove a row from both maps; true when the key is now empty.
    fn remove_from_maps(&self, key: &InterestKey, row: &InterestRow) -> bool {
        let last = {
            let mut by_key = self.by_key.write().unwrap_or_else(|e| e.into_inner());
            match by_key.get_mut(key) {
                Some(interests) => {
                    interests.retain(|i| i.id != row.id);
                    let empty = interests.is_empty();
                    if empty {
                        by_key.remove(key);
                    }
                    empty
                }
                None => true,
            }
        };
        if let Some(ids) = self
            .by_service
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&row.service_id)
        {
            ids.remove(&row.id);
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use twitch_client::api::TwitchApiClient;
    use twitch_client::auth::TwitchAuth;

    use super::*;

    fn test_registry() -> InterestRegistry {
        let db = Database::open_in_memory().expect("Failed to create test DB");
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO bot_accounts (id, twitch_user_id, login, enabled)
                 VALUES ('bot1', '42', 'botlogin', true)",
                [],
            )?;
            conn.execute(
                "INSERT INTO bot_accounts (id, twitch_user_id, login, enabled)
                 VALUES ('bot-off', '43', 'offbot', false)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let api = Arc::new(TwitchApiClient::new("cid".into()));
        let auth = Arc::new(TwitchAuth::new("cid".into(), "secret".into()));
        let resolver = Arc::new(BroadcasterResolver::new(api, auth));
        InterestRegistry::new(db, resolver, Arc::new(KeyLocks::new()))
    }

    fn service(id: &str) -> ServiceAccount {
        ServiceAccount {
            id: id.into(),
            display_name: id.into(),
            secret_hash: String::new(),
            bot_allowlist: None,
        }
    }

    fn chat_request() -> UpsertRequest {
        UpsertRequest {
            bot_account_id: "bot1".into(),
            event_type: "channel.chat.message".into(),
            broadcaster: "12345".into(),
            transport: DownstreamTransport::Ws,
        }
    }

    #[tokio::test]
    async fn upsert_creates_companions() {
        let registry = test_registry();
        let outcome = registry.upsert(&service("svcA"), chat_request()).await.unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.interest.event_type, "channel.chat.message");
        // Primary key plus two companion keys.
        assert_eq!(outcome.ensure_keys.len(), 3);

        let online = registry.lookup(&InterestKey::new("bot1", "stream.online", "12345"));
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].transport, "ws");
        let offline = registry.lookup(&InterestKey::new("bot1", "stream.offline", "12345"));
        assert_eq!(offline.len(), 1);
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let registry = test_registry();
        let first = registry.upsert(&service("svcA"), chat_request()).await.unwrap();
        let second = registry.upsert(&service("svcA"), chat_request()).await.unwrap();

        assert!(!second.created);
        assert_eq!(first.interest.id, second.interest.id);
        assert!(second.interest.updated_at >= first.interest.updated_at);

        let key = InterestKey::new("bot1", "channel.chat.message", "12345");
        assert_eq!(registry.lookup(&key).len(), 1);
    }

    #[tokio::test]
    async fn companion_upsert_does_not_recurse() {
        let registry = test_registry();
        let mut req = chat_request();
        req.event_type = "stream.online".into();
        let outcome = registry.upsert(&service("svcA"), req).await.unwrap();

        // stream.online itself only adds the offline companion.
        assert_eq!(outcome.ensure_keys.len(), 2);
    }

    #[tokio::test]
    async fn unknown_event_type_rejected() {
        let registry = test_registry();
        let mut req = chat_request();
        req.event_type = "channel.made_up".into();
        match registry.upsert(&service("svcA"), req).await {
            Err(BridgeError::UnknownEventType(_)) => {}
            other => panic!("expected UnknownEventType, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_or_missing_bot_rejected() {
        let registry = test_registry();
        let mut req = chat_request();
        req.bot_account_id = "bot-off".into();
        assert!(matches!(
            registry.upsert(&service("svcA"), req).await,
            Err(BridgeError::BotNotAccessible(_))
        ));

        let mut req = chat_request();
        req.bot_account_id = "missing".into();
        assert!(matches!(
            registry.upsert(&service("svcA"), req).await,
            Err(BridgeError::BotNotAccessible(_))
        ));
    }

    #[tokio::test]
    async fn allowlist_gates_bot_access() {
        let registry = test_registry();
        let mut svc = service("svcA");
        svc.bot_allowlist = Some(vec!["other-bot".into()]);
        assert!(matches!(
            registry.upsert(&svc, chat_request()).await,
            Err(BridgeError::BotNotAccessible(_))
        ));
    }

    #[tokio::test]
    async fn delete_reports_last_for_key() {
        let registry = test_registry();
        let a = registry.upsert(&service("svcA"), chat_request()).await.unwrap();
        let b = registry.upsert(&service("svcB"), chat_request()).await.unwrap();

        let first = registry.delete("svcA", &a.interest.id).await.unwrap();
        assert!(!first.last_for_key, "svcB still holds the key");

        let second = registry.delete("svcB", &b.interest.id).await.unwrap();
        assert!(second.last_for_key);
    }

    #[tokio::test]
    async fn delete_requires_owning_service() {
        let registry = test_registry();
        let a = registry.upsert(&service("svcA"), chat_request()).await.unwrap();
        assert!(matches!(
            registry.delete("svcB", &a.interest.id).await,
            Err(BridgeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn heartbeat_touches_the_cluster() {
        let registry = test_registry();
        let outcome = registry.upsert(&service("svcA"), chat_request()).await.unwrap();

        // Primary + two companions share (service, bot, broadcaster).
        let touched = registry.heartbeat("svcA", &outcome.interest.id).unwrap();
        assert_eq!(touched, 3);

        assert!(matches!(
            registry.heartbeat("svcB", &outcome.interest.id),
            Err(BridgeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn prune_removes_only_stale_rows() {
        let registry = test_registry();
        let outcome = registry.upsert(&service("svcA"), chat_request()).await.unwrap();

        // Nothing is stale yet.
        let removed = registry.prune_stale(outcome.interest.updated_at - 10).unwrap();
        assert!(removed.is_empty());

        let removed = registry.prune_stale(outcome.interest.updated_at + 10).unwrap();
        assert_eq!(removed.len(), 3, "primary plus companions are stale");
        assert!(registry.keys().is_empty());
    }

    #[tokio::test]
    async fn load_from_db_rebuilds_maps() {
        let registry = test_registry();
        registry.upsert(&service("svcA"), chat_request()).await.unwrap();

        // Simulate a restart by clearing the maps and reloading.
        registry.by_key.write().unwrap().clear();
        registry.by_service.write().unwrap().clear();
        let count = registry.load_from_db().unwrap();
        assert_eq!(count, 3);
        assert_eq!(registry.keys().len(), 3);
        assert_eq!(registry.counts_by_service().get("svcA"), Some(&3));
    }
}
