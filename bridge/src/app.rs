//! Application shared state: one `Core` handle threaded through axum
//! handlers and background tasks.

use std::sync::{Arc, Mutex};

use bridge_db::Database;
use bridge_db::accounts::ServiceAccount;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use twitch_client::api::TwitchApiClient;
use twitch_client::auth::TwitchAuth;

use crate::broadcaster::BroadcasterResolver;
use crate::config::{BridgeConfig, DEDUPE_WINDOW};
use crate::dedupe::{DedupeWindow, Seen};
use crate::envelope::Enricher;
use crate::errors::BridgeError;
use crate::fanout::FanoutHub;
use crate::registry::InterestRegistry;
use crate::submgr::SubscriptionManager;
use crate::types::KeyLocks;
use crate::ws_tokens::TokenStore;

#[derive(Clone)]
pub struct Core {
    inner: Arc<CoreInner>,
}

struct CoreInner {
    config: Arc<BridgeConfig>,
    db: Database,
    registry: Arc<InterestRegistry>,
    manager: Arc<SubscriptionManager>,
    fanout: Arc<FanoutHub>,
    ws_tokens: TokenStore,
    /// Shared window for upstream message ids, both transports.
    message_dedupe: Mutex<DedupeWindow>,
    shutdown: CancellationToken,
    session_stop: tokio::sync::Mutex<Option<mpsc::Sender<()>>>,
}

impl Core {
    pub fn new(config: BridgeConfig, db: Database) -> Self {
        let config = Arc::new(config);
        let shutdown = CancellationToken::new();

        let api = Arc::new(TwitchApiClient::new(config.client_id.clone()));
        let auth = Arc::new(TwitchAuth::new(
            config.client_id.clone(),
            config.client_secret.clone(),
        ));
        let locks = Arc::new(KeyLocks::new());
        let resolver = Arc::new(BroadcasterResolver::new(api.clone(), auth.clone()));
        let registry = Arc::new(InterestRegistry::new(db.clone(), resolver, locks.clone()));
        let fanout = Arc::new(FanoutHub::new(
            db.clone(),
            config.service_signing_secret.clone(),
            shutdown.clone(),
        ));
        let enricher = Enricher::new(config.client_id.clone(), auth.clone());
        let manager = Arc::new(SubscriptionManager::new(
            db.clone(),
            config.clone(),
            api,
            auth,
            registry.clone(),
            fanout.clone(),
            enricher,
            locks,
        ));

        Self {
            inner: Arc::new(CoreInner {
                config,
                db,
                registry,
                manager,
                fanout,
                ws_tokens: TokenStore::default(),
                message_dedupe: Mutex::new(DedupeWindow::new(DEDUPE_WINDOW, 65536)),
                shutdown,
                session_stop: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn registry(&self) -> &Arc<InterestRegistry> {
        &self.inner.registry
    }

    pub fn manager(&self) -> &Arc<SubscriptionManager> {
        &self.inner.manager
    }

    pub fn fanout(&self) -> &Arc<FanoutHub> {
        &self.inner.fanout
    }

    pub fn ws_tokens(&self) -> &TokenStore {
        &self.inner.ws_tokens
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Record an upstream message id; `Duplicate` means skip processing.
    pub fn seen_message(&self, message_id: &str) -> Seen {
        self.inner
            .message_dedupe
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .add(message_id)
    }

    /// Authenticate a downstream service by id + secret.
    pub fn verify_service(
        &self,
        service_id: &str,
        secret: &str,
    ) -> Result<ServiceAccount, BridgeError> {
        let account = self
            .inner
            .db
            .get_service_account(service_id)?
            .ok_or(BridgeError::InvalidServiceCredentials)?;
        let provided = hex::encode(Sha256::digest(secret.as_bytes()));
        if provided != account.secret_hash {
            return Err(BridgeError::InvalidServiceCredentials);
        }
        Ok(account)
    }

    pub async fn set_session_stop(&self, tx: mpsc::Sender<()>) {
        *self.inner.session_stop.lock().await = Some(tx);
    }

    pub async fn take_session_stop(&self) -> Option<mpsc::Sender<()>> {
        self.inner.session_stop.lock().await.take()
    }
}
