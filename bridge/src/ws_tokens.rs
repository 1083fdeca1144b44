//! Short-lived, single-use WebSocket auth tokens.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use crate::config::WS_TOKEN_TTL;
use crate::errors::BridgeError;

struct TokenEntry {
    service_id: String,
    minted_at: Instant,
    used: bool,
}

/// In-memory store of minted WS auth tokens.
pub struct TokenStore {
    ttl: Duration,
    tokens: Mutex<HashMap<String, TokenEntry>>,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(WS_TOKEN_TTL)
    }
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a fresh token bound to a service id.
    pub fn mint(&self, service_id: &str) -> String {
        self.mint_at(service_id, Instant::now())
    }

    fn mint_at(&self, service_id: &str, now: Instant) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        // Expired entries only accumulate between mints; sweep here.
        tokens.retain(|_, e| now.duration_since(e.minted_at) < self.ttl);
        tokens.insert(
            token.clone(),
            TokenEntry {
                service_id: service_id.to_string(),
                minted_at: now,
                used: false,
            },
        );
        token
    }

    /// Atomically consume a token, returning the bound service id.
    pub fn consume(&self, token: &str) -> Result<String, BridgeError> {
        self.consume_at(token, Instant::now())
    }

    fn consume_at(&self, token: &str, now: Instant) -> Result<String, BridgeError> {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        let entry = tokens.get_mut(token).ok_or(BridgeError::InvalidToken)?;

        if now.duration_since(entry.minted_at) >= self.ttl {
            tokens.remove(token);
            return Err(BridgeError::ExpiredToken);
        }
        if entry.used {
            return Err(BridgeError::AlreadyUsed);
        }

        entry.used = true;
        Ok(entry.service_id.clone())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_and_consume() {
        let store = TokenStore::new(Duration::from_secs(60));
        let token = store.mint("svcA");
        assert_eq!(store.consume(&token).unwrap(), "svcA");
    }

    #[test]
    fn tokens_are_single_use() {
        let store = TokenStore::new(Duration::from_secs(60));
        let token = store.mint("svcA");
        store.consume(&token).unwrap();
        match store.consume(&token) {
            Err(BridgeError::AlreadyUsed) => {}
            other => panic!("expected AlreadyUsed, got {other:?}"),
        }
    }

    #[test]
    fn unknown_token_is_invalid() {
        let store = TokenStore::new(Duration::from_secs(60));
        match store.consume("nope") {
            Err(BridgeError::InvalidToken) => {}
            other => panic!("expected InvalidToken, got {other:?}"),
        }
    }

    #[test]
    fn expired_token_is_rejected() {
        let store = TokenStore::new(Duration::from_secs(60));
        let now = Instant::now();
        let token = store.mint_at("svcA", now);
        match store.consume_at(&token, now + Duration::from_secs(61)) {
            Err(BridgeError::ExpiredToken) => {}
            other => panic!("expected ExpiredToken, got {other:?}"),
        }
    }

    #[test]
    fn tokens_are_unique_and_urlsafe() {
        let store = TokenStore::new(Duration::from_secs(60));
        let a = store.mint("svcA");
        let b = store.mint("svcA");
        assert_ne!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
        // 32 bytes base64url without padding.
        assert_eq!(a.len(), 43);
    }
}
