//! In-memory cache of short-lived OAuth2 access tokens.
//!
//! Tokens obtained through a client-credentials exchange are cached per
//! connector id together with their absolute expiry. A cached token is only
//! handed out while it is further than the refresh skew from expiry; otherwise
//! the caller re-exchanges and stores the new token.
//!
//! Nothing here is persisted. After a restart the first poll of each OAuth2
//! connector performs one extra token exchange.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Access token with its absolute expiry instant.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Returns true if the token expires within `skew` of `now` (or already has).
    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at <= now + skew
    }
}

/// Per-connector token cache.
pub struct TokenCache {
    tokens: DashMap<String, CachedToken>,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    /// Returns the cached token for `connector_id` if it is still usable.
    pub fn get_valid(&self, connector_id: &str, skew: Duration) -> Option<String> {
        self.get_valid_at(connector_id, skew, Utc::now())
    }

    pub fn get_valid_at(&self, connector_id: &str, skew: Duration, now: DateTime<Utc>) -> Option<String> {
        self.tokens
            .get(connector_id)
            .filter(|token| !token.needs_refresh(now, skew))
            .map(|token| token.access_token.clone())
    }

    pub fn insert(&self, connector_id: &str, token: CachedToken) {
        self.tokens.insert(connector_id.to_string(), token);
    }

    /// Drops the cached token so the next request re-exchanges.
    pub fn invalidate(&self, connector_id: &str) {
        self.tokens.remove(connector_id);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
