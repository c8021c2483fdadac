//! Session store seam and bearer token resolution.
//!
//! The token comes from one of two mutually exclusive origins: the
//! provider-issued session key, or a development-bypass entry whose value
//! carries a convention prefix. Both are treated uniformly downstream as
//! "bearer token, or none" - absence is not an error.

use crate::config::AuthConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Values under the dev-bypass key must start with this prefix to be
/// accepted as tokens; anything else under that key is ignored.
pub const DEV_BYPASS_PREFIX: &str = "dev-bypass:";

/// Key-value session storage as provided by the host environment.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
}

/// In-memory session store for tests and embedded use.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().await.insert(key.into(), value.into());
    }

    pub async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }
}

/// Resolves the bearer token attached to outbound requests.
#[derive(Clone)]
pub struct TokenSource {
    store: Arc<dyn SessionStore>,
    session_key: String,
    dev_bypass_key: String,
}

impl TokenSource {
    pub fn new(store: Arc<dyn SessionStore>, auth: &AuthConfig) -> Self {
        Self {
            store,
            session_key: auth.session_key.clone(),
            dev_bypass_key: auth.dev_bypass_key.clone(),
        }
    }

    /// Resolve the current token. The session key wins over the bypass
    /// key; an empty session value counts as absent.
    pub async fn resolve(&self) -> Option<String> {
        if let Some(token) = self.store.get(&self.session_key).await {
            if !token.is_empty() {
                return Some(token);
            }
        }
        match self.store.get(&self.dev_bypass_key).await {
            Some(token) if token.starts_with(DEV_BYPASS_PREFIX) => {
                debug!("using development-bypass token");
                Some(token)
            }
            _ => None,
        }
    }
}
