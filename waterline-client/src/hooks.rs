//! Resource hooks: typed per-entity accessors over the query cache.
//!
//! A hook binds a resource key, a fetcher, a freshness window, and a retry
//! policy into one consumable accessor exposing data/loading/error plus a
//! manual refresh. Hooks never throw for "not loaded yet": collections
//! default to empty, the dashboard aggregate to zeroed stats. Raw transport
//! errors are normalized to user-safe messages before they reach callers.

use crate::gateway::{HttpGateway, Method};
use crate::lifecycle::{CancelPool, CleanupGuard};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;
use waterline_cache::{CacheSnapshot, Fetcher, QueryCache, RetryPolicy};
use waterline_core::{GatewayError, KeyPattern, ResourceKey, SyncResult, Timestamp};

/// Fetcher backed by the HTTP gateway: one GET path, query parameters
/// taken from the resource key.
pub struct GatewayFetcher {
    gateway: Arc<HttpGateway>,
    path: String,
    cancel: Option<Arc<CancelPool>>,
}

impl GatewayFetcher {
    pub fn new(gateway: Arc<HttpGateway>, path: impl Into<String>) -> Self {
        Self {
            gateway,
            path: path.into(),
            cancel: None,
        }
    }

    /// Tie every fetch to a cancel pool; `cancel_all` aborts fetches in
    /// flight and the resulting `Cancelled` is swallowed by the cache.
    pub fn with_cancel_pool(mut self, pool: Arc<CancelPool>) -> Self {
        self.cancel = Some(pool);
        self
    }
}

#[async_trait]
impl Fetcher for GatewayFetcher {
    async fn fetch(&self, key: &ResourceKey) -> Result<Value, GatewayError> {
        match &self.cancel {
            Some(pool) => {
                let handle = pool.handle();
                self.gateway
                    .request_cancellable(
                        Method::GET,
                        &self.path,
                        Some(key.params()),
                        None,
                        &handle,
                    )
                    .await
            }
            None => self.gateway.get(&self.path, key.params()).await,
        }
    }
}

/// Decorator degrading `Unauthorized` to a safe default.
///
/// Auth-optional resources (active alerts, dashboard stats) resolve to
/// their default rather than a hard error, since the caller may not be
/// authenticated yet during initial load.
pub struct AuthOptionalFetcher {
    inner: Arc<dyn Fetcher>,
    default: Value,
}

impl AuthOptionalFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, default: Value) -> Self {
        Self { inner, default }
    }
}

#[async_trait]
impl Fetcher for AuthOptionalFetcher {
    async fn fetch(&self, key: &ResourceKey) -> Result<Value, GatewayError> {
        match self.inner.fetch(key).await {
            Err(err) if err.is_unauthorized() => Ok(self.default.clone()),
            other => other,
        }
    }
}

/// What a hook consumer sees: typed data, a loading flag, and a user-safe
/// error message.
#[derive(Debug, Clone)]
pub struct HookSnapshot<T> {
    pub data: T,
    pub loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<Timestamp>,
}

/// Typed accessor for one cached resource.
pub struct ResourceHook<T> {
    cache: QueryCache,
    key: ResourceKey,
    fetcher: Arc<dyn Fetcher>,
    stale_time: Duration,
    retry: RetryPolicy,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResourceHook<T>
where
    T: DeserializeOwned + Default,
{
    pub fn new(
        cache: QueryCache,
        key: ResourceKey,
        fetcher: Arc<dyn Fetcher>,
        stale_time: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            cache,
            key,
            fetcher,
            stale_time,
            retry,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Read through the cache: returns immediately with whatever is known,
    /// triggering a background fetch when stale or missing.
    pub async fn read(&self) -> HookSnapshot<T> {
        let snapshot = self
            .cache
            .get_with(
                &self.key,
                Arc::clone(&self.fetcher),
                self.stale_time,
                self.retry.clone(),
            )
            .await;
        project(snapshot)
    }

    /// Force a fetch bypassing staleness and await the result.
    pub async fn refresh(&self) -> HookSnapshot<T> {
        let snapshot = self
            .cache
            .refresh_with(
                &self.key,
                Arc::clone(&self.fetcher),
                self.stale_time,
                self.retry.clone(),
            )
            .await;
        project(snapshot)
    }

    /// Observe without fetching.
    pub async fn peek(&self) -> HookSnapshot<T> {
        project(self.cache.snapshot(&self.key).await)
    }

    /// Pin the cache entry for this hook's lifetime and register the
    /// release with the consumer's cleanup guard.
    pub async fn attach(&self, guard: &mut CleanupGuard) {
        self.cache.retain(&self.key).await;
        let cache = self.cache.clone();
        let key = self.key.clone();
        guard.register(move || {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    cache.release(&key).await;
                });
            }
        });
    }

    /// Spawn an interval-driven background refetch, independent of the
    /// staleness check; coalescing still applies whichever trigger fires
    /// first. Abort the returned handle on teardown (or register it with a
    /// cleanup guard).
    pub fn spawn_interval_refetch(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let key = self.key.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let stale_time = self.stale_time;
        let retry = self.retry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the read path already
            // covers the initial fetch.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache
                    .refetch_with(&key, Arc::clone(&fetcher), stale_time, retry.clone())
                    .await;
            }
        })
    }
}

fn project<T>(snapshot: CacheSnapshot) -> HookSnapshot<T>
where
    T: DeserializeOwned + Default,
{
    let data = match snapshot.value {
        None | Some(Value::Null) => T::default(),
        Some(value) => match serde_json::from_value::<T>(value) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "cached value does not match resource shape");
                T::default()
            }
        },
    };
    HookSnapshot {
        data,
        loading: snapshot.loading,
        error: snapshot
            .last_error
            .as_ref()
            .map(|e| e.user_message().to_string()),
        last_updated: snapshot.fetched_at,
    }
}

/// Write path for one entity family: perform the mutation through the
/// gateway, then invalidate the affected key pattern so dependent reads
/// observe fresh data. No optimistic patching.
pub struct MutationHook {
    gateway: Arc<HttpGateway>,
    cache: QueryCache,
    base_path: String,
    invalidates: KeyPattern,
}

impl MutationHook {
    pub fn new(
        gateway: Arc<HttpGateway>,
        cache: QueryCache,
        base_path: impl Into<String>,
        invalidates: KeyPattern,
    ) -> Self {
        Self {
            gateway,
            cache,
            base_path: base_path.into(),
            invalidates,
        }
    }

    pub async fn create<B: Serialize>(&self, record: &B) -> SyncResult<Value> {
        let body = serde_json::to_value(record)?;
        let result = self.gateway.post(&self.base_path, &body).await?;
        self.cache.invalidate(&self.invalidates).await;
        Ok(result)
    }

    pub async fn update<B: Serialize>(&self, id: &str, record: &B) -> SyncResult<Value> {
        let body = serde_json::to_value(record)?;
        let path = format!("{}/{}", self.base_path, id);
        let result = self.gateway.put(&path, &body).await?;
        self.cache.invalidate(&self.invalidates).await;
        Ok(result)
    }

    pub async fn delete(&self, id: &str) -> SyncResult<Value> {
        let path = format!("{}/{}", self.base_path, id);
        let result = self.gateway.delete(&path).await?;
        self.cache.invalidate(&self.invalidates).await;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waterline_core::{EntityKind, Node};
    use waterline_test_utils::ScriptedFetcher;

    fn nodes_key() -> ResourceKey {
        ResourceKey::new(EntityKind::Nodes)
    }

    #[tokio::test]
    async fn test_read_defaults_to_empty_collection() {
        let cache = QueryCache::with_defaults();
        let fetcher = Arc::new(ScriptedFetcher::always(json!([])));
        let hook: ResourceHook<Vec<Node>> = ResourceHook::new(
            cache,
            nodes_key(),
            fetcher,
            Duration::from_secs(60),
            RetryPolicy::None,
        );
        let snapshot = hook.read().await;
        assert!(snapshot.data.is_empty());
        assert!(snapshot.loading);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_refresh_returns_typed_records() {
        let cache = QueryCache::with_defaults();
        let node = waterline_test_utils::tank_node("n1");
        let fetcher = Arc::new(ScriptedFetcher::always(json!([
            serde_json::to_value(&node).expect("serialize")
        ])));
        let hook: ResourceHook<Vec<Node>> = ResourceHook::new(
            cache,
            nodes_key(),
            fetcher,
            Duration::from_secs(60),
            RetryPolicy::None,
        );
        let snapshot = hook.refresh().await;
        assert_eq!(snapshot.data.len(), 1);
        assert_eq!(snapshot.data[0].id, "n1");
        assert!(snapshot.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_unauthorized_optional_resource_resolves_default() {
        let cache = QueryCache::with_defaults();
        let inner = Arc::new(ScriptedFetcher::failing(GatewayError::Unauthorized));
        let fetcher = Arc::new(AuthOptionalFetcher::new(inner, json!([])));
        let hook: ResourceHook<Vec<Node>> = ResourceHook::new(
            cache,
            nodes_key(),
            fetcher,
            Duration::from_secs(30),
            RetryPolicy::None,
        );
        let snapshot = hook.refresh().await;
        assert!(snapshot.data.is_empty());
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_required_resource_surfaces_sign_in_state() {
        let cache = QueryCache::with_defaults();
        let fetcher = Arc::new(ScriptedFetcher::failing(GatewayError::Unauthorized));
        let hook: ResourceHook<Vec<Node>> = ResourceHook::new(
            cache,
            nodes_key(),
            fetcher,
            Duration::from_secs(30),
            RetryPolicy::None,
        );
        let snapshot = hook.refresh().await;
        assert!(snapshot.data.is_empty());
        assert_eq!(snapshot.error.as_deref(), Some("please sign in"));
    }

    #[tokio::test]
    async fn test_transport_errors_are_user_safe() {
        let cache = QueryCache::with_defaults();
        let fetcher = Arc::new(ScriptedFetcher::failing(GatewayError::Unreachable {
            reason: "dns error: no record for backend.internal:8000".to_string(),
        }));
        let hook: ResourceHook<Vec<Node>> = ResourceHook::new(
            cache,
            nodes_key(),
            fetcher,
            Duration::from_secs(30),
            RetryPolicy::None,
        );
        let snapshot = hook.refresh().await;
        let message = snapshot.error.expect("error expected");
        assert_eq!(message, "temporarily unavailable");
        assert!(!message.contains("dns"));
    }

    #[tokio::test]
    async fn test_interval_refetch_fires_regardless_of_staleness() {
        let cache = QueryCache::with_defaults();
        let fetcher = Arc::new(ScriptedFetcher::always(json!([])));
        let hook: ResourceHook<Vec<Node>> = ResourceHook::new(
            cache,
            nodes_key(),
            fetcher.clone(),
            // An hour of freshness: only the interval can trigger refetches.
            Duration::from_secs(3600),
            RetryPolicy::None,
        );
        hook.refresh().await;
        assert_eq!(fetcher.calls(), 1);

        let ticker = hook.spawn_interval_refetch(Duration::from_millis(40));
        tokio::time::timeout(Duration::from_secs(2), async {
            while fetcher.calls() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("interval refetch never fired");
        ticker.abort();
    }

    #[tokio::test]
    async fn test_attach_pins_entry_until_guard_runs() {
        let cache = QueryCache::new(
            waterline_cache::CacheConfig::new().with_max_idle(Duration::from_millis(1)),
        );
        let fetcher = Arc::new(ScriptedFetcher::always(json!([])));
        let hook: ResourceHook<Vec<Node>> = ResourceHook::new(
            cache.clone(),
            nodes_key(),
            fetcher,
            Duration::from_secs(60),
            RetryPolicy::None,
        );
        hook.refresh().await;

        let mut guard = CleanupGuard::new();
        hook.attach(&mut guard).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.sweep().await, 0);

        guard.run_all();
        // The release is spawned; give it a turn to land.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.sweep().await, 1);
    }
}
