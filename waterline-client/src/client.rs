//! Client facade wiring the gateway, cache, push router, and hooks.

use crate::config::{ConfigError, SyncConfig};
use crate::gateway::HttpGateway;
use crate::hooks::{AuthOptionalFetcher, GatewayFetcher, MutationHook, ResourceHook};
use crate::lifecycle::CancelPool;
use crate::push::{ChannelState, PushRouter, PushTransport, WsTransport};
use crate::session::{SessionStore, TokenSource};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use waterline_cache::{Fetcher, QueryCache, RetryPolicy};
use waterline_core::{
    Alert, Community, DashboardStats, EntityKind, GatewayError, KeyPattern, Node, Region,
    ResourceKey, SyncResult,
};

/// One consumer context's entry point to the sync layer.
///
/// Owns the query cache and push router; hands out typed resource hooks
/// and mutation hooks bound to them. Teardown is explicit via `shutdown`
/// (clear the cache, close every subscription) so tests can run isolated
/// instances side by side.
pub struct SyncClient {
    config: SyncConfig,
    gateway: Arc<HttpGateway>,
    cache: QueryCache,
    router: PushRouter,
    cancels: Arc<CancelPool>,
}

impl SyncClient {
    pub fn new(config: SyncConfig, store: Arc<dyn SessionStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        let tokens = TokenSource::new(store, &config.auth);
        let gateway = Arc::new(HttpGateway::new(&config, tokens.clone())?);
        let cache = QueryCache::with_defaults();
        let transport: Arc<dyn PushTransport> =
            Arc::new(WsTransport::new(config.ws_endpoint.clone(), tokens));
        let router = PushRouter::new(transport, cache.clone(), config.reconnect.clone());
        Ok(Self {
            config,
            gateway,
            cache,
            router,
            cancels: Arc::new(CancelPool::new()),
        })
    }

    /// As `new`, with a caller-supplied push transport. Lets tests script
    /// the push channel.
    pub fn with_transport(
        config: SyncConfig,
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn PushTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tokens = TokenSource::new(store, &config.auth);
        let gateway = Arc::new(HttpGateway::new(&config, tokens)?);
        let cache = QueryCache::with_defaults();
        let router = PushRouter::new(transport, cache.clone(), config.reconnect.clone());
        Ok(Self {
            config,
            gateway,
            cache,
            router,
            cancels: Arc::new(CancelPool::new()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn router(&self) -> &PushRouter {
        &self.router
    }

    pub fn gateway(&self) -> &Arc<HttpGateway> {
        &self.gateway
    }

    pub fn cancel_pool(&self) -> &Arc<CancelPool> {
        &self.cancels
    }

    // ------------------------------------------------------------------
    // Query hooks
    // ------------------------------------------------------------------

    /// All nodes. Public reference data; retried per config.
    pub fn nodes(&self) -> ResourceHook<Vec<Node>> {
        self.collection_hook(ResourceKey::new(EntityKind::Nodes), "/nodes")
    }

    /// Nodes filtered by search text and/or community.
    pub fn nodes_filtered(
        &self,
        search: Option<&str>,
        community: Option<&str>,
    ) -> ResourceHook<Vec<Node>> {
        let mut key = ResourceKey::new(EntityKind::Nodes);
        if let Some(search) = search {
            key = key.with_param("search", search);
        }
        if let Some(community) = community {
            key = key.with_param("community", community);
        }
        self.collection_hook(key, "/nodes")
    }

    pub fn communities(&self) -> ResourceHook<Vec<Community>> {
        self.collection_hook(ResourceKey::new(EntityKind::Communities), "/communities")
    }

    pub fn regions(&self) -> ResourceHook<Vec<Region>> {
        self.collection_hook(ResourceKey::new(EntityKind::Regions), "/regions")
    }

    /// Active alerts. Auth-optional: resolves to an empty list when the
    /// caller is not authenticated. Not retried, to avoid repeated 401s.
    pub fn active_alerts(&self) -> ResourceHook<Vec<Alert>> {
        let key = ResourceKey::new(EntityKind::Alerts).with_param("active", "true");
        let stale_time = self.config.stale_time_for(EntityKind::Alerts);
        let fetcher: Arc<dyn Fetcher> = Arc::new(AuthOptionalFetcher::new(
            Arc::new(
                GatewayFetcher::new(Arc::clone(&self.gateway), "/alerts/active")
                    .with_cancel_pool(Arc::clone(&self.cancels)),
            ),
            Value::Array(Vec::new()),
        ));
        ResourceHook::new(
            self.cache.clone(),
            key,
            fetcher,
            stale_time,
            RetryPolicy::None,
        )
    }

    /// Dashboard aggregate. Auth-optional: resolves to zeroed stats when
    /// the caller is not authenticated.
    pub fn dashboard_stats(&self) -> ResourceHook<DashboardStats> {
        let key = ResourceKey::new(EntityKind::DashboardStats);
        let stale_time = self.config.stale_time_for(EntityKind::DashboardStats);
        let zeroed = serde_json::to_value(DashboardStats::default())
            .unwrap_or(Value::Null);
        let fetcher: Arc<dyn Fetcher> = Arc::new(AuthOptionalFetcher::new(
            Arc::new(
                GatewayFetcher::new(Arc::clone(&self.gateway), "/dashboard/stats")
                    .with_cancel_pool(Arc::clone(&self.cancels)),
            ),
            zeroed,
        ));
        ResourceHook::new(
            self.cache.clone(),
            key,
            fetcher,
            stale_time,
            RetryPolicy::None,
        )
    }

    fn collection_hook<T>(&self, key: ResourceKey, path: &str) -> ResourceHook<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let stale_time = self.config.stale_time_for(key.entity());
        let fetcher: Arc<dyn Fetcher> = Arc::new(
            GatewayFetcher::new(Arc::clone(&self.gateway), path)
                .with_cancel_pool(Arc::clone(&self.cancels)),
        );
        ResourceHook::new(
            self.cache.clone(),
            key,
            fetcher,
            stale_time,
            self.config.retry_policy(),
        )
    }

    // ------------------------------------------------------------------
    // Mutation hooks
    // ------------------------------------------------------------------

    pub fn node_mutations(&self) -> MutationHook {
        self.mutation_hook("/nodes", EntityKind::Nodes)
    }

    pub fn community_mutations(&self) -> MutationHook {
        self.mutation_hook("/communities", EntityKind::Communities)
    }

    pub fn region_mutations(&self) -> MutationHook {
        self.mutation_hook("/regions", EntityKind::Regions)
    }

    /// Acknowledge an alert, then invalidate alert reads.
    pub async fn acknowledge_alert(&self, id: &str) -> SyncResult<Value> {
        let path = format!("/alerts/{}/ack", id);
        let result = self.gateway.post(&path, &Value::Null).await?;
        self.cache
            .invalidate(&KeyPattern::entity(EntityKind::Alerts))
            .await;
        Ok(result)
    }

    fn mutation_hook(&self, base_path: &str, entity: EntityKind) -> MutationHook {
        MutationHook::new(
            Arc::clone(&self.gateway),
            self.cache.clone(),
            base_path,
            KeyPattern::entity(entity),
        )
    }

    // ------------------------------------------------------------------
    // Push and health
    // ------------------------------------------------------------------

    /// Subscribe the push channel for one entity family, returning a state
    /// observer. Re-subscribing replaces the prior channel atomically.
    pub async fn subscribe(&self, entity: EntityKind) -> watch::Receiver<ChannelState> {
        self.router.subscribe(entity).await
    }

    pub async fn unsubscribe(&self, entity: EntityKind) -> bool {
        self.router.unsubscribe(entity).await
    }

    /// Probe the backend health endpoint (versionless path).
    pub async fn health(&self) -> Result<Value, GatewayError> {
        self.gateway.health().await
    }

    /// Teardown: cancel in-flight fetches, close every subscription, and
    /// drop every cache entry. Cancelled requests settle silently.
    pub async fn shutdown(&self) {
        self.cancels.cancel_all();
        self.router.close_all().await;
        self.cache.clear().await;
    }
}
