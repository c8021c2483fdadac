//! Push listener with reconnect backoff and cache reconciliation.
//!
//! One long-lived channel per entity family. Received change events are
//! decoded and applied to the query cache via `apply_change`; channel drops
//! trigger automatic reconnection with jittered exponential backoff that
//! never goes below the configured floor. Transient channel errors are
//! logged, never surfaced - polling continues regardless, the push channel
//! is an optimization only.

use crate::config::ReconnectConfig;
use crate::session::TokenSource;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;
use waterline_cache::QueryCache;
use waterline_core::{ChangeEvent, ChannelError, EntityKind};

/// Push channel lifecycle. Observable through the watch receiver returned
/// by [`PushRouter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
    Reconnecting,
}

/// Stream of decoded push payloads for one entity family.
pub type EventStream = BoxStream<'static, Result<Value, ChannelError>>;

/// Transport seam for the push channel.
///
/// The reconnect loop and reconciliation logic are transport-agnostic; the
/// production implementation speaks WebSocket, tests script their own.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, entity: EntityKind) -> Result<EventStream, ChannelError>;
}

/// WebSocket transport, one socket per entity family, authenticated with
/// the same bearer token as the HTTP gateway.
pub struct WsTransport {
    endpoint: String,
    tokens: TokenSource,
}

impl WsTransport {
    pub fn new(endpoint: impl Into<String>, tokens: TokenSource) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            tokens,
        }
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn connect(&self, entity: EntityKind) -> Result<EventStream, ChannelError> {
        let table = entity.table_name();
        let url = format!("{}/{}", self.endpoint, table);
        let mut request = Request::builder()
            .uri(url)
            .body(())
            .map_err(|e| ChannelError::Connect {
                entity: table.to_string(),
                reason: e.to_string(),
            })?;
        if let Some(token) = self.tokens.resolve().await {
            let value = format!("Bearer {}", token);
            if let Ok(header) = HeaderValue::from_str(&value) {
                request.headers_mut().insert("authorization", header);
            }
        }
        let (stream, _) =
            tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| ChannelError::Connect {
                    entity: table.to_string(),
                    reason: e.to_string(),
                })?;
        let mapped = stream
            .filter_map(move |message| {
                let item = match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(value) => Some(Ok(value)),
                        Err(err) => Some(Err(ChannelError::Decode {
                            entity: table.to_string(),
                            reason: err.to_string(),
                        })),
                    },
                    Ok(Message::Close(_)) => Some(Err(ChannelError::Closed)),
                    Ok(_) => None,
                    Err(err) => Some(Err(ChannelError::Dropped {
                        entity: table.to_string(),
                        reason: err.to_string(),
                    })),
                };
                futures_util::future::ready(item)
            })
            .boxed();
        Ok(mapped)
    }
}

/// One active channel binding. Owned by the router; dropping it signals
/// the listener task to shut down.
pub struct Subscription {
    id: Uuid,
    entity: EntityKind,
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Signal the listener and wait for it to exit, forcing it if it does
    /// not wind down in time. Cancels any pending reconnect timer.
    async fn shut_down(mut self) {
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(Duration::from_millis(500), &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Exactly-once close: the listener observes the signal at its next
        // suspension point and exits.
        let _ = self.shutdown_tx.send(true);
    }
}

/// Owns every push subscription of one consumer context and guarantees at
/// most one active channel per entity kind.
pub struct PushRouter {
    transport: Arc<dyn PushTransport>,
    cache: QueryCache,
    reconnect: ReconnectConfig,
    subscriptions: Mutex<HashMap<EntityKind, Subscription>>,
}

impl PushRouter {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        cache: QueryCache,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            reconnect,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Open a channel for an entity family, returning a state observer.
    ///
    /// Re-subscribing replaces the prior subscription atomically: the old
    /// channel is closed before the new one opens, so there are never two
    /// simultaneously open channels for one entity kind.
    pub async fn subscribe(&self, entity: EntityKind) -> watch::Receiver<ChannelState> {
        let mut subs = self.subscriptions.lock().await;
        if let Some(old) = subs.remove(&entity) {
            debug!(entity = %entity, "replacing existing subscription");
            old.shut_down().await;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ChannelState::Closed);
        let task = spawn_listener(
            Arc::clone(&self.transport),
            entity,
            self.cache.clone(),
            self.reconnect.clone(),
            state_tx,
            shutdown_rx,
        );
        subs.insert(
            entity,
            Subscription {
                id: Uuid::now_v7(),
                entity,
                shutdown_tx,
                state_rx: state_rx.clone(),
                task,
            },
        );
        state_rx
    }

    /// Close the channel for an entity family. Returns false when no
    /// subscription existed.
    pub async fn unsubscribe(&self, entity: EntityKind) -> bool {
        let removed = self.subscriptions.lock().await.remove(&entity);
        match removed {
            Some(subscription) => {
                subscription.shut_down().await;
                true
            }
            None => false,
        }
    }

    pub async fn state(&self, entity: EntityKind) -> ChannelState {
        self.subscriptions
            .lock()
            .await
            .get(&entity)
            .map(Subscription::state)
            .unwrap_or(ChannelState::Closed)
    }

    pub async fn subscription_id(&self, entity: EntityKind) -> Option<Uuid> {
        self.subscriptions
            .lock()
            .await
            .get(&entity)
            .map(Subscription::id)
    }

    pub async fn active_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Teardown path: close every channel exactly once.
    pub async fn close_all(&self) {
        let drained: Vec<Subscription> = {
            let mut subs = self.subscriptions.lock().await;
            subs.drain().map(|(_, sub)| sub).collect()
        };
        for subscription in drained {
            subscription.shut_down().await;
        }
    }
}

fn spawn_listener(
    transport: Arc<dyn PushTransport>,
    entity: EntityKind,
    cache: QueryCache,
    reconnect: ReconnectConfig,
    state_tx: watch::Sender<ChannelState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = reconnect.initial_ms;
        loop {
            let _ = state_tx.send_replace(ChannelState::Connecting);
            let connected = tokio::select! {
                _ = shutdown_signal(&mut shutdown_rx) => break,
                connected = transport.connect(entity) => connected,
            };
            match connected {
                Ok(mut stream) => {
                    let _ = state_tx.send_replace(ChannelState::Open);
                    backoff = reconnect.initial_ms;
                    loop {
                        let item = tokio::select! {
                            _ = shutdown_signal(&mut shutdown_rx) => {
                                let _ = state_tx.send_replace(ChannelState::Closed);
                                return;
                            }
                            item = stream.next() => item,
                        };
                        match item {
                            Some(Ok(payload)) => {
                                match ChangeEvent::from_wire(entity, &payload) {
                                    Some(event) => {
                                        cache.apply_change(&event).await;
                                    }
                                    None => {
                                        debug!(entity = %entity, "skipping undecodable push payload");
                                    }
                                }
                            }
                            Some(Err(err)) => {
                                warn!(entity = %entity, error = %err, "push channel dropped");
                                break;
                            }
                            None => {
                                debug!(entity = %entity, "push channel ended");
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    debug!(entity = %entity, error = %err, "push channel connect failed");
                }
            }
            let _ = state_tx.send_replace(ChannelState::Reconnecting);
            // Jittered backoff with a hard floor: repeated immediate closes
            // never spin faster than the initial delay.
            let delay = jittered_backoff(backoff, reconnect.jitter_ms);
            tokio::select! {
                _ = shutdown_signal(&mut shutdown_rx) => break,
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
            }
            backoff = ((backoff as f64 * reconnect.multiplier) as u64)
                .clamp(reconnect.initial_ms, reconnect.max_ms);
        }
        let _ = state_tx.send_replace(ChannelState::Closed);
    })
}

async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Owner dropped without signalling; treat as shutdown.
            return;
        }
    }
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    base_ms.saturating_add(nanos % jitter_ms)
}
