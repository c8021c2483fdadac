//! The query cache store.
//!
//! Routes reads through the freshness check, enforces per-key request
//! coalescing, tags every fetch with a monotonic sequence number, and
//! reconciles push-delivered change events into cached values.
//!
//! Three triggers feed the single fetch path:
//! - `get`: fetches when the entry is missing or stale and nothing is
//!   pending; otherwise coalesces.
//! - `refetch`: fetches regardless of staleness (interval timers); still
//!   coalesces onto a pending fetch.
//! - `refresh`: always starts a new fetch, superseding any pending one;
//!   the superseded completion is discarded by sequence number.

use crate::entry::{CacheSnapshot, Slot};
use crate::policy::{CacheConfig, RetryPolicy};
use crate::traits::{CacheStats, Fetcher};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use waterline_core::{CacheError, ChangeEvent, ChangeOp, GatewayError, KeyPattern, ResourceKey};

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    coalesced: u64,
    discarded: u64,
    evictions: u64,
}

struct Inner {
    slots: HashMap<ResourceKey, Slot>,
    counters: Counters,
}

/// The query cache. Cheap to clone; clones share one slot map.
///
/// Constructed explicitly and passed by reference so tests can create
/// isolated instances; there is no process-wide singleton.
pub struct QueryCache {
    inner: Arc<Mutex<Inner>>,
    config: CacheConfig,
}

impl Clone for QueryCache {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: self.config.clone(),
        }
    }
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: HashMap::new(),
                counters: Counters::default(),
            })),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Observe a key without triggering any fetch.
    pub async fn snapshot(&self, key: &ResourceKey) -> CacheSnapshot {
        let guard = self.inner.lock().await;
        guard
            .slots
            .get(key)
            .map(Slot::snapshot)
            .unwrap_or_else(CacheSnapshot::empty)
    }

    /// Read a key, returning the current entry immediately and triggering a
    /// background fetch when the entry is missing or past its freshness
    /// deadline and no fetch is already pending for the key.
    pub async fn get(
        &self,
        key: &ResourceKey,
        fetcher: Arc<dyn Fetcher>,
        stale_time: Duration,
    ) -> CacheSnapshot {
        self.get_with(key, fetcher, stale_time, self.config.default_retry.clone())
            .await
    }

    pub async fn get_with(
        &self,
        key: &ResourceKey,
        fetcher: Arc<dyn Fetcher>,
        stale_time: Duration,
        retry: RetryPolicy,
    ) -> CacheSnapshot {
        let now = Utc::now();
        let (snapshot, start) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let slot = inner.slots.entry(key.clone()).or_insert_with(Slot::new);
            slot.last_touched = now;
            let fresh = slot.is_fresh_at(now);
            if fresh {
                inner.counters.hits += 1;
            } else {
                inner.counters.misses += 1;
            }
            let mut start = None;
            if !fresh {
                if slot.pending {
                    inner.counters.coalesced += 1;
                } else {
                    slot.pending = true;
                    slot.latest_seq += 1;
                    start = Some(slot.latest_seq);
                }
            }
            (slot.snapshot(), start)
        };
        if let Some(seq) = start {
            self.spawn_fetch(key.clone(), fetcher, stale_time, retry, seq);
        }
        snapshot
    }

    /// Trigger a background fetch regardless of staleness, coalescing onto
    /// a pending one. Used by interval-driven refetch timers.
    pub async fn refetch(
        &self,
        key: &ResourceKey,
        fetcher: Arc<dyn Fetcher>,
        stale_time: Duration,
    ) {
        self.refetch_with(key, fetcher, stale_time, self.config.default_retry.clone())
            .await
    }

    pub async fn refetch_with(
        &self,
        key: &ResourceKey,
        fetcher: Arc<dyn Fetcher>,
        stale_time: Duration,
        retry: RetryPolicy,
    ) {
        let start = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let slot = inner.slots.entry(key.clone()).or_insert_with(Slot::new);
            slot.last_touched = Utc::now();
            if slot.pending {
                inner.counters.coalesced += 1;
                None
            } else {
                slot.pending = true;
                slot.latest_seq += 1;
                Some(slot.latest_seq)
            }
        };
        if let Some(seq) = start {
            self.spawn_fetch(key.clone(), fetcher, stale_time, retry, seq);
        }
    }

    /// Force a fetch bypassing staleness and await its completion.
    ///
    /// Unlike `get`/`refetch` this starts a new fetch even while one is
    /// pending; the older completion is then superseded and discarded, so
    /// the value observed on return is never older than the refresh.
    pub async fn refresh(
        &self,
        key: &ResourceKey,
        fetcher: Arc<dyn Fetcher>,
        stale_time: Duration,
    ) -> CacheSnapshot {
        self.refresh_with(key, fetcher, stale_time, self.config.default_retry.clone())
            .await
    }

    pub async fn refresh_with(
        &self,
        key: &ResourceKey,
        fetcher: Arc<dyn Fetcher>,
        stale_time: Duration,
        retry: RetryPolicy,
    ) -> CacheSnapshot {
        let (target, mut done_rx) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let slot = inner.slots.entry(key.clone()).or_insert_with(Slot::new);
            slot.last_touched = Utc::now();
            slot.pending = true;
            slot.latest_seq += 1;
            (slot.latest_seq, slot.done_tx.subscribe())
        };
        self.spawn_fetch(key.clone(), fetcher, stale_time, retry, target);
        while *done_rx.borrow() < target {
            if done_rx.changed().await.is_err() {
                // Slot evicted mid-flight; nothing more will settle.
                break;
            }
        }
        self.snapshot(key).await
    }

    /// Mark matching entries stale without fetching. The next read through
    /// `get` observes the staleness and triggers the fetch.
    pub async fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let now = Utc::now();
        let mut guard = self.inner.lock().await;
        let mut count = 0;
        for (key, slot) in guard.slots.iter_mut() {
            if pattern.matches(key) {
                slot.fresh_until = Some(now);
                count += 1;
            }
        }
        if count > 0 {
            debug!(entity = %pattern.entity_kind(), count, "invalidated cache entries");
        }
        count
    }

    /// Apply a pure transformation to a cached value in place, preserving
    /// the freshness deadline. If a fetch for the key is in flight the
    /// patch is queued and replayed on top of the fetch result. Returns
    /// false when the key holds no value to patch.
    pub async fn patch<F>(&self, key: &ResourceKey, updater: F) -> bool
    where
        F: FnOnce(&mut Value) + Send + 'static,
    {
        self.patch_inner(key, updater, false).await
    }

    /// As `patch`, additionally marking the entry stale so the next read
    /// refetches. For patches known to carry partial state.
    pub async fn patch_and_invalidate<F>(&self, key: &ResourceKey, updater: F) -> bool
    where
        F: FnOnce(&mut Value) + Send + 'static,
    {
        self.patch_inner(key, updater, true).await
    }

    async fn patch_inner<F>(&self, key: &ResourceKey, updater: F, mark_stale: bool) -> bool
    where
        F: FnOnce(&mut Value) + Send + 'static,
    {
        let mut guard = self.inner.lock().await;
        let Some(slot) = guard.slots.get_mut(key) else {
            return false;
        };
        let now = Utc::now();
        slot.last_touched = now;
        if mark_stale {
            slot.fresh_until = Some(now);
        }
        if slot.pending {
            slot.queued_patches.push(Box::new(updater));
            return true;
        }
        match slot.value.as_mut() {
            Some(value) => {
                updater(value);
                true
            }
            None => false,
        }
    }

    /// Reconcile a push-delivered change event into every entry of the
    /// matching entity kind. Returns the number of entries touched or
    /// queued. Unknown operations are ignored.
    pub async fn apply_change(&self, event: &ChangeEvent) -> usize {
        if let ChangeOp::Other(op) = &event.op {
            debug!(entity = %event.entity, op = %op, "ignoring unknown change operation");
            return 0;
        }
        let now = Utc::now();
        let mut guard = self.inner.lock().await;
        let mut touched = 0;
        for (key, slot) in guard.slots.iter_mut() {
            if key.entity() != event.entity {
                continue;
            }
            slot.last_touched = now;
            if slot.pending {
                let event = event.clone();
                slot.queued_patches
                    .push(Box::new(move |value| reconcile(value, &event)));
                touched += 1;
            } else if let Some(value) = slot.value.as_mut() {
                reconcile(value, event);
                touched += 1;
            }
        }
        touched
    }

    /// Record a hook binding so sweep will not evict the entry.
    pub async fn retain(&self, key: &ResourceKey) {
        let mut guard = self.inner.lock().await;
        let slot = guard.slots.entry(key.clone()).or_insert_with(Slot::new);
        slot.refs += 1;
    }

    /// Drop a hook binding recorded by `retain`.
    pub async fn release(&self, key: &ResourceKey) {
        let mut guard = self.inner.lock().await;
        if let Some(slot) = guard.slots.get_mut(key) {
            slot.refs = slot.refs.saturating_sub(1);
            slot.last_touched = Utc::now();
        }
    }

    /// Evict unreferenced entries idle beyond the configured limit.
    pub async fn sweep(&self) -> usize {
        let max_idle = chrono::Duration::milliseconds(self.config.max_idle.as_millis() as i64);
        let cutoff = Utc::now() - max_idle;
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let before = inner.slots.len();
        inner
            .slots
            .retain(|_, slot| slot.refs > 0 || slot.pending || slot.last_touched >= cutoff);
        let evicted = before - inner.slots.len();
        inner.counters.evictions += evicted as u64;
        if evicted > 0 {
            debug!(evicted, "swept idle cache entries");
        }
        evicted
    }

    /// Drop every entry. Teardown path; pending completions for dropped
    /// slots settle into nothing.
    pub async fn clear(&self) {
        let mut guard = self.inner.lock().await;
        guard.slots.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let guard = self.inner.lock().await;
        CacheStats {
            hits: guard.counters.hits,
            misses: guard.counters.misses,
            coalesced: guard.counters.coalesced,
            discarded: guard.counters.discarded,
            evictions: guard.counters.evictions,
            entry_count: guard.slots.len() as u64,
        }
    }

    fn spawn_fetch(
        &self,
        key: ResourceKey,
        fetcher: Arc<dyn Fetcher>,
        stale_time: Duration,
        retry: RetryPolicy,
        seq: u64,
    ) {
        let cache = self.clone();
        tokio::spawn(async move {
            cache.run_fetch(key, fetcher, stale_time, retry, seq).await;
        });
    }

    async fn run_fetch(
        &self,
        key: ResourceKey,
        fetcher: Arc<dyn Fetcher>,
        stale_time: Duration,
        retry: RetryPolicy,
        seq: u64,
    ) {
        let mut attempt: u32 = 0;
        let outcome = loop {
            match fetcher.fetch(&key).await {
                Ok(value) => break Ok(value),
                Err(err) => {
                    if err.is_retryable() && attempt < retry.retries() {
                        attempt += 1;
                        debug!(key = %key, attempt, error = %err, "fetch failed, retrying");
                        tokio::time::sleep(retry.backoff()).await;
                        continue;
                    }
                    break Err(err);
                }
            }
        };
        self.settle(&key, seq, stale_time, outcome).await;
    }

    async fn settle(
        &self,
        key: &ResourceKey,
        seq: u64,
        stale_time: Duration,
        outcome: Result<Value, GatewayError>,
    ) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let Some(slot) = inner.slots.get_mut(key) else {
            // Evicted or cleared while in flight.
            return;
        };
        if seq < slot.latest_seq {
            inner.counters.discarded += 1;
            let discard = CacheError::Superseded {
                key: key.to_string(),
                sequence: seq,
            };
            debug!(error = %discard, "discarding superseded fetch completion");
            return;
        }
        slot.pending = false;
        let now = Utc::now();
        match outcome {
            Ok(value) => {
                slot.value = Some(value);
                slot.fetched_at = Some(now);
                slot.fresh_until =
                    Some(now + chrono::Duration::milliseconds(stale_time.as_millis() as i64));
                slot.last_error = None;
            }
            Err(GatewayError::Cancelled) => {
                // The cancelling context swallowed the request; clear the
                // pending flag and leave the entry otherwise untouched.
                debug!(key = %key, "fetch cancelled");
            }
            Err(err) => {
                warn!(key = %key, error = %err, "fetch failed, keeping stale value");
                slot.last_error = Some(err);
            }
        }
        // Queued patches are newer than the fetched read by event order.
        let patches = std::mem::take(&mut slot.queued_patches);
        if let Some(value) = slot.value.as_mut() {
            for patch in patches {
                patch(value);
            }
        }
        let _ = slot.done_tx.send_replace(seq);
    }
}

/// Apply one change event to one cached value.
///
/// Collections are matched by the record's `id` field: Created prepends
/// (replacing any record with the same id), Updated replaces in place and
/// is a no-op for absent records, Deleted removes and is idempotent.
/// Singleton values (the dashboard aggregate) are replaced wholesale on
/// Created/Updated and nulled on Deleted.
fn reconcile(value: &mut Value, event: &ChangeEvent) {
    match &event.op {
        ChangeOp::Created => match value {
            Value::Array(items) => {
                if let Some(new) = event.new.clone() {
                    if let Some(id) = event.record_id() {
                        items.retain(|item| record_id_of(item) != Some(id));
                    }
                    items.insert(0, new);
                }
            }
            single => {
                if let Some(new) = event.new.clone() {
                    *single = new;
                }
            }
        },
        ChangeOp::Updated => match value {
            Value::Array(items) => {
                if let (Some(new), Some(id)) = (event.new.as_ref(), event.record_id()) {
                    if let Some(item) = items.iter_mut().find(|item| record_id_of(item) == Some(id))
                    {
                        *item = new.clone();
                    }
                }
            }
            single => {
                if let Some(new) = event.new.clone() {
                    *single = new;
                }
            }
        },
        ChangeOp::Deleted => match value {
            Value::Array(items) => {
                if let Some(id) = event.record_id() {
                    items.retain(|item| record_id_of(item) != Some(id));
                }
            }
            single => *single = Value::Null,
        },
        ChangeOp::Other(_) => {}
    }
}

fn record_id_of(item: &Value) -> Option<&str> {
    item.get("id").and_then(|v| v.as_str())
}
