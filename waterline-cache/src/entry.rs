//! Cache entry state and the snapshot returned to readers.

use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use waterline_core::{GatewayError, Timestamp};

/// Patch queued while a fetch is in flight, replayed on completion.
pub(crate) type QueuedPatch = Box<dyn FnOnce(&mut Value) + Send>;

/// Internal per-key slot. All access goes through the store's lock.
pub(crate) struct Slot {
    pub value: Option<Value>,
    pub fetched_at: Option<Timestamp>,
    pub fresh_until: Option<Timestamp>,
    pub last_error: Option<GatewayError>,
    /// Sequence of the most recently started fetch for this key. A
    /// completion carrying a lower sequence is superseded and discarded.
    pub latest_seq: u64,
    /// Whether the fetch with `latest_seq` is still in flight.
    pub pending: bool,
    /// Patches received while a fetch was pending, in arrival order.
    pub queued_patches: Vec<QueuedPatch>,
    /// Broadcasts the sequence of the last settled fetch so awaited reads
    /// can coalesce onto an in-flight one.
    pub done_tx: watch::Sender<u64>,
    /// Hook bindings currently holding this entry.
    pub refs: usize,
    pub last_touched: Timestamp,
}

impl Slot {
    pub fn new() -> Self {
        let (done_tx, _) = watch::channel(0);
        Self {
            value: None,
            fetched_at: None,
            fresh_until: None,
            last_error: None,
            latest_seq: 0,
            pending: false,
            queued_patches: Vec::new(),
            done_tx,
            refs: 0,
            last_touched: Utc::now(),
        }
    }

    pub fn is_fresh_at(&self, now: Timestamp) -> bool {
        matches!((self.value.as_ref(), self.fresh_until), (Some(_), Some(deadline)) if now < deadline)
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            value: self.value.clone(),
            fetched_at: self.fetched_at,
            fresh_until: self.fresh_until,
            loading: self.pending,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read view of one cache entry, carrying freshness metadata.
///
/// Snapshots are cheap observations, not live references: a later fetch or
/// patch does not mutate an already-taken snapshot.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    /// Last successfully fetched (and since patched) value, if any.
    pub value: Option<Value>,
    pub fetched_at: Option<Timestamp>,
    pub fresh_until: Option<Timestamp>,
    /// A fetch for this key is in flight.
    pub loading: bool,
    /// Error from the most recent settled fetch, cleared on success. A
    /// stale value stays visible alongside this.
    pub last_error: Option<GatewayError>,
}

impl CacheSnapshot {
    /// Snapshot of a key the cache has never seen.
    pub fn empty() -> Self {
        Self {
            value: None,
            fetched_at: None,
            fresh_until: None,
            loading: false,
            last_error: None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!((self.value.as_ref(), self.fresh_until), (Some(_), Some(deadline)) if Utc::now() < deadline)
    }

    /// Duration since the value was fetched, zero when never fetched.
    pub fn staleness(&self) -> Duration {
        match self.fetched_at {
            Some(fetched_at) => {
                let now = Utc::now();
                if now > fetched_at {
                    (now - fetched_at).to_std().unwrap_or(Duration::ZERO)
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_slot_is_cold() {
        let slot = Slot::new();
        assert!(slot.value.is_none());
        assert!(!slot.pending);
        assert!(!slot.is_fresh_at(Utc::now()));
        assert_eq!(slot.refs, 0);
    }

    #[test]
    fn test_freshness_deadline() {
        let mut slot = Slot::new();
        let now = Utc::now();
        slot.value = Some(json!([]));
        slot.fresh_until = Some(now + chrono::Duration::seconds(60));
        assert!(slot.is_fresh_at(now));
        assert!(!slot.is_fresh_at(now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_value_required_for_freshness() {
        let mut slot = Slot::new();
        slot.fresh_until = Some(Utc::now() + chrono::Duration::seconds(60));
        // A deadline without a value is not fresh.
        assert!(!slot.is_fresh_at(Utc::now()));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut slot = Slot::new();
        slot.value = Some(json!([{"id": "n1"}]));
        let snapshot = slot.snapshot();
        slot.value = Some(json!([]));
        assert_eq!(snapshot.value, Some(json!([{"id": "n1"}])));
    }

    #[test]
    fn test_empty_snapshot_staleness_zero() {
        let snapshot = CacheSnapshot::empty();
        assert_eq!(snapshot.staleness(), Duration::ZERO);
        assert!(!snapshot.is_fresh());
    }
}
