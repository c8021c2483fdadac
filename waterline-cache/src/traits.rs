//! Fetcher seam and cache statistics.

use async_trait::async_trait;
use serde_json::Value;
use waterline_core::{GatewayError, ResourceKey};

/// Source of truth for one read path.
///
/// Implementations perform the actual backend call for a resource key and
/// return the normalized payload (envelope already unwrapped). The cache
/// never talks to the network itself; it only routes through this trait.
///
/// Auth degradation composes here: a fetcher for an auth-optional resource
/// maps `Unauthorized` to its safe default before the cache ever sees the
/// error.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &ResourceKey) -> Result<Value, GatewayError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered by a fresh cached value.
    pub hits: u64,
    /// Reads that found no value or a stale one.
    pub misses: u64,
    /// Reads that needed a fetch but coalesced onto one already pending.
    pub coalesced: u64,
    /// Fetch completions discarded because a newer fetch had started.
    pub discarded: u64,
    /// Entries evicted by sweep.
    pub evictions: u64,
    /// Entries currently held.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
