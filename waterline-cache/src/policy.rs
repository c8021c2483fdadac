//! Cache configuration and retry policy.

use std::time::Duration;

/// Retry policy for failed fetches.
///
/// Auth-sensitive resources use [`RetryPolicy::None`] so a 401 is not
/// repeated; idempotent public reads retry once or twice with backoff.
/// Non-retryable errors (see `GatewayError::is_retryable`) are never
/// retried regardless of policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Fail on the first error.
    None,
    /// Retry up to `attempts` additional times, sleeping `backoff` between
    /// attempts.
    Fixed { attempts: u32, backoff: Duration },
}

impl RetryPolicy {
    /// Number of retries after the initial attempt.
    pub fn retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { attempts, .. } => *attempts,
        }
    }

    pub fn backoff(&self) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { backoff, .. } => *backoff,
        }
    }
}

/// Configuration for the query cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Stale time applied when a read does not specify one.
    pub default_stale_time: Duration,
    /// Retry policy applied when a read does not specify one.
    pub default_retry: RetryPolicy,
    /// Unreferenced entries idle longer than this are evicted by `sweep`.
    pub max_idle: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_stale_time: Duration::from_secs(60),
            default_retry: RetryPolicy::None,
            max_idle: Duration::from_secs(600),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.default_stale_time = stale_time;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_budget() {
        assert_eq!(RetryPolicy::None.retries(), 0);
        let fixed = RetryPolicy::Fixed {
            attempts: 2,
            backoff: Duration::from_millis(50),
        };
        assert_eq!(fixed.retries(), 2);
        assert_eq!(fixed.backoff(), Duration::from_millis(50));
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new()
            .with_stale_time(Duration::from_secs(30))
            .with_retry(RetryPolicy::Fixed {
                attempts: 1,
                backoff: Duration::from_millis(100),
            })
            .with_max_idle(Duration::from_secs(120));
        assert_eq!(config.default_stale_time, Duration::from_secs(30));
        assert_eq!(config.default_retry.retries(), 1);
        assert_eq!(config.max_idle, Duration::from_secs(120));
    }
}
