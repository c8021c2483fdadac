//! Configuration loading for the Waterline sync client.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use waterline_cache::RetryPolicy;
use waterline_core::{DurationMs, EntityKind};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Backend base URL including the API version segment,
    /// e.g. `http://localhost:8000/api/v1`.
    pub api_base_url: String,
    /// Push channel endpoint, e.g. `ws://localhost:8000/realtime`.
    pub ws_endpoint: String,
    pub request_timeout_ms: DurationMs,
    /// Interval-driven background refetch period. Optional; absent means
    /// reads are purely stale-time driven.
    pub refetch_interval_ms: Option<DurationMs>,
    pub stale_times: StaleTimes,
    pub retry: RetryConfig,
    pub reconnect: ReconnectConfig,
    pub auth: AuthConfig,
}

/// Per-entity freshness windows, all in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaleTimes {
    pub nodes_ms: DurationMs,
    pub communities_ms: DurationMs,
    pub regions_ms: DurationMs,
    pub alerts_ms: DurationMs,
    pub dashboard_ms: DurationMs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Additional attempts after the first failure, for retryable errors.
    pub attempts: u32,
    pub backoff_ms: DurationMs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: DurationMs,
    pub max_ms: DurationMs,
    pub multiplier: f64,
    pub jitter_ms: DurationMs,
}

/// Session-store keys the bearer token is resolved from.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Provider-issued session key, e.g. `wl-auth-token`.
    pub session_key: String,
    /// Development-bypass key; its value must carry the bypass prefix.
    pub dev_bypass_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or WATERLINE_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Failed to build HTTP client: {reason}")]
    HttpClient { reason: String },
}

impl SyncConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: SyncConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.ws_endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ws_endpoint",
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.refetch_interval_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "refetch_interval_ms",
                reason: "must be > 0 when present".to_string(),
            });
        }
        for (field, value) in [
            ("stale_times.nodes_ms", self.stale_times.nodes_ms),
            ("stale_times.communities_ms", self.stale_times.communities_ms),
            ("stale_times.regions_ms", self.stale_times.regions_ms),
            ("stale_times.alerts_ms", self.stale_times.alerts_ms),
            ("stale_times.dashboard_ms", self.stale_times.dashboard_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be > 0".to_string(),
                });
            }
        }
        if self.retry.attempts > 0 && self.retry.backoff_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.backoff_ms",
                reason: "must be > 0 when attempts > 0".to_string(),
            });
        }
        if self.reconnect.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.multiplier",
                reason: "must be >= 1.0".to_string(),
            });
        }
        if self.auth.session_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "auth.session_key",
                reason: "must not be empty".to_string(),
            });
        }
        if self.auth.dev_bypass_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "auth.dev_bypass_key",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refetch_interval(&self) -> Option<Duration> {
        self.refetch_interval_ms.map(Duration::from_millis)
    }

    /// Freshness window for one entity family.
    pub fn stale_time_for(&self, entity: EntityKind) -> Duration {
        let ms = match entity {
            EntityKind::Nodes => self.stale_times.nodes_ms,
            EntityKind::Communities => self.stale_times.communities_ms,
            EntityKind::Regions => self.stale_times.regions_ms,
            EntityKind::Alerts => self.stale_times.alerts_ms,
            EntityKind::DashboardStats => self.stale_times.dashboard_ms,
        };
        Duration::from_millis(ms)
    }

    /// Retry policy for idempotent public reads. Auth-sensitive resources
    /// use `RetryPolicy::None` instead.
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry.attempts == 0 {
            RetryPolicy::None
        } else {
            RetryPolicy::Fixed {
                attempts: self.retry.attempts,
                backoff: Duration::from_millis(self.retry.backoff_ms),
            }
        }
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("WATERLINE_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
