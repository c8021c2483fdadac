//! Error types for Waterline operations

use thiserror::Error;

/// HTTP gateway errors, classified by failure mode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// No response: connect failure, DNS failure, or timeout.
    #[error("Backend unreachable: {reason}")]
    Unreachable { reason: String },

    /// HTTP 401 or 403. Callers decide per resource whether this degrades
    /// to a default value or propagates.
    #[error("Unauthorized")]
    Unauthorized,

    /// Any other 4xx.
    #[error("Request rejected with status {status}: {detail}")]
    ClientError { status: u16, detail: String },

    /// 5xx.
    #[error("Backend failed with status {status}")]
    ServerError { status: u16 },

    /// Payload did not decode or violated the response contract.
    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// The request's cancel handle was tripped. Swallowed by the
    /// cancelling context, never surfaced to consumers.
    #[error("Request cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Classify a response status code. Success codes are not errors and
    /// must be handled before calling this.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        match status {
            401 | 403 => GatewayError::Unauthorized,
            400..=499 => GatewayError::ClientError {
                status,
                detail: detail.into(),
            },
            _ => GatewayError::ServerError { status },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, GatewayError::Unauthorized)
    }

    /// Whether a retry could plausibly succeed. Unauthorized and client
    /// errors are not retried; repeating them only makes noise.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Unreachable { .. } | GatewayError::ServerError { .. }
        )
    }

    /// User-safe message; raw transport detail never reaches consumers.
    pub fn user_message(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized => "please sign in",
            GatewayError::Cancelled => "cancelled",
            _ => "temporarily unavailable",
        }
    }
}

/// Push channel errors. These drive reconnection, not user-visible failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel connect failed for {entity}: {reason}")]
    Connect { entity: String, reason: String },

    #[error("Channel dropped for {entity}: {reason}")]
    Dropped { entity: String, reason: String },

    #[error("Undecodable event on {entity} channel: {reason}")]
    Decode { entity: String, reason: String },

    #[error("Channel closed")]
    Closed,
}

/// Query cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// A fetch completed after a newer fetch started for the same key.
    /// Internal discard condition, never surfaced to consumers.
    #[error("Fetch superseded for {key} (sequence {sequence})")]
    Superseded { key: String, sequence: u64 },
}

/// Master error type for the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for sync-layer operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// TESTS
// =============================================================================
