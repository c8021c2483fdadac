//! Error types for the sync client.

use crate::config::ConfigError;
use waterline_core::SyncError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}
