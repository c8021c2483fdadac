//! Waterline Core - Entity Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains ONLY data types - no business logic.

use chrono::{DateTime, Utc};

mod change;
mod entities;
mod envelope;
mod error;
mod key;

pub use change::{ChangeEvent, ChangeOp, EntityKind};
pub use entities::{
    Alert, AlertSeverity, Community, DashboardStats, Node, NodeKind, NodeStatus, Region,
};
pub use envelope::{ApiPayload, Envelope, EnvelopeStatus};
pub use error::{CacheError, ChannelError, GatewayError, SyncError, SyncResult};
pub use key::{KeyPattern, ResourceKey};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Record identifier as issued by the device registry.
///
/// Registry ids are opaque strings ("WL-TNK-014", "n1"), not UUIDs; they are
/// compared byte-for-byte when reconciling change events.
pub type RecordId = String;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds for stale-time, refetch-interval, and backoff
/// values. All time knobs in the sync layer share this unit.
pub type DurationMs = u64;
