//! Change events delivered over the push channel.
//!
//! The push channel broadcasts table-level change notifications of the wire
//! shape `{eventType: "INSERT"|"UPDATE"|"DELETE", new?: Record, old?: Record}`.
//! This module decodes them into typed [`ChangeEvent`]s keyed by entity
//! family, ready for cache reconciliation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The entity families the sync layer tracks, each mapping to one backend
/// table and one push-channel topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Nodes,
    Communities,
    Regions,
    Alerts,
    DashboardStats,
}

impl EntityKind {
    /// Wire table name used by the REST paths and the push channel.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Nodes => "nodes",
            EntityKind::Communities => "communities",
            EntityKind::Regions => "regions",
            EntityKind::Alerts => "alerts",
            EntityKind::DashboardStats => "dashboard_stats",
        }
    }

    /// Resolve a wire table name back to an entity kind.
    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "nodes" => Some(EntityKind::Nodes),
            "communities" => Some(EntityKind::Communities),
            "regions" => Some(EntityKind::Regions),
            "alerts" => Some(EntityKind::Alerts),
            "dashboard_stats" => Some(EntityKind::DashboardStats),
            _ => None,
        }
    }

    /// Whether this family caches a single record rather than a collection.
    pub fn is_singleton(&self) -> bool {
        matches!(self, EntityKind::DashboardStats)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Operation carried by a change event.
///
/// Unknown operations are preserved, not rejected: the reconciler ignores
/// them so a newer backend cannot crash an older client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    Created,
    Updated,
    Deleted,
    Other(String),
}

impl ChangeOp {
    fn from_wire(event_type: &str) -> Self {
        match event_type {
            "INSERT" => ChangeOp::Created,
            "UPDATE" => ChangeOp::Updated,
            "DELETE" => ChangeOp::Deleted,
            other => ChangeOp::Other(other.to_string()),
        }
    }
}

/// A decoded change notification for one entity family.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub op: ChangeOp,
    /// Record state after the change (INSERT/UPDATE).
    pub new: Option<Value>,
    /// Record state before the change (UPDATE/DELETE).
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn new(entity: EntityKind, op: ChangeOp, new: Option<Value>, old: Option<Value>) -> Self {
        Self {
            entity,
            op,
            new,
            old,
        }
    }

    /// Decode the push channel's wire shape. Returns None when the payload
    /// is not an object or carries no `eventType` field.
    pub fn from_wire(entity: EntityKind, payload: &Value) -> Option<Self> {
        let obj = payload.as_object()?;
        let event_type = obj.get("eventType")?.as_str()?;
        Some(Self {
            entity,
            op: ChangeOp::from_wire(event_type),
            new: obj.get("new").filter(|v| !v.is_null()).cloned(),
            old: obj.get("old").filter(|v| !v.is_null()).cloned(),
        })
    }

    /// Identity of the affected record, read from `new` then `old`.
    pub fn record_id(&self) -> Option<&str> {
        self.new
            .as_ref()
            .and_then(|v| v.get("id"))
            .or_else(|| self.old.as_ref().and_then(|v| v.get("id")))
            .and_then(|v| v.as_str())
    }
}
