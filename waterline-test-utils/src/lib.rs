//! Waterline Test Utilities
//!
//! Centralized test infrastructure for the Waterline workspace:
//! - Proptest generators for entities, keys, and change events
//! - Scripted fetchers for exercising the query cache without a network
//! - Fixture builders for common records

// Re-export core types for convenience
pub use waterline_core::{
    Alert, AlertSeverity, ChangeEvent, ChangeOp, Community, DashboardStats, EntityKind,
    GatewayError, KeyPattern, Node, NodeKind, NodeStatus, Region, ResourceKey, SyncError,
    SyncResult, Timestamp,
};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use waterline_cache::Fetcher;

// ============================================================================
// SCRIPTED FETCHERS
// ============================================================================

/// Fetcher that replays a script of responses in order, counting calls.
///
/// When the script runs dry the last response is repeated, so a test can
/// script one failure followed by a success and keep reading the success.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<Value, GatewayError>>>,
    last: Mutex<Option<Result<Value, GatewayError>>>,
    calls: AtomicU32,
}

impl ScriptedFetcher {
    pub fn new(responses: Vec<Result<Value, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    /// A fetcher that always succeeds with the same value.
    pub fn always(value: Value) -> Self {
        Self::new(vec![Ok(value)])
    }

    /// A fetcher that always fails with the same error.
    pub fn failing(err: GatewayError) -> Self {
        Self::new(vec![Err(err)])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Result<Value, GatewayError> {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(response) = script.pop_front() {
            *last = Some(response.clone());
            response
        } else {
            last.clone().unwrap_or_else(|| {
                Err(GatewayError::Unreachable {
                    reason: "script exhausted".to_string(),
                })
            })
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _key: &ResourceKey) -> Result<Value, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next_response()
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Minimal online tank node for collection fixtures.
pub fn tank_node(id: &str) -> Node {
    Node {
        id: id.to_string(),
        name: format!("Tank {}", id),
        community_id: "c1".to_string(),
        kind: NodeKind::Tank,
        status: NodeStatus::Online,
        level_percent: Some(50.0),
        depth_meters: None,
        flow_lpm: None,
        battery_percent: Some(90.0),
        last_seen_at: None,
    }
}

/// Active warning alert against a node.
pub fn active_alert(id: &str, node_id: &str) -> Alert {
    Alert {
        id: id.to_string(),
        node_id: node_id.to_string(),
        severity: AlertSeverity::Warning,
        message: "tank below 20%".to_string(),
        raised_at: chrono::Utc::now(),
        cleared_at: None,
        acknowledged: false,
    }
}

/// Wire-shaped INSERT event for a record.
pub fn insert_event(entity: EntityKind, record: Value) -> ChangeEvent {
    ChangeEvent::new(entity, ChangeOp::Created, Some(record), None)
}

/// Wire-shaped DELETE event for a record id.
pub fn delete_event(entity: EntityKind, id: &str) -> ChangeEvent {
    ChangeEvent::new(
        entity,
        ChangeOp::Deleted,
        None,
        Some(serde_json::json!({ "id": id })),
    )
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Waterline types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a registry-style record id.
    pub fn arb_record_id() -> impl Strategy<Value = String> {
        "[a-z]{1,3}[0-9]{1,4}"
    }

    /// Generate a Timestamp within a reasonable range (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Generate an EntityKind variant.
    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        prop_oneof![
            Just(EntityKind::Nodes),
            Just(EntityKind::Communities),
            Just(EntityKind::Regions),
            Just(EntityKind::Alerts),
            Just(EntityKind::DashboardStats),
        ]
    }

    /// Generate a NodeKind variant.
    pub fn arb_node_kind() -> impl Strategy<Value = NodeKind> {
        prop_oneof![
            Just(NodeKind::Tank),
            Just(NodeKind::Borewell),
            Just(NodeKind::FlowMeter),
        ]
    }

    /// Generate a NodeStatus variant.
    pub fn arb_node_status() -> impl Strategy<Value = NodeStatus> {
        prop_oneof![
            Just(NodeStatus::Online),
            Just(NodeStatus::Offline),
            Just(NodeStatus::Faulty),
        ]
    }

    /// Generate an AlertSeverity variant.
    pub fn arb_alert_severity() -> impl Strategy<Value = AlertSeverity> {
        prop_oneof![
            Just(AlertSeverity::Info),
            Just(AlertSeverity::Warning),
            Just(AlertSeverity::Critical),
        ]
    }

    /// Generate a Node struct.
    pub fn arb_node() -> impl Strategy<Value = Node> {
        (
            arb_record_id(),
            "[a-zA-Z0-9 ]{1,40}",
            arb_record_id(),
            arb_node_kind(),
            arb_node_status(),
            prop::option::of(0.0f64..100.0),
            prop::option::of(0.0f64..150.0),
            prop::option::of(0.0f64..500.0),
        )
            .prop_map(
                |(id, name, community_id, kind, status, level, depth, flow)| Node {
                    id,
                    name,
                    community_id,
                    kind,
                    status,
                    level_percent: level,
                    depth_meters: depth,
                    flow_lpm: flow,
                    battery_percent: None,
                    last_seen_at: None,
                },
            )
    }

    /// Generate an Alert struct.
    pub fn arb_alert() -> impl Strategy<Value = Alert> {
        (
            arb_record_id(),
            arb_record_id(),
            arb_alert_severity(),
            "[a-zA-Z0-9 ]{1,80}",
            arb_timestamp(),
            prop::option::of(arb_timestamp()),
            any::<bool>(),
        )
            .prop_map(
                |(id, node_id, severity, message, raised_at, cleared_at, acknowledged)| Alert {
                    id,
                    node_id,
                    severity,
                    message,
                    raised_at,
                    cleared_at,
                    acknowledged,
                },
            )
    }

    /// Generate a resource key with 0-3 parameters.
    pub fn arb_resource_key() -> impl Strategy<Value = ResourceKey> {
        (
            arb_entity_kind(),
            prop::collection::vec(("[a-z]{1,8}", "[a-z0-9]{1,8}"), 0..3),
        )
            .prop_map(|(entity, params)| {
                params
                    .into_iter()
                    .fold(ResourceKey::new(entity), |key, (name, value)| {
                        key.with_param(name, value)
                    })
            })
    }

    /// Generate a ChangeOp variant, including unknown operations.
    pub fn arb_change_op() -> impl Strategy<Value = ChangeOp> {
        prop_oneof![
            Just(ChangeOp::Created),
            Just(ChangeOp::Updated),
            Just(ChangeOp::Deleted),
            "[A-Z]{3,10}".prop_map(ChangeOp::Other),
        ]
    }

    /// Generate a change event whose payload carries a record id.
    pub fn arb_change_event() -> impl Strategy<Value = ChangeEvent> {
        (arb_entity_kind(), arb_change_op(), arb_record_id()).prop_map(|(entity, op, id)| {
            let record = serde_json::json!({ "id": id });
            match op {
                ChangeOp::Deleted => ChangeEvent::new(entity, op, None, Some(record)),
                _ => ChangeEvent::new(entity, op, Some(record), None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_fetcher_replays_then_repeats_last() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(GatewayError::ServerError { status: 500 }),
            Ok(json!([1])),
        ]);
        let key = ResourceKey::new(EntityKind::Nodes);
        assert!(fetcher.fetch(&key).await.is_err());
        assert_eq!(fetcher.fetch(&key).await.expect("scripted ok"), json!([1]));
        // Script exhausted: the last response repeats.
        assert_eq!(fetcher.fetch(&key).await.expect("repeated ok"), json!([1]));
        assert_eq!(fetcher.calls(), 3);
    }

    #[test]
    fn test_fixtures_are_wire_shaped() {
        let node = tank_node("n1");
        let value = serde_json::to_value(&node).expect("serialize");
        assert_eq!(value["id"], json!("n1"));
        assert_eq!(value["kind"], json!("tank"));

        let event = delete_event(EntityKind::Nodes, "n1");
        assert_eq!(event.record_id(), Some("n1"));
    }
}
