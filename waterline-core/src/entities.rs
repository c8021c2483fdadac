//! Telemetry entity records.
//!
//! Wire shapes for the entities the sync layer caches: monitoring nodes,
//! the communities and regions they belong to, active alerts, and the
//! dashboard aggregate. Field names match the backend's JSON contract.

use crate::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// What a monitoring node measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Overhead or ground-level storage tank (level percent).
    Tank,
    /// Borewell with a depth probe (water column meters).
    Borewell,
    /// Inline flow meter (liters per minute).
    FlowMeter,
}

/// Reported health of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    /// Reporting, but readings are outside plausible bounds.
    Faulty,
}

/// A deployed monitoring node and its latest telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: RecordId,
    pub name: String,
    pub community_id: RecordId,
    pub kind: NodeKind,
    pub status: NodeStatus,
    /// Tank fill level, percent of capacity. Tanks only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_percent: Option<f64>,
    /// Water column depth in meters. Borewells only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_meters: Option<f64>,
    /// Flow rate in liters per minute. Flow meters only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_lpm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<Timestamp>,
}

/// A community served by one or more nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: RecordId,
    pub name: String,
    pub region_id: RecordId,
    pub household_count: u32,
}

/// An administrative region grouping communities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RecordId,
    pub name: String,
    pub district: String,
}

/// Alert severity, ordered least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// An alert raised against a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: RecordId,
    pub node_id: RecordId,
    pub severity: AlertSeverity,
    pub message: String,
    pub raised_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<Timestamp>,
    #[serde(default)]
    pub acknowledged: bool,
}

impl Alert {
    /// An alert is active until it is cleared.
    pub fn is_active(&self) -> bool {
        self.cleared_at.is_none()
    }
}

/// The dashboard aggregate: a single record, not a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DashboardStats {
    pub nodes_online: u32,
    pub nodes_offline: u32,
    pub nodes_faulty: u32,
    pub open_alerts: u32,
    /// Mean tank fill level across online tanks, percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_tank_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<Timestamp>,
}

impl DashboardStats {
    pub fn total_nodes(&self) -> u32 {
        self.nodes_online + self.nodes_offline + self.nodes_faulty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_node_roundtrip() {
        let node = Node {
            id: "WL-TNK-014".to_string(),
            name: "Panchayat tank 14".to_string(),
            community_id: "c3".to_string(),
            kind: NodeKind::Tank,
            status: NodeStatus::Online,
            level_percent: Some(72.5),
            depth_meters: None,
            flow_lpm: None,
            battery_percent: Some(88.0),
            last_seen_at: Some(Utc::now()),
        };
        let json = serde_json::to_string(&node).expect("serialize");
        let back: Node = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(node, back);
    }

    #[test]
    fn test_node_optional_fields_absent_on_wire() {
        let wire = r#"{"id":"n1","name":"Borewell 1","community_id":"c1",
                       "kind":"borewell","status":"offline"}"#;
        let node: Node = serde_json::from_str(wire).expect("deserialize");
        assert_eq!(node.kind, NodeKind::Borewell);
        assert!(node.level_percent.is_none());
        assert!(node.last_seen_at.is_none());
    }

    #[test]
    fn test_alert_active_until_cleared() {
        let mut alert = Alert {
            id: "a1".to_string(),
            node_id: "n1".to_string(),
            severity: AlertSeverity::Warning,
            message: "tank below 20%".to_string(),
            raised_at: Utc::now(),
            cleared_at: None,
            acknowledged: false,
        };
        assert!(alert.is_active());
        alert.cleared_at = Some(Utc::now());
        assert!(!alert.is_active());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::Warning);
        assert!(AlertSeverity::Warning > AlertSeverity::Info);
    }

    #[test]
    fn test_dashboard_stats_defaults_zeroed() {
        let stats = DashboardStats::default();
        assert_eq!(stats.total_nodes(), 0);
        assert_eq!(stats.open_alerts, 0);
        assert!(stats.mean_tank_level.is_none());
    }
}
