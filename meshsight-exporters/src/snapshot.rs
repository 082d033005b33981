//! JSON snapshot of a crawl, for time-series ingestion.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use meshsight_common::NodeStatus;
use meshsight_crawler::{NetworkMap, NodeAddress, ResourceKind, ResourceValue};
use serde::{Deserialize, Serialize};

use crate::error::ExportError;

/// Everything known about one node after a crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub address: NodeAddress,
    pub status: NodeStatus,
    pub application: Option<String>,
    pub version: Option<String>,
    pub ping_secs: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub neighbors: Vec<NodeAddress>,
    /// Non-null readings keyed by resource label.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceValue>,
}

/// A whole crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSnapshot {
    /// RFC 3339 time the snapshot was taken.
    pub taken_at: String,
    pub nodes: Vec<NodeSnapshot>,
}

/// Read every resource of every node into a snapshot.
pub async fn take_snapshot(map: &mut NetworkMap) -> MapSnapshot {
    let mut nodes = Vec::with_capacity(map.len());

    for node in map.nodes_mut() {
        let mut resources = BTreeMap::new();
        for kind in ResourceKind::ALL {
            if let Some(value) = node.resource(kind).await.value {
                resources.insert(kind.label().to_string(), value);
            }
        }

        nodes.push(NodeSnapshot {
            address: node.address(),
            status: node.status(),
            application: node.application().map(str::to_string),
            version: node.firmware_version().map(str::to_string),
            ping_secs: node.ping_secs(),
            neighbors: node.known_neighbors().to_vec(),
            resources,
        });
    }

    MapSnapshot {
        taken_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        nodes,
    }
}

/// Serialize a snapshot as pretty-printed JSON.
pub fn to_json(snapshot: &MapSnapshot) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}
