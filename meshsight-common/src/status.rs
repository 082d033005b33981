//! Node availability as seen by one crawl.

use serde::{Deserialize, Serialize};

/// Availability of a mesh node after its liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// The node answered the liveness probe.
    Online,
    /// The probe failed or returned garbage.
    Unreachable,
}

impl NodeStatus {
    /// Whether resources may be queried at all.
    pub fn is_online(&self) -> bool {
        matches!(self, NodeStatus::Online)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Online => write!(f, "online"),
            NodeStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}
