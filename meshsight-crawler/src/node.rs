//! A single monitored mesh node.

use std::sync::Arc;
use std::time::{Duration, Instant};

use meshsight_common::NodeStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::timeout;

use crate::NodeAddress;
use crate::error::NodeError;
use crate::resource::{ResourceKind, ResourceReading, ResourceState};
use crate::transport::Transport;
use crate::version;

/// Firmware older than this can be bricked by a neighbors request.
pub const NEIGHBOR_DISCOVERY_MIN_VERSION: &str = "2.16";

static HELLO_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+) version (\S+)$").unwrap());

/// What the liveness probe learned about a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeIdentity {
    /// Application name, `None` if the probe failed.
    pub application: Option<String>,
    /// Dotted firmware version, `None` if the probe failed.
    pub firmware_version: Option<String>,
    /// Round-trip time of the probe in seconds.
    pub ping_secs: f64,
}

/// Transport handle for one node with a per-request time limit.
#[derive(Clone)]
pub struct NodeLink {
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
}

impl NodeLink {
    pub fn new(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        Self {
            transport,
            request_timeout,
        }
    }

    /// Read a resource from the node.
    pub async fn get(&self, resource: &str) -> Result<String, NodeError> {
        timeout(self.request_timeout, self.transport.get(resource))
            .await
            .map_err(|_| self.timeout_error(resource))?
            .map_err(NodeError::from)
    }

    /// Write to a resource on the node.
    pub async fn post(&self, resource: &str, data: &str) -> Result<String, NodeError> {
        timeout(self.request_timeout, self.transport.post(resource, data))
            .await
            .map_err(|_| self.timeout_error(resource))?
            .map_err(NodeError::from)
    }

    fn timeout_error(&self, resource: &str) -> NodeError {
        NodeError::Timeout {
            resource: resource.to_string(),
            secs: self.request_timeout.as_secs(),
        }
    }
}

/// A mesh participant: identity, neighbors, and memoized resources.
pub struct MonitoredNode {
    address: NodeAddress,
    identity: NodeIdentity,
    link: NodeLink,
    neighbors: Option<Vec<NodeAddress>>,
    resources: [ResourceState; ResourceKind::COUNT],
}

impl MonitoredNode {
    /// Create a node and run its liveness probe.
    ///
    /// A failed probe does not fail construction: the node is returned with
    /// unknown application and firmware, which disables every resource and
    /// neighbor discovery.
    pub async fn connect(address: NodeAddress, link: NodeLink) -> Self {
        let started = Instant::now();
        let reply = link.get("hello").await;
        let ping_secs = started.elapsed().as_secs_f64();

        let (application, firmware_version) = match reply {
            Ok(reply) => match parse_hello(&reply) {
                Some((application, version)) => (Some(application), Some(version)),
                None => {
                    tracing::warn!(address, reply = %reply.trim(), "Unexpected hello reply");
                    (None, None)
                }
            },
            Err(e) => {
                tracing::warn!(address, error = %e, "Liveness probe failed");
                (None, None)
            }
        };

        tracing::debug!(
            address,
            application = ?application,
            version = ?firmware_version,
            ping_secs,
            "Probed node"
        );

        Self {
            address,
            identity: NodeIdentity {
                application,
                firmware_version,
                ping_secs,
            },
            link,
            neighbors: None,
            resources: Default::default(),
        }
    }

    /// A node whose liveness probe never completed.
    ///
    /// Like a failed probe, this gates off every resource and neighbor
    /// discovery.
    pub fn unreachable(address: NodeAddress, link: NodeLink, ping_secs: f64) -> Self {
        Self {
            address,
            identity: NodeIdentity {
                application: None,
                firmware_version: None,
                ping_secs,
            },
            link,
            neighbors: None,
            resources: Default::default(),
        }
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn application(&self) -> Option<&str> {
        self.identity.application.as_deref()
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.identity.firmware_version.as_deref()
    }

    pub fn ping_secs(&self) -> f64 {
        self.identity.ping_secs
    }

    /// Availability according to the liveness probe.
    pub fn status(&self) -> NodeStatus {
        if self.identity.firmware_version.is_some() {
            NodeStatus::Online
        } else {
            NodeStatus::Unreachable
        }
    }

    /// Whether the neighbors request is safe for this firmware.
    pub fn supports_neighbor_discovery(&self) -> bool {
        version::at_least(self.firmware_version(), NEIGHBOR_DISCOVERY_MIN_VERSION)
    }

    /// Discover the node's neighbor addresses.
    ///
    /// Never issues the request to firmware older than
    /// [`NEIGHBOR_DISCOVERY_MIN_VERSION`]. After one successful request the
    /// list is memoized and returned without further traffic.
    pub async fn neighbors(&mut self) -> Result<&[NodeAddress], NodeError> {
        if !self.supports_neighbor_discovery() {
            return Ok(&[]);
        }

        if self.neighbors.is_none() {
            let reply = self.link.get("radio/neighbors").await?;
            let neighbors = parse_neighbors(&reply);
            tracing::debug!(address = self.address, neighbors = ?neighbors, "Discovered neighbors");
            self.neighbors = Some(neighbors);
        }

        Ok(self.known_neighbors())
    }

    /// Neighbors discovered so far (empty if never discovered).
    pub fn known_neighbors(&self) -> &[NodeAddress] {
        self.neighbors.as_deref().unwrap_or(&[])
    }

    /// Read a resource, fetching it from the node if it is not cached yet.
    ///
    /// Gated-off resources return `None` without any request. A failed
    /// fetch is logged and returns `None`; it will be fetched again on the
    /// next read.
    pub async fn resource(&mut self, kind: ResourceKind) -> ResourceReading {
        if !kind.descriptor().supports(&self.identity) {
            tracing::trace!(address = self.address, resource = %kind, "Resource not supported");
            return ResourceReading::unavailable();
        }

        let slot = kind.index();
        if let Some(value) = self.resources[slot].cached() {
            return ResourceReading {
                value: Some(value.clone()),
                freshly_fetched: false,
            };
        }

        match kind.fetch(&self.identity, &self.link).await {
            Ok(value) => {
                self.resources[slot].store(value.clone());
                ResourceReading {
                    value: Some(value),
                    freshly_fetched: true,
                }
            }
            Err(e) => {
                let failures = self.resources[slot].record_failure();
                if e.is_incomplete() {
                    tracing::debug!(
                        address = self.address,
                        resource = %kind,
                        failures,
                        error = %e,
                        "Resource has no value yet"
                    );
                } else {
                    tracing::warn!(
                        address = self.address,
                        resource = %kind,
                        failures,
                        error = %e,
                        "Resource fetch failed"
                    );
                }
                ResourceReading::unavailable()
            }
        }
    }

    /// Memoization state of a resource.
    pub fn resource_state(&self, kind: ResourceKind) -> &ResourceState {
        &self.resources[kind.index()]
    }
}

impl std::fmt::Debug for MonitoredNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoredNode")
            .field("address", &self.address)
            .field("identity", &self.identity)
            .field("neighbors", &self.neighbors)
            .finish_non_exhaustive()
    }
}

/// Split a hello reply into `(application, version)`.
pub fn parse_hello(reply: &str) -> Option<(String, String)> {
    let caps = HELLO_REGEX.captures(reply.trim())?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Parse a `radio/neighbors` table.
///
/// Rows have exactly six `" | "`-separated fields; the fourth is the
/// neighbor's address. Other rows, including the header, are skipped.
pub fn parse_neighbors(reply: &str) -> Vec<NodeAddress> {
    reply
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(" | ").collect();
            if fields.len() != 6 {
                return None;
            }
            fields[3].trim().parse::<NodeAddress>().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockMesh, MockNode, neighbor_table};
    use crate::resource::{LEGACY_UPTIME_OFFSET_SECS, ResourceValue};
    use crate::transport::transport_for;

    fn link(mesh: &Arc<MockMesh>, address: NodeAddress) -> NodeLink {
        let coordinator: Arc<dyn Transport> = mesh.clone();
        NodeLink::new(transport_for(&coordinator, address), Duration::from_secs(5))
    }

    #[test]
    fn test_parse_hello() {
        assert_eq!(
            parse_hello("SNE-ISMTV version 2.16\r\n"),
            Some(("SNE-ISMTV".to_string(), "2.16".to_string()))
        );
        assert_eq!(
            parse_hello("Spectrum Sensor version 2.4.1"),
            Some(("Spectrum Sensor".to_string(), "2.4.1".to_string()))
        );
        assert_eq!(parse_hello("JUNK"), None);
    }

    #[test]
    fn test_parse_neighbors() {
        let table = "node | hwaddr | ipaddr | rimeaddr | last_seen | rssi\r\n\
                     0 | 0x0000 | 0.0.0.0 | 5 | 12 | -70\r\n\
                     1 | 0x0001 | 0.0.0.0 | 7 | 3 | -81\r\n";
        assert_eq!(parse_neighbors(table), vec![5, 7]);
    }

    #[test]
    fn test_parse_neighbors_skips_malformed() {
        let table = "0 | 0x0000 | 0.0.0.0 | 5 | 12\r\n\
                     1 | 0x0001 | 0.0.0.0 | x | 3 | -81\r\n\
                     2 | 0x0002 | 0.0.0.0 | 9 | 3 | -81 | extra\r\n\
                     3 | 0x0003 | 0.0.0.0 | 11 | 3 | -60\r\n";
        assert_eq!(parse_neighbors(table), vec![11]);
        assert_eq!(neighbor_table(&[4, 2]).lines().count(), 3);
        assert_eq!(parse_neighbors(&neighbor_table(&[4, 2])), vec![4, 2]);
    }

    #[tokio::test]
    async fn test_probe_success() {
        let mesh = Arc::new(MockMesh::new().with_node(MockNode::new(3).hello("SNE-ISMTV", "2.16")));

        let node = MonitoredNode::connect(3, link(&mesh, 3)).await;

        assert_eq!(node.address(), 3);
        assert_eq!(node.application(), Some("SNE-ISMTV"));
        assert_eq!(node.firmware_version(), Some("2.16"));
        assert_eq!(node.status(), NodeStatus::Online);
        assert!(node.ping_secs() >= 0.0);
    }

    #[tokio::test]
    async fn test_probe_failure_marks_unreachable() {
        let mesh = Arc::new(
            MockMesh::new()
                .with_node(MockNode::new(2).fail("hello", "radio timeout"))
                .with_node(MockNode::new(4).respond("hello", "garbage")),
        );

        for address in [2, 4, 9] {
            let mut node = MonitoredNode::connect(address, link(&mesh, address)).await;
            assert_eq!(node.application(), None);
            assert_eq!(node.firmware_version(), None);
            assert_eq!(node.status(), NodeStatus::Unreachable);
            assert!(node.neighbors().await.unwrap().is_empty());
            for kind in ResourceKind::ALL {
                assert_eq!(node.resource(kind).await.value, None);
            }
        }

        // Only the probes went out.
        assert_eq!(mesh.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_neighbor_discovery_gate() {
        let mesh = Arc::new(
            MockMesh::new()
                .with_node(MockNode::new(1).hello("SNE-ISMTV", "2.15").neighbors(&[2]))
                .with_node(MockNode::new(2).hello("SNE-ISMTV", "2.16").neighbors(&[1, 3])),
        );

        let mut old = MonitoredNode::connect(1, link(&mesh, 1)).await;
        assert!(!old.supports_neighbor_discovery());
        assert!(old.neighbors().await.unwrap().is_empty());
        assert_eq!(mesh.call_count(1, "radio/neighbors"), 0);

        let mut new = MonitoredNode::connect(2, link(&mesh, 2)).await;
        assert_eq!(new.neighbors().await.unwrap(), &[1, 3]);
        assert_eq!(new.neighbors().await.unwrap(), &[1, 3]);
        assert_eq!(new.known_neighbors(), &[1, 3]);
        assert_eq!(mesh.call_count(2, "radio/neighbors"), 1);
    }

    #[tokio::test]
    async fn test_neighbor_discovery_failure_is_retried() {
        let mesh = Arc::new(
            MockMesh::new().with_node(
                MockNode::new(5)
                    .hello("SNE-ISMTV", "2.20")
                    .fail("radio/neighbors", "CRC error")
                    .then("radio/neighbors", neighbor_table(&[6])),
            ),
        );

        let mut node = MonitoredNode::connect(5, link(&mesh, 5)).await;
        assert!(node.neighbors().await.is_err());
        assert!(node.known_neighbors().is_empty());
        assert_eq!(node.neighbors().await.unwrap(), &[6]);
        assert_eq!(mesh.call_count(5, "radio/neighbors"), 2);
    }

    #[tokio::test]
    async fn test_version_gated_resource_never_fetched() {
        let mesh = Arc::new(
            MockMesh::new().with_node(
                MockNode::new(1)
                    .hello("SNE-ISMTV", "2.3")
                    .respond("radio/statistics", "1 2 3 4"),
            ),
        );

        let mut node = MonitoredNode::connect(1, link(&mesh, 1)).await;
        let reading = node.resource(ResourceKind::RadioStatistics).await;

        assert_eq!(reading.value, None);
        assert!(!reading.freshly_fetched);
        assert!(!node.resource_state(ResourceKind::RadioStatistics).is_cached());
        assert_eq!(mesh.call_count(1, "radio/statistics"), 0);
    }

    #[tokio::test]
    async fn test_resource_memoized_after_success() {
        let mesh = Arc::new(
            MockMesh::new().with_node(
                MockNode::new(0)
                    .hello("Coordinator", "2.40")
                    .respond("sensor/mcuTemp", "MCU temperature is 28.0 C\r\n"),
            ),
        );

        let mut node = MonitoredNode::connect(0, link(&mesh, 0)).await;

        let first = node.resource(ResourceKind::McuTemperature).await;
        assert_eq!(first.value, Some(ResourceValue::Gauge(28.0)));
        assert!(first.freshly_fetched);

        let second = node.resource(ResourceKind::McuTemperature).await;
        assert_eq!(second.value, Some(ResourceValue::Gauge(28.0)));
        assert!(!second.freshly_fetched);

        assert_eq!(mesh.call_count(0, "sensor/mcuTemp"), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_retried_every_read() {
        let mesh = Arc::new(
            MockMesh::new().with_node(
                MockNode::new(0)
                    .hello("Coordinator", "2.40")
                    .fail("sensor/mcuTemp", "CRC error")
                    .then("sensor/mcuTemp", "no sensor")
                    .then("sensor/mcuTemp", "MCU temperature is 30.5 C"),
            ),
        );

        let mut node = MonitoredNode::connect(0, link(&mesh, 0)).await;

        assert_eq!(node.resource(ResourceKind::McuTemperature).await.value, None);
        assert_eq!(node.resource(ResourceKind::McuTemperature).await.value, None);
        assert_eq!(
            node.resource_state(ResourceKind::McuTemperature)
                .consecutive_failures(),
            2
        );

        let reading = node.resource(ResourceKind::McuTemperature).await;
        assert_eq!(reading.value, Some(ResourceValue::Gauge(30.5)));
        assert!(node.resource_state(ResourceKind::McuTemperature).is_cached());
        assert_eq!(mesh.call_count(0, "sensor/mcuTemp"), 3);
    }

    #[tokio::test]
    async fn test_short_radio_statistics_are_incomplete() {
        let mesh = Arc::new(
            MockMesh::new().with_node(
                MockNode::new(2)
                    .hello("SNE-ISMTV", "2.16")
                    .respond("radio/statistics", "34 12 1\r\n")
                    .then("radio/statistics", "34 12 1 0\r\n"),
            ),
        );

        let link = link(&mesh, 2);
        let mut node = MonitoredNode::connect(2, link.clone()).await;

        let err = ResourceKind::RadioStatistics
            .fetch(node.identity(), &link)
            .await
            .unwrap_err();
        assert!(err.is_incomplete());

        // Not cached: the next read asks again and gets all four counters.
        let reading = node.resource(ResourceKind::RadioStatistics).await;
        assert!(reading.freshly_fetched);
        assert!(matches!(reading.value, Some(ResourceValue::Radio(_))));
        assert_eq!(mesh.call_count(2, "radio/statistics"), 2);
    }

    #[tokio::test]
    async fn test_version_and_ping_resources() {
        let mesh = Arc::new(MockMesh::new().with_node(MockNode::new(0).hello("Coordinator", "2.40")));

        let mut node = MonitoredNode::connect(0, link(&mesh, 0)).await;

        assert_eq!(
            node.resource(ResourceKind::Version).await.value,
            Some(ResourceValue::Text("2.40".to_string()))
        );
        let ping = node.resource(ResourceKind::Ping).await.value;
        assert_eq!(ping, Some(ResourceValue::Gauge(node.ping_secs())));
        assert_eq!(mesh.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_legacy_uptime_correction() {
        let raw = LEGACY_UPTIME_OFFSET_SECS + 5000.0;
        let mesh = Arc::new(
            MockMesh::new().with_node(
                MockNode::new(1)
                    .hello("SNE-ISMTV", "2.16")
                    .respond("uptime", format!("{:.1}\r\n", raw)),
            ),
        );

        let mut node = MonitoredNode::connect(1, link(&mesh, 1)).await;
        let reading = node.resource(ResourceKind::Uptime).await;

        assert_eq!(reading.value, Some(ResourceValue::Gauge(5000.0 / 86_400.0)));
        assert_eq!(mesh.post_count(1, "prog/firstCall"), 0);
    }

    #[tokio::test]
    async fn test_short_uptime_sends_first_call() {
        let mesh = Arc::new(
            MockMesh::new().with_node(
                MockNode::new(1)
                    .hello("SNE-ISMTV", "2.16")
                    .respond("uptime", format!("{:.1}", LEGACY_UPTIME_OFFSET_SECS + 120.0)),
            ),
        );

        let mut node = MonitoredNode::connect(1, link(&mesh, 1)).await;
        let reading = node.resource(ResourceKind::Uptime).await;

        assert_eq!(reading.value, Some(ResourceValue::Gauge(120.0 / 86_400.0)));
        assert_eq!(mesh.post_count(1, "prog/firstCall"), 1);
        assert_eq!(mesh.posted_data(1, "prog/firstCall"), vec!["1".to_string()]);

        // Cached now: no second notification.
        node.resource(ResourceKind::Uptime).await;
        assert_eq!(mesh.post_count(1, "prog/firstCall"), 1);
    }

    #[tokio::test]
    async fn test_first_call_failure_does_not_fail_uptime() {
        let mesh = Arc::new(
            MockMesh::new().with_node(
                MockNode::new(1)
                    .hello("SNE-ISMTV", "2.16")
                    .respond("uptime", "42")
                    .fail("prog/firstCall", "write failed"),
            ),
        );

        let mut node = MonitoredNode::connect(1, link(&mesh, 1)).await;
        let reading = node.resource(ResourceKind::Uptime).await;

        assert_eq!(reading.value, Some(ResourceValue::Gauge(42.0 / 86_400.0)));
        assert_eq!(mesh.post_count(1, "prog/firstCall"), 1);
    }

    #[tokio::test]
    async fn test_fritzbox_uptime_in_hours() {
        let mesh = Arc::new(
            MockMesh::new()
                .with_node(
                    MockNode::new(0)
                        .hello("FritzboxCoordinator", "2.40")
                        .respond("fritzbox/uptime", "7200"),
                )
                .with_node(
                    MockNode::new(1)
                        .hello("SNE-ISMTV", "2.40")
                        .respond("fritzbox/uptime", "7200"),
                ),
        );

        let mut fritzbox = MonitoredNode::connect(0, link(&mesh, 0)).await;
        assert_eq!(
            fritzbox.resource(ResourceKind::FritzboxUptime).await.value,
            Some(ResourceValue::Gauge(2.0))
        );

        let mut plain = MonitoredNode::connect(1, link(&mesh, 1)).await;
        assert_eq!(plain.resource(ResourceKind::FritzboxUptime).await.value, None);
        assert_eq!(mesh.call_count(1, "fritzbox/uptime"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let mesh = Arc::new(
            MockMesh::new().with_node(
                MockNode::new(1)
                    .hello("SNE-ISMTV", "2.16")
                    .stall("uptime"),
            ),
        );

        let mut node = MonitoredNode::connect(1, link(&mesh, 1)).await;
        let reading = node.resource(ResourceKind::Uptime).await;

        assert_eq!(reading.value, None);
        assert_eq!(node.resource_state(ResourceKind::Uptime).consecutive_failures(), 1);
    }
}
