//! Depth-first topology discovery starting at the coordinator.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::time::{Instant, timeout_at};

use crate::NodeAddress;
use crate::config::CrawlerConfig;
use crate::error::NodeError;
use crate::node::{MonitoredNode, NodeLink};
use crate::transport::{Transport, transport_for};

/// Addresses waiting to be visited.
///
/// Neighbors are pushed so that the first-reported neighbor is popped
/// first. Together with last-in-first-out popping this gives a
/// depth-first walk in the order nodes report their neighbors: a node's
/// first neighbor is explored completely before its later neighbors and
/// before anything queued earlier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressStack(Vec<NodeAddress>);

impl AddressStack {
    /// A stack holding only the coordinator.
    pub fn seeded() -> Self {
        Self(vec![0])
    }

    pub fn pop(&mut self) -> Option<NodeAddress> {
        self.0.pop()
    }

    /// Push a node's neighbors, preserving their reported order.
    pub fn push_neighbors(&mut self, neighbors: &[NodeAddress]) {
        self.0.extend(neighbors.iter().rev());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Every node found by one crawl, keyed by address.
#[derive(Debug, Default)]
pub struct NetworkMap {
    nodes: BTreeMap<NodeAddress, MonitoredNode>,
    visit_order: Vec<NodeAddress>,
}

impl NetworkMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node. Returns `false` (and drops `node`) if the address is
    /// already present.
    pub fn insert(&mut self, node: MonitoredNode) -> bool {
        let address = node.address();
        if self.nodes.contains_key(&address) {
            return false;
        }
        self.nodes.insert(address, node);
        self.visit_order.push(address);
        true
    }

    pub fn contains(&self, address: NodeAddress) -> bool {
        self.nodes.contains_key(&address)
    }

    pub fn get(&self, address: NodeAddress) -> Option<&MonitoredNode> {
        self.nodes.get(&address)
    }

    pub fn get_mut(&mut self, address: NodeAddress) -> Option<&mut MonitoredNode> {
        self.nodes.get_mut(&address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Addresses in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = NodeAddress> + '_ {
        self.nodes.keys().copied()
    }

    /// Addresses in the order the crawl recorded them.
    pub fn visit_order(&self) -> &[NodeAddress] {
        &self.visit_order
    }

    /// Nodes in ascending address order.
    pub fn nodes(&self) -> impl Iterator<Item = &MonitoredNode> {
        self.nodes.values()
    }

    /// Nodes in ascending address order, mutably (for resource reads).
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut MonitoredNode> {
        self.nodes.values_mut()
    }

    /// Directed `(node, neighbor)` pairs in ascending node order, neighbors
    /// in reported order.
    pub fn edges(&self) -> Vec<(NodeAddress, NodeAddress)> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.known_neighbors()
                    .iter()
                    .map(move |&neighbor| (node.address(), neighbor))
            })
            .collect()
    }

    /// Number of nodes that answered their liveness probe.
    pub fn online_count(&self) -> usize {
        self.nodes.values().filter(|n| n.status().is_online()).count()
    }
}

/// Walks the mesh from the coordinator, one request at a time.
pub struct Crawler {
    coordinator: Arc<dyn Transport>,
    config: CrawlerConfig,
}

impl Crawler {
    /// Create a crawler talking to the coordinator through `coordinator`.
    pub fn new(coordinator: Arc<dyn Transport>, config: CrawlerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Discover every node reachable from the coordinator.
    ///
    /// Failures are confined to the address they happen on: an unreachable
    /// node is still recorded, and a node whose neighbors cannot be read or
    /// that exceeds the per-node time budget simply contributes no further
    /// addresses.
    pub async fn crawl(&self) -> NetworkMap {
        let mut map = NetworkMap::new();
        let mut pending = AddressStack::seeded();
        let mut failed_expansions = 0usize;

        tracing::info!("Starting mesh crawl");

        while let Some(address) = pending.pop() {
            if map.contains(address) {
                continue;
            }

            match self.visit(address, &mut map).await {
                Ok(neighbors) => pending.push_neighbors(&neighbors),
                Err(e) => {
                    failed_expansions += 1;
                    tracing::warn!(address, error = %e, "Skipping node expansion");
                }
            }
        }

        tracing::info!(
            nodes = map.len(),
            online = map.online_count(),
            failed_expansions,
            "Mesh crawl finished"
        );

        map
    }

    /// Probe and record one address, then read its neighbors.
    async fn visit(
        &self,
        address: NodeAddress,
        map: &mut NetworkMap,
    ) -> Result<Vec<NodeAddress>, NodeError> {
        let budget = self.config.node_timeout_secs;
        let started = Instant::now();
        let deadline = started + self.config.node_timeout();
        let link = NodeLink::new(
            transport_for(&self.coordinator, address),
            self.config.request_timeout(),
        );

        let node = match timeout_at(deadline, MonitoredNode::connect(address, link.clone())).await {
            Ok(node) => node,
            Err(_) => {
                // A probe that never answered still occupies the address.
                let ping_secs = started.elapsed().as_secs_f64();
                map.insert(MonitoredNode::unreachable(address, link, ping_secs));
                return Err(NodeError::Budget {
                    stage: "liveness probe",
                    secs: budget,
                });
            }
        };

        // Recorded before expansion so the node survives a failure below.
        map.insert(node);
        let Some(node) = map.get_mut(address) else {
            return Ok(Vec::new());
        };

        let neighbors = timeout_at(deadline, node.neighbors())
            .await
            .map_err(|_| NodeError::Budget {
                stage: "neighbor discovery",
                secs: budget,
            })??;

        Ok(neighbors.to_vec())
    }
}
