//! Scripted in-memory mesh for tests and demo runs.
//!
//! [`MockMesh`] plays the coordinator transport: it answers plain resources
//! as node 0 and `nodes?<address>/<resource>` as the addressed node, and
//! records every request it sees.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::NodeAddress;
use crate::error::TransportError;
use crate::transport::{Transport, split_routed_resource};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Successful reply with this body.
    Text(String),
    /// Transport failure with this message.
    Fail(String),
    /// Never answers (for timeout tests).
    Stall,
}

/// Request method of a recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMethod {
    Get,
    Post,
}

/// A request the mesh received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub address: NodeAddress,
    pub method: MockMethod,
    pub resource: String,
    pub data: Option<String>,
}

/// Scripted replies of one node.
///
/// Each resource holds a queue of replies; the last one repeats forever.
#[derive(Debug, Clone)]
pub struct MockNode {
    address: NodeAddress,
    responses: HashMap<String, VecDeque<MockResponse>>,
}

impl MockNode {
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            responses: HashMap::new(),
        }
    }

    /// Answer the liveness probe.
    pub fn hello(self, application: &str, version: &str) -> Self {
        self.respond("hello", format!("{} version {}\r\n", application, version))
    }

    /// Answer the neighbors request with these addresses.
    pub fn neighbors(self, addresses: &[NodeAddress]) -> Self {
        self.respond("radio/neighbors", neighbor_table(addresses))
    }

    /// Replace the replies for `resource` with one successful reply.
    pub fn respond(self, resource: &str, body: impl Into<String>) -> Self {
        self.script(resource, MockResponse::Text(body.into()))
    }

    /// Replace the replies for `resource` with one failure.
    pub fn fail(self, resource: &str, message: impl Into<String>) -> Self {
        self.script(resource, MockResponse::Fail(message.into()))
    }

    /// Replace the replies for `resource` with a reply that never comes.
    pub fn stall(self, resource: &str) -> Self {
        self.script(resource, MockResponse::Stall)
    }

    /// Queue another successful reply after the existing ones.
    pub fn then(mut self, resource: &str, body: impl Into<String>) -> Self {
        self.responses
            .entry(resource.to_string())
            .or_default()
            .push_back(MockResponse::Text(body.into()));
        self
    }

    fn script(mut self, resource: &str, response: MockResponse) -> Self {
        self.responses
            .insert(resource.to_string(), VecDeque::from([response]));
        self
    }

    fn next_response(&mut self, resource: &str) -> Option<MockResponse> {
        let queue = self.responses.get_mut(resource)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

/// In-memory coordinator transport over a set of [`MockNode`]s.
#[derive(Debug, Default)]
pub struct MockMesh {
    nodes: Mutex<HashMap<NodeAddress, MockNode>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a node.
    pub fn with_node(self, node: MockNode) -> Self {
        self.nodes.lock().insert(node.address, node);
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of GETs of `resource` on `address`.
    pub fn call_count(&self, address: NodeAddress, resource: &str) -> usize {
        self.count(address, MockMethod::Get, resource)
    }

    /// Number of POSTs to `resource` on `address`.
    pub fn post_count(&self, address: NodeAddress, resource: &str) -> usize {
        self.count(address, MockMethod::Post, resource)
    }

    /// Payloads posted to `resource` on `address`.
    pub fn posted_data(&self, address: NodeAddress, resource: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.address == address && c.method == MockMethod::Post && c.resource == resource)
            .filter_map(|c| c.data.clone())
            .collect()
    }

    /// Addresses whose liveness probe was requested, in order.
    pub fn probe_order(&self) -> Vec<NodeAddress> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == MockMethod::Get && c.resource == "hello")
            .map(|c| c.address)
            .collect()
    }

    fn count(&self, address: NodeAddress, method: MockMethod, resource: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.address == address && c.method == method && c.resource == resource)
            .count()
    }

    async fn handle(
        &self,
        method: MockMethod,
        routed: &str,
        data: Option<&str>,
    ) -> Result<String, TransportError> {
        let (address, resource) = split_routed_resource(routed)?;

        self.calls.lock().push(MockCall {
            address,
            method,
            resource: resource.to_string(),
            data: data.map(str::to_string),
        });

        let response = {
            let mut nodes = self.nodes.lock();
            let node = nodes
                .get_mut(&address)
                .ok_or(TransportError::Unreachable(address))?;
            node.next_response(resource)
        };

        match response {
            Some(MockResponse::Text(body)) => Ok(body),
            Some(MockResponse::Fail(message)) => Err(TransportError::InvalidResponse(message)),
            Some(MockResponse::Stall) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(TransportError::InvalidResponse("stalled".to_string()))
            }
            None if method == MockMethod::Post => Ok(String::new()),
            None => Err(TransportError::InvalidResponse(format!(
                "node {} has no resource '{}'",
                address, resource
            ))),
        }
    }
}

#[async_trait]
impl Transport for MockMesh {
    async fn get(&self, resource: &str) -> Result<String, TransportError> {
        self.handle(MockMethod::Get, resource, None).await
    }

    async fn post(&self, resource: &str, data: &str) -> Result<String, TransportError> {
        self.handle(MockMethod::Post, resource, Some(data)).await
    }
}

/// Render a `radio/neighbors` table listing `addresses` in order.
pub fn neighbor_table(addresses: &[NodeAddress]) -> String {
    let mut table = String::from("node | hwaddr | ipaddr | rimeaddr | last_seen | rssi\r\n");
    for (i, address) in addresses.iter().enumerate() {
        table.push_str(&format!(
            "{} | 0x{:04x} | 0.0.0.0 | {} | {} | -{}\r\n",
            i,
            address,
            address,
            i * 3 + 1,
            60 + i * 7
        ));
    }
    table
}

/// A small mesh with every situation the crawler has to handle:
/// a cycle, firmware too old for neighbor discovery, a node that does not
/// answer, and a node reporting absolute time as uptime.
pub fn demo_mesh() -> MockMesh {
    MockMesh::new()
        .with_node(
            MockNode::new(0)
                .hello("Coordinator", "2.42")
                .neighbors(&[1, 2, 5])
                .respond("uptime", "1209600.0")
                .respond("sensor/mcuTemp", "MCU temperature is 31.2 C\r\n")
                .respond("radio/statistics", "184223 190551 3 12\r\n"),
        )
        .with_node(
            MockNode::new(1)
                .hello("SNE-ISMTV", "2.16")
                .neighbors(&[0, 3])
                .respond("uptime", "1325462400.0")
                .respond("sensor/mcuTemp", "MCU temperature is 27.9 C\r\n")
                .respond("radio/statistics", "20311 19870 0 4\r\n"),
        )
        .with_node(
            MockNode::new(2)
                .hello("SNE-ESHTER", "2.15")
                .neighbors(&[6])
                .respond("uptime", "35999.5")
                .respond("sensor/mcuTemp", "MCU temperature is 35.0 C\r\n")
                .respond("radio/statistics", "1500 1400 1 1\r\n"),
        )
        .with_node(
            MockNode::new(3)
                .hello("SNE-ISMTV", "2.43")
                .neighbors(&[1, 4])
                .respond("uptime", "1800")
                .fail("sensor/mcuTemp", "sensor busy")
                .respond("radio/statistics", "77 80 0 0\r\n"),
        )
        .with_node(MockNode::new(4).fail("hello", "no route to host"))
        .with_node(
            MockNode::new(5)
                .hello("SNE-SENSOR", "2.3")
                .respond("uptime", "604800")
                .respond("sensor/mcuTemp", "MCU temperature is 24.4 C\r\n"),
        )
}
