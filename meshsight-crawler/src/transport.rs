//! Request/response transport to mesh nodes.
//!
//! The coordinator (address 0) is reached directly. Every other node is
//! reached through the coordinator with [`AddressedTransport`], which wraps
//! the request as `nodes?<address>/<resource>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::GatewayConfig;
use crate::error::TransportError;
use crate::NodeAddress;

/// Replies the gateway sends when the radio exchange was garbled.
const GATEWAY_ERROR_REPLIES: &[&str] = &["JUNK-INPUT", "CORRUPTED-DATA"];

/// Synchronous-style request interface to one node.
///
/// Implementations may retry internally; callers never retry a failed
/// request within the same operation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read a resource.
    async fn get(&self, resource: &str) -> Result<String, TransportError>;

    /// Write `data` to a resource.
    async fn post(&self, resource: &str, data: &str) -> Result<String, TransportError>;
}

/// Build the coordinator-relative resource path for a node.
pub fn routed_resource(address: NodeAddress, resource: &str) -> String {
    format!("nodes?{}/{}", address, resource)
}

/// Split a coordinator-relative path back into `(address, resource)`.
///
/// Plain resources belong to the coordinator itself.
pub fn split_routed_resource(resource: &str) -> Result<(NodeAddress, &str), TransportError> {
    let Some(rest) = resource.strip_prefix("nodes?") else {
        return Ok((0, resource));
    };

    let (address, inner) = rest
        .split_once('/')
        .ok_or_else(|| TransportError::InvalidResponse(format!("bad route '{}'", resource)))?;
    let address = address
        .parse::<NodeAddress>()
        .map_err(|_| TransportError::InvalidResponse(format!("bad address in '{}'", resource)))?;

    Ok((address, inner))
}

/// Reaches a non-coordinator node through the coordinator.
#[derive(Clone)]
pub struct AddressedTransport {
    coordinator: Arc<dyn Transport>,
    address: NodeAddress,
}

impl AddressedTransport {
    /// Route requests for `address` through `coordinator`.
    pub fn new(coordinator: Arc<dyn Transport>, address: NodeAddress) -> Self {
        Self {
            coordinator,
            address,
        }
    }

    /// The node this transport talks to.
    pub fn address(&self) -> NodeAddress {
        self.address
    }
}

#[async_trait]
impl Transport for AddressedTransport {
    async fn get(&self, resource: &str) -> Result<String, TransportError> {
        self.coordinator
            .get(&routed_resource(self.address, resource))
            .await
    }

    async fn post(&self, resource: &str, data: &str) -> Result<String, TransportError> {
        self.coordinator
            .post(&routed_resource(self.address, resource), data)
            .await
    }
}

/// Pick the transport for a node: direct for the coordinator, routed otherwise.
pub fn transport_for(coordinator: &Arc<dyn Transport>, address: NodeAddress) -> Arc<dyn Transport> {
    if address == 0 {
        coordinator.clone()
    } else {
        Arc::new(AddressedTransport::new(coordinator.clone(), address))
    }
}

/// HTTP transport to the testbed communicator that fronts a coordinator.
pub struct HttpGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    /// Create a gateway client from its configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    async fn request(&self, method: &str, resource: &str, data: Option<&str>) -> Result<String, TransportError> {
        let mut attempt = 0;

        loop {
            match self.send(method, resource, data).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.config.retries => {
                    attempt += 1;
                    tracing::debug!(
                        resource = %resource,
                        attempt,
                        error = %e,
                        "Gateway request failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, method: &str, resource: &str, data: Option<&str>) -> Result<String, TransportError> {
        let cluster = self.config.cluster_id.to_string();
        let mut query = vec![
            ("cluster", cluster.as_str()),
            ("method", method),
            ("resource", resource),
        ];
        if let Some(data) = data {
            query.push(("content", data));
        }

        let mut request = self.client.get(&self.config.base_url).query(&query);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if let Some(reply) = GATEWAY_ERROR_REPLIES
            .iter()
            .find(|reply| body.trim_start().starts_with(**reply))
        {
            return Err(TransportError::Gateway(reply.to_string()));
        }

        tracing::trace!(method = %method, resource = %resource, bytes = body.len(), "Gateway response");

        Ok(body)
    }
}

#[async_trait]
impl Transport for HttpGateway {
    async fn get(&self, resource: &str) -> Result<String, TransportError> {
        self.request("get", resource, None).await
    }

    async fn post(&self, resource: &str, data: &str) -> Result<String, TransportError> {
        self.request("post", resource, Some(data)).await
    }
}
