//! meshsight crawler
//!
//! Discovers the topology of a VESNA wireless mesh by walking outward from
//! the coordinator, and reads per-node metrics through a small,
//! firmware-gated resource model.
//!
//! # Overview
//!
//! - [`Transport`] - request interface to a node; [`HttpGateway`] talks to the
//!   testbed communicator, [`AddressedTransport`] routes through the coordinator
//! - [`MonitoredNode`] - liveness probe, neighbor discovery, memoized resources
//! - [`ResourceKind`] - the fixed set of metrics and their compatibility gates
//! - [`Crawler`] - depth-first discovery producing a [`NetworkMap`]
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use meshsight_crawler::{Crawler, CrawlerConfig, GatewayConfig, HttpGateway, ResourceKind};
//!
//! let gateway = HttpGateway::new(GatewayConfig::new("https://example.org/communicator", 10001))?;
//! let crawler = Crawler::new(Arc::new(gateway), CrawlerConfig::default());
//!
//! let mut map = crawler.crawl().await;
//! for node in map.nodes_mut() {
//!     let uptime = node.resource(ResourceKind::Uptime).await;
//!     println!("{} {:?}", node.address(), uptime.value);
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod mock;
pub mod node;
pub mod resource;
pub mod transport;
pub mod version;

/// Address of a mesh node; 0 is the coordinator.
pub type NodeAddress = u32;

pub use config::{CrawlerConfig, GatewayConfig};
pub use crawler::{AddressStack, Crawler, NetworkMap};
pub use error::{NodeError, TransportError};
pub use node::{MonitoredNode, NEIGHBOR_DISCOVERY_MIN_VERSION, NodeIdentity, NodeLink};
pub use resource::{
    RadioStatistics, ResourceDescriptor, ResourceKind, ResourceReading, ResourceState,
    ResourceValue,
};
pub use transport::{AddressedTransport, HttpGateway, Transport, transport_for};
pub use version::{FirmwareVersion, at_least};
