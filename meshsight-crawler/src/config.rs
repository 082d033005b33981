//! Gateway and crawl configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for the HTTP communicator in front of the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Communicator URL (e.g., "https://crn.log-a-tec.eu/communicator").
    pub base_url: String,

    /// Cluster id of the coordinator behind the communicator.
    pub cluster_id: u32,

    /// HTTP basic auth user.
    #[serde(default)]
    pub username: Option<String>,

    /// HTTP basic auth password.
    #[serde(default)]
    pub password: Option<String>,

    /// Timeout for a single HTTP request in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Extra attempts after a failed request.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    1
}

impl GatewayConfig {
    /// Settings for a communicator with default timeout and retries.
    pub fn new(base_url: impl Into<String>, cluster_id: u32) -> Self {
        Self {
            base_url: base_url.into(),
            cluster_id,
            username: None,
            password: None,
            request_timeout_secs: default_request_timeout(),
            retries: default_retries(),
        }
    }

    /// Check the settings before any request is made.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("gateway.base_url cannot be empty".to_string());
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(format!(
                "gateway.base_url '{}' must be an http(s) URL",
                self.base_url
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err("gateway.request_timeout_secs must be positive".to_string());
        }
        if self.password.is_some() && self.username.is_none() {
            return Err("gateway.password is set but gateway.username is not".to_string());
        }
        Ok(())
    }
}

/// Crawl behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Upper bound for one request issued to a node, in seconds.
    #[serde(default = "default_node_request_timeout")]
    pub request_timeout_secs: u64,

    /// Upper bound for probing and expanding one address, in seconds.
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
}

fn default_node_request_timeout() -> u64 {
    60
}

fn default_node_timeout() -> u64 {
    120
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_node_request_timeout(),
            node_timeout_secs: default_node_timeout(),
        }
    }
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    /// Check the settings before crawling.
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_secs == 0 {
            return Err("crawl.request_timeout_secs must be positive".to_string());
        }
        if self.node_timeout_secs == 0 {
            return Err("crawl.node_timeout_secs must be positive".to_string());
        }
        Ok(())
    }
}
