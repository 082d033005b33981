use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use meshsight_common::{Error, LoggingConfig};
use meshsight_crawler::{CrawlerConfig, GatewayConfig};

/// Root configuration for meshsight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshsightConfig {
    /// Testbed communicator in front of the coordinator.
    ///
    /// Required unless running against the demo mesh.
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,

    /// Crawl timeouts.
    #[serde(default)]
    pub crawl: CrawlerConfig,

    /// Munin export settings.
    #[serde(default)]
    pub munin: MuninConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Munin export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuninConfig {
    /// Directory the Munin plugin reads configs and values from.
    #[serde(default = "default_munin_output_dir")]
    pub output_dir: PathBuf,
}

fn default_munin_output_dir() -> PathBuf {
    PathBuf::from("/var/lib/meshsight/munin")
}

impl Default for MuninConfig {
    fn default() -> Self {
        Self {
            output_dir: default_munin_output_dir(),
        }
    }
}

impl MeshsightConfig {
    /// Load configuration from a JSON5 file.
    pub fn load(path: impl AsRef<Path>) -> meshsight_common::Result<Self> {
        meshsight_common::load_config(path)
    }

    /// Parse configuration from a JSON5 string.
    #[cfg(test)]
    pub fn parse(content: &str) -> meshsight_common::Result<Self> {
        meshsight_common::parse_config(content)
    }

    /// Check every section before crawling.
    pub fn validate(&self) -> meshsight_common::Result<()> {
        if let Some(gateway) = &self.gateway {
            gateway.validate().map_err(Error::Config)?;
        }
        self.crawl.validate().map_err(Error::Config)?;

        if self.munin.output_dir.as_os_str().is_empty() {
            return Err(Error::Config("munin.output_dir cannot be empty".to_string()));
        }

        Ok(())
    }
}
