//! File-based Munin export.
//!
//! Layout under the output directory:
//!
//! ```text
//! <label>.config          graph configuration of one resource
//! <label>/n<address>.value  current values of that resource on one node
//! ```
//!
//! Files from earlier runs that were not rewritten by the current run are
//! removed, so nodes that vanished from the mesh stop being graphed.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use meshsight_crawler::{NetworkMap, NodeAddress, ResourceKind, ResourceValue};

use crate::error::ExportError;

const CONFIG_EXTENSION: &str = "config";
const VALUE_EXTENSION: &str = "value";

const PING_CONFIG: &str = "\
graph_title Node ping
graph_args --base 1000 -l 0
graph_vlabel seconds
graph_category vesna
ping.label round-trip time
";

const UPTIME_CONFIG: &str = "\
graph_title Node uptime
graph_args --base 1000 -l 0
graph_vlabel days
graph_category vesna
uptime.label uptime
uptime.draw AREA
";

const MCU_TEMPERATURE_CONFIG: &str = "\
graph_title MCU temperature
graph_vlabel degrees Celsius
graph_category vesna
temperature.label MCU
";

const RADIO_STATISTICS_CONFIG: &str = "\
graph_title Radio statistics
graph_args --base 1000 -l 0
graph_vlabel events per ${graph_period}
graph_category vesna
bytes.label bytes
bytes.type DERIVE
bytes.min 0
overflows.label overflows
overflows.type DERIVE
overflows.min 0
timeouts.label timeouts
timeouts.type DERIVE
timeouts.min 0
";

const FRITZBOX_UPTIME_CONFIG: &str = "\
graph_title Fritz!Box uptime
graph_args --base 1000 -l 0
graph_vlabel hours
graph_category vesna
uptime.label uptime
uptime.draw AREA
";

/// Munin graph configuration for a resource, if it can be graphed.
///
/// The firmware version is text and has no graph.
pub fn munin_config(kind: ResourceKind) -> Option<&'static str> {
    match kind {
        ResourceKind::Version => None,
        ResourceKind::Ping => Some(PING_CONFIG),
        ResourceKind::Uptime => Some(UPTIME_CONFIG),
        ResourceKind::McuTemperature => Some(MCU_TEMPERATURE_CONFIG),
        ResourceKind::RadioStatistics => Some(RADIO_STATISTICS_CONFIG),
        ResourceKind::FritzboxUptime => Some(FRITZBOX_UPTIME_CONFIG),
    }
}

/// Field name a scalar resource is reported under.
fn gauge_field(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Ping => "ping",
        ResourceKind::McuTemperature => "temperature",
        _ => "uptime",
    }
}

/// Render `<field>.value <number>` lines for a reading.
pub fn munin_values(kind: ResourceKind, value: &ResourceValue) -> Option<String> {
    match value {
        ResourceValue::Gauge(v) => Some(format!("{}.value {}\n", gauge_field(kind), v)),
        ResourceValue::Radio(stats) => Some(format!(
            "bytes.value {}\noverflows.value {}\ntimeouts.value {}\n",
            stats.bytes(),
            stats.overflows,
            stats.timeouts
        )),
        ResourceValue::Text(_) => None,
    }
}

/// Make a string usable as a Munin field or file name.
///
/// Munin names must match `[a-zA-Z_][a-zA-Z0-9_]*`. Invalid characters
/// become underscores, runs of underscores collapse into one.
pub fn sanitize_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;

    for (i, c) in name.chars().enumerate() {
        if i == 0 && c.is_ascii_digit() {
            result.push('_');
            last_was_underscore = true;
        }

        if c.is_ascii_alphanumeric() {
            result.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.len() > 1 && result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// What one export run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuninReport {
    /// Configuration files written.
    pub configs: usize,
    /// Value files written.
    pub values: usize,
    /// Stale files deleted.
    pub removed: usize,
}

/// Writes Munin configuration and value files for a crawled mesh.
pub struct MuninExporter {
    output_dir: PathBuf,
}

impl MuninExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the configuration file for a resource.
    pub fn config_path(&self, kind: ResourceKind) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", sanitize_name(kind.label()), CONFIG_EXTENSION))
    }

    /// Path of the value file for a resource on a node.
    pub fn value_path(&self, kind: ResourceKind, address: NodeAddress) -> PathBuf {
        self.output_dir
            .join(sanitize_name(kind.label()))
            .join(format!("n{}.{}", address, VALUE_EXTENSION))
    }

    /// Refresh every artifact from `map` and delete stale ones.
    ///
    /// Reads every graphable resource of every node, which may issue
    /// requests to the mesh.
    pub async fn export(&self, map: &mut NetworkMap) -> Result<MuninReport, ExportError> {
        let mut report = MuninReport::default();
        let mut written = HashSet::new();

        fs::create_dir_all(&self.output_dir)
            .map_err(|e| ExportError::write(&self.output_dir, e))?;

        for kind in ResourceKind::ALL {
            let Some(config) = munin_config(kind) else {
                continue;
            };

            let config_path = self.config_path(kind);
            write_file(&config_path, config)?;
            written.insert(config_path);
            report.configs += 1;

            for node in map.nodes_mut() {
                let Some(value) = node.resource(kind).await.value else {
                    continue;
                };
                let Some(lines) = munin_values(kind, &value) else {
                    continue;
                };

                let value_path = self.value_path(kind, node.address());
                write_file(&value_path, &lines)?;
                written.insert(value_path);
                report.values += 1;
            }
        }

        report.removed = self.remove_stale(&written)?;

        tracing::info!(
            dir = %self.output_dir.display(),
            configs = report.configs,
            values = report.values,
            removed = report.removed,
            "Munin export finished"
        );

        Ok(report)
    }

    /// Delete artifacts under the output directory not in `keep`.
    fn remove_stale(&self, keep: &HashSet<PathBuf>) -> Result<usize, ExportError> {
        let mut removed = 0;
        let mut dirs = vec![self.output_dir.clone()];

        while let Some(dir) = dirs.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();

                if path.is_dir() {
                    dirs.push(path);
                    continue;
                }

                let is_artifact = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == CONFIG_EXTENSION || ext == VALUE_EXTENSION);

                if is_artifact && !keep.contains(&path) {
                    fs::remove_file(&path).map_err(|e| ExportError::write(&path, e))?;
                    tracing::debug!(path = %path.display(), "Removed stale Munin file");
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ExportError::write(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| ExportError::write(path, e))
}
