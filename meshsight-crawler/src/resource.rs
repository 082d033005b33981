//! Capability-gated node resources.
//!
//! Every metric a node can report is one [`ResourceKind`]. Each kind carries
//! a [`ResourceDescriptor`] (label, minimum firmware version, accepted
//! applications) and knows how to turn the node's reply into a
//! [`ResourceValue`]. Results are memoized per node in a [`ResourceState`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;
use crate::node::{NodeIdentity, NodeLink};
use crate::version;

/// Nodes that reported absolute Unix time instead of uptime return values
/// at or above this offset (2012-01-01T00:00:00Z).
pub const LEGACY_UPTIME_OFFSET_SECS: f64 = 1_325_376_000.0;

/// Uptimes below this trigger the first-call notification.
pub const FIRST_CALL_THRESHOLD_SECS: f64 = 3600.0;

const SECONDS_PER_DAY: f64 = 86_400.0;
const SECONDS_PER_HOUR: f64 = 3_600.0;

/// Coordinator variants that run on a Fritz!Box router.
pub const FRITZBOX_APPLICATIONS: &[&str] = &["FritzboxCoordinator"];

static MCU_TEMPERATURE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"MCU temperature is ([-+]?\d+(?:\.\d+)?) C").unwrap());

/// Static description of a resource: its key and compatibility predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// Unique label, also used as the metric name by exporters.
    pub label: &'static str,
    /// Oldest firmware that supports the request.
    pub minimum_version: Option<&'static str>,
    /// Applications that provide the resource (`None` accepts any).
    pub required_applications: Option<&'static [&'static str]>,
}

impl ResourceDescriptor {
    /// Whether a node with this identity may be asked for the resource.
    ///
    /// A node without a known firmware version supports nothing.
    pub fn supports(&self, identity: &NodeIdentity) -> bool {
        let Some(firmware) = identity.firmware_version.as_deref() else {
            return false;
        };

        if let Some(minimum) = self.minimum_version
            && !version::at_least(Some(firmware), minimum)
        {
            return false;
        }

        if let Some(applications) = self.required_applications {
            return identity
                .application
                .as_deref()
                .is_some_and(|app| applications.contains(&app));
        }

        true
    }
}

/// The fixed set of node metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Firmware version reported by the liveness probe.
    Version,
    /// Liveness probe round-trip time in seconds.
    Ping,
    /// Node uptime in days.
    Uptime,
    /// Microcontroller temperature in degrees Celsius.
    McuTemperature,
    /// Radio packet counters.
    RadioStatistics,
    /// Uptime of the Fritz!Box hosting the coordinator, in hours.
    FritzboxUptime,
}

impl ResourceKind {
    /// All kinds, in export order.
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Version,
        ResourceKind::Ping,
        ResourceKind::Uptime,
        ResourceKind::McuTemperature,
        ResourceKind::RadioStatistics,
        ResourceKind::FritzboxUptime,
    ];

    /// Number of kinds.
    pub const COUNT: usize = Self::ALL.len();

    /// Slot of this kind in per-node state storage.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The descriptor for this kind.
    pub fn descriptor(self) -> ResourceDescriptor {
        match self {
            ResourceKind::Version => ResourceDescriptor {
                label: "version",
                minimum_version: None,
                required_applications: None,
            },
            ResourceKind::Ping => ResourceDescriptor {
                label: "ping",
                minimum_version: None,
                required_applications: None,
            },
            ResourceKind::Uptime => ResourceDescriptor {
                label: "uptime",
                minimum_version: None,
                required_applications: None,
            },
            ResourceKind::McuTemperature => ResourceDescriptor {
                label: "mcu_temperature",
                minimum_version: None,
                required_applications: None,
            },
            ResourceKind::RadioStatistics => ResourceDescriptor {
                label: "radio_statistics",
                minimum_version: Some("2.4"),
                required_applications: None,
            },
            ResourceKind::FritzboxUptime => ResourceDescriptor {
                label: "fritzbox_uptime",
                minimum_version: None,
                required_applications: Some(FRITZBOX_APPLICATIONS),
            },
        }
    }

    /// The descriptor's label.
    pub fn label(self) -> &'static str {
        self.descriptor().label
    }

    /// Look a kind up by label.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }

    /// Request the resource from a node and decode the reply.
    pub(crate) async fn fetch(
        self,
        identity: &NodeIdentity,
        link: &NodeLink,
    ) -> Result<ResourceValue, NodeError> {
        match self {
            ResourceKind::Version => identity
                .firmware_version
                .clone()
                .map(ResourceValue::Text)
                .ok_or_else(|| NodeError::parse("hello", "firmware version unknown")),
            ResourceKind::Ping => Ok(ResourceValue::Gauge(identity.ping_secs)),
            ResourceKind::Uptime => fetch_uptime(link).await,
            ResourceKind::McuTemperature => {
                let reply = link.get("sensor/mcuTemp").await?;
                parse_mcu_temperature(&reply)
                    .map(ResourceValue::Gauge)
                    .ok_or_else(|| NodeError::parse("sensor/mcuTemp", reply.trim()))
            }
            ResourceKind::RadioStatistics => {
                let reply = link.get("radio/statistics").await?;
                parse_radio_statistics(&reply)
                    .map(ResourceValue::Radio)
                    .ok_or_else(|| NodeError::Incomplete {
                        resource: "radio/statistics".to_string(),
                        message: "fewer than 4 counters".to_string(),
                    })
            }
            ResourceKind::FritzboxUptime => {
                let reply = link.get("fritzbox/uptime").await?;
                let secs = parse_seconds("fritzbox/uptime", &reply)?;
                Ok(ResourceValue::Gauge(secs / SECONDS_PER_HOUR))
            }
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Radio packet counters, positionally `tx rx overflows timeouts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioStatistics {
    pub tx: u64,
    pub rx: u64,
    pub overflows: u64,
    pub timeouts: u64,
}

impl RadioStatistics {
    /// Bytes moved in both directions.
    pub fn bytes(&self) -> u64 {
        self.tx.saturating_add(self.rx)
    }
}

/// Decoded value of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceValue {
    /// Text value (firmware version).
    Text(String),
    /// Scalar measurement.
    Gauge(f64),
    /// Radio counters.
    Radio(RadioStatistics),
}

impl ResourceValue {
    /// The scalar, if this is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ResourceValue::Gauge(v) => Some(*v),
            _ => None,
        }
    }
}

/// Memoization cell for one resource of one node.
///
/// A successful fetch is kept for the node's lifetime. A failed fetch
/// leaves the cell empty, so the next read fetches again: failures are
/// retried on every poll, with no backoff. Only the run of consecutive
/// failures is remembered, for logging.
#[derive(Debug, Clone, Default)]
pub struct ResourceState {
    value: Option<ResourceValue>,
    consecutive_failures: u32,
}

impl ResourceState {
    /// The cached value, if a fetch has succeeded.
    pub fn cached(&self) -> Option<&ResourceValue> {
        self.value.as_ref()
    }

    /// Whether a fetch has succeeded.
    pub fn is_cached(&self) -> bool {
        self.value.is_some()
    }

    /// Failed fetches since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn store(&mut self, value: ResourceValue) {
        self.value = Some(value);
        self.consecutive_failures = 0;
    }

    pub(crate) fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }
}

/// Result of reading a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceReading {
    /// The value, or `None` if gated off or the fetch failed.
    pub value: Option<ResourceValue>,
    /// Whether this read issued a request to the node.
    pub freshly_fetched: bool,
}

impl ResourceReading {
    pub(crate) fn unavailable() -> Self {
        Self {
            value: None,
            freshly_fetched: false,
        }
    }
}

/// Undo the absolute-time reporting of old firmware.
pub fn correct_legacy_uptime(raw_secs: f64) -> f64 {
    if raw_secs >= LEGACY_UPTIME_OFFSET_SECS {
        raw_secs - LEGACY_UPTIME_OFFSET_SECS
    } else {
        raw_secs
    }
}

async fn fetch_uptime(link: &NodeLink) -> Result<ResourceValue, NodeError> {
    let reply = link.get("uptime").await?;
    let uptime = correct_legacy_uptime(parse_seconds("uptime", &reply)?);

    if uptime < FIRST_CALL_THRESHOLD_SECS {
        // Marks the node so it stops reporting absolute time; the reply is irrelevant.
        if let Err(e) = link.post("prog/firstCall", "1").await {
            tracing::debug!(error = %e, "First-call notification failed");
        }
    }

    Ok(ResourceValue::Gauge(uptime / SECONDS_PER_DAY))
}

fn parse_seconds(resource: &str, reply: &str) -> Result<f64, NodeError> {
    reply
        .trim()
        .parse::<f64>()
        .map_err(|_| NodeError::parse(resource, format!("not a number: '{}'", reply.trim())))
}

/// Extract the Celsius value from a `sensor/mcuTemp` reply.
pub fn parse_mcu_temperature(reply: &str) -> Option<f64> {
    MCU_TEMPERATURE_REGEX
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parse the numeric tokens of a `radio/statistics` reply.
///
/// Returns `None` unless at least four counters are present.
pub fn parse_radio_statistics(reply: &str) -> Option<RadioStatistics> {
    let counters: Vec<u64> = reply
        .split_whitespace()
        .filter_map(|token| token.parse().ok())
        .collect();

    match counters.as_slice() {
        [tx, rx, overflows, timeouts, ..] => Some(RadioStatistics {
            tx: *tx,
            rx: *rx,
            overflows: *overflows,
            timeouts: *timeouts,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(application: Option<&str>, version: Option<&str>) -> NodeIdentity {
        NodeIdentity {
            application: application.map(str::to_string),
            firmware_version: version.map(str::to_string),
            ping_secs: 0.25,
        }
    }

    #[test]
    fn test_labels_are_unique() {
        for (i, a) in ResourceKind::ALL.iter().enumerate() {
            assert_eq!(a.index(), i);
            for b in &ResourceKind::ALL[i + 1..] {
                assert_ne!(a.label(), b.label());
            }
        }
        assert_eq!(
            ResourceKind::from_label("radio_statistics"),
            Some(ResourceKind::RadioStatistics)
        );
        assert_eq!(ResourceKind::from_label("bogus"), None);
    }

    #[test]
    fn test_unknown_firmware_supports_nothing() {
        let unreachable = identity(None, None);
        for kind in ResourceKind::ALL {
            assert!(!kind.descriptor().supports(&unreachable), "{kind}");
        }
    }

    #[test]
    fn test_version_gate() {
        let radio = ResourceKind::RadioStatistics.descriptor();
        assert!(!radio.supports(&identity(Some("SNE-ISMTV"), Some("2.3"))));
        assert!(radio.supports(&identity(Some("SNE-ISMTV"), Some("2.4"))));
        assert!(radio.supports(&identity(Some("SNE-ISMTV"), Some("2.16"))));
    }

    #[test]
    fn test_application_gate() {
        let fritzbox = ResourceKind::FritzboxUptime.descriptor();
        assert!(!fritzbox.supports(&identity(Some("Coordinator"), Some("2.40"))));
        assert!(!fritzbox.supports(&identity(None, Some("2.40"))));
        assert!(fritzbox.supports(&identity(Some("FritzboxCoordinator"), Some("2.40"))));

        let uptime = ResourceKind::Uptime.descriptor();
        assert!(uptime.supports(&identity(Some("anything"), Some("1.0"))));
    }

    #[test]
    fn test_parse_radio_statistics() {
        let stats = parse_radio_statistics("34 12 1 0").unwrap();
        assert_eq!(
            stats,
            RadioStatistics {
                tx: 34,
                rx: 12,
                overflows: 1,
                timeouts: 0
            }
        );
        assert_eq!(stats.bytes(), 46);
    }

    #[test]
    fn test_parse_radio_statistics_skips_text() {
        let stats = parse_radio_statistics("tx: 100 rx: 200 ovf: 3 tmo: 4 extra 9\r\n").unwrap();
        assert_eq!(stats.tx, 100);
        assert_eq!(stats.rx, 200);
        assert_eq!(stats.overflows, 3);
        assert_eq!(stats.timeouts, 4);
    }

    #[test]
    fn test_parse_radio_statistics_too_short() {
        assert_eq!(parse_radio_statistics("34 12 1"), None);
        assert_eq!(parse_radio_statistics(""), None);
    }

    #[test]
    fn test_parse_mcu_temperature() {
        assert_eq!(
            parse_mcu_temperature("MCU temperature is 31.5 C\r\n"),
            Some(31.5)
        );
        assert_eq!(parse_mcu_temperature("MCU temperature is -4 C"), Some(-4.0));
        assert_eq!(parse_mcu_temperature("temperature unavailable"), None);
    }

    #[test]
    fn test_correct_legacy_uptime() {
        assert_eq!(correct_legacy_uptime(LEGACY_UPTIME_OFFSET_SECS + 5000.0), 5000.0);
        assert_eq!(correct_legacy_uptime(LEGACY_UPTIME_OFFSET_SECS), 0.0);
        assert_eq!(correct_legacy_uptime(86_400.0), 86_400.0);
    }

    #[test]
    fn test_resource_state_transitions() {
        let mut state = ResourceState::default();
        assert!(!state.is_cached());

        assert_eq!(state.record_failure(), 1);
        assert_eq!(state.record_failure(), 2);
        assert!(!state.is_cached());

        state.store(ResourceValue::Gauge(1.5));
        assert!(state.is_cached());
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.cached().and_then(ResourceValue::as_f64), Some(1.5));
    }
}
