//! Dotted firmware version comparison.
//!
//! Versions compare component-wise as integers. When one version is a prefix
//! of the other, the shorter one is smaller: "2.1" < "2.1.0" < "2.1.1".

use std::fmt;
use std::str::FromStr;

/// A parsed dotted-integer firmware version such as `2.16` or `2.1.1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion(Vec<u64>);

impl FirmwareVersion {
    /// The version components.
    pub fn components(&self) -> &[u64] {
        &self.0
    }
}

/// Error returned for strings that are not dotted integers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid firmware version '{0}'")]
pub struct ParseVersionError(String);

impl FromStr for FirmwareVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseVersionError(s.to_string()));
        }

        s.split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map(FirmwareVersion)
            .map_err(|_| ParseVersionError(s.to_string()))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Check whether `version` is at least `minimum`.
///
/// An unknown (`None`) or unparseable version is never at least anything.
pub fn at_least(version: Option<&str>, minimum: &str) -> bool {
    let Some(version) = version else {
        return false;
    };

    match (
        version.parse::<FirmwareVersion>(),
        minimum.parse::<FirmwareVersion>(),
    ) {
        (Ok(version), Ok(minimum)) => version >= minimum,
        _ => false,
    }
}
