//! Semantic version triple for published flows.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `MAJOR.MINOR.PATCH`. Flows are immutable once published; a change is
/// a new version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Version {
    /// Breaking changes to the flow's contract.
    pub major: u64,
    /// Backwards-compatible additions.
    pub minor: u64,
    /// Fixes with no contract change.
    pub patch: u64,
}

impl Version {
    /// Builds a version triple.
    #[must_use]
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let parse_part = |part: Option<&str>| -> Result<u64, String> {
            let part = part.ok_or_else(|| format!("invalid version `{s}`"))?;
            part.parse::<u64>()
                .map_err(|_| format!("invalid version `{s}`"))
        };
        let major = parse_part(parts.next())?;
        let minor = parse_part(parts.next())?;
        let patch = parse_part(parts.next())?;
        if parts.next().is_some() {
            return Err(format!("invalid version `{s}`"));
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}
