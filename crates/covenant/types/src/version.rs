//! Policy versions and the discovery sentinel
//!
//! A ledger row either names a real policy version or carries the reserved
//! `discovered` marker, which only states that the member exists in the space.
//! `PolicyVersion` can never hold the marker, so a sentinel row cannot satisfy
//! an acknowledgement check for any real version.

use crate::error::TypeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved version string stored for passively discovered members
pub const DISCOVERED_MARKER: &str = "discovered";

/// A real, acknowledgeable policy version (e.g. `"1.0"`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PolicyVersion(String);

impl PolicyVersion {
    pub fn new(version: impl Into<String>) -> Result<Self, TypeError> {
        let version = version.into();
        let trimmed = version.trim();
        if trimmed.is_empty() {
            return Err(TypeError::EmptyVersion);
        }
        if trimmed.eq_ignore_ascii_case(DISCOVERED_MARKER) {
            return Err(TypeError::ReservedVersion(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PolicyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PolicyVersion {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PolicyVersion {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PolicyVersion> for String {
    fn from(version: PolicyVersion) -> Self {
        version.0
    }
}

/// Version column of a ledger row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RecordVersion {
    /// Member acknowledged this policy version
    Policy(PolicyVersion),

    /// Member is known to exist in the space, nothing acknowledged
    Discovered,
}

impl RecordVersion {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Discovered)
    }

    /// The acknowledged version, if this is a real acknowledgement
    pub fn policy(&self) -> Option<&PolicyVersion> {
        match self {
            Self::Policy(version) => Some(version),
            Self::Discovered => None,
        }
    }

    /// Storage representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Policy(version) => version.as_str(),
            Self::Discovered => DISCOVERED_MARKER,
        }
    }

    /// Decode a stored version string
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        if raw.trim().eq_ignore_ascii_case(DISCOVERED_MARKER) {
            return Ok(Self::Discovered);
        }
        PolicyVersion::new(raw).map(Self::Policy)
    }
}

impl fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PolicyVersion> for RecordVersion {
    fn from(version: PolicyVersion) -> Self {
        Self::Policy(version)
    }
}

impl TryFrom<String> for RecordVersion {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RecordVersion> for String {
    fn from(version: RecordVersion) -> Self {
        version.as_str().to_string()
    }
}
