//! Acknowledgement records and ledger statistics

use crate::ids::{MemberId, SpaceId};
use crate::version::{PolicyVersion, RecordVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Display metadata kept for reporting only; never part of record identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_name: Option<String>,
}

impl DisplayMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = non_empty(username.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = non_empty(display_name.into());
        self
    }

    pub fn with_space_name(mut self, space_name: impl Into<String>) -> Self {
        self.space_name = non_empty(space_name.into());
        self
    }

    /// Best human-readable label for reports: `@username`, then display name
    pub fn label(&self) -> Option<String> {
        self.username
            .as_ref()
            .map(|u| format!("@{}", u))
            .or_else(|| self.display_name.clone())
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// The durable fact "member M acknowledged version V in space G at time T"
///
/// Identity is `(member_id, space_id, version)`. A record whose version is the
/// sentinel only states that the member is known to exist in the space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgementRecord {
    pub member_id: MemberId,
    pub space_id: SpaceId,
    pub version: RecordVersion,
    #[serde(flatten)]
    pub metadata: DisplayMetadata,
    pub acknowledged_at: DateTime<Utc>,
}

impl AcknowledgementRecord {
    /// A real acknowledgement of `version`
    pub fn acknowledgement(
        member_id: MemberId,
        space_id: SpaceId,
        version: PolicyVersion,
        metadata: DisplayMetadata,
        acknowledged_at: DateTime<Utc>,
    ) -> Self {
        Self {
            member_id,
            space_id,
            version: RecordVersion::Policy(version),
            metadata,
            acknowledged_at,
        }
    }

    /// A sentinel row for a passively discovered member
    pub fn discovered(
        member_id: MemberId,
        space_id: SpaceId,
        metadata: DisplayMetadata,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            member_id,
            space_id,
            version: RecordVersion::Discovered,
            metadata,
            acknowledged_at: seen_at,
        }
    }

    /// Whether this record proves acknowledgement of exactly `version`
    pub fn acknowledges(&self, version: &PolicyVersion) -> bool {
        self.version.policy() == Some(version)
    }

    pub fn is_sentinel(&self) -> bool {
        self.version.is_sentinel()
    }

    pub fn identity(&self) -> (MemberId, SpaceId, &RecordVersion) {
        (self.member_id, self.space_id, &self.version)
    }
}

/// Per-space ledger statistics, reporting only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Total records in the space, sentinels included
    pub total: u64,

    /// Record count keyed by stored version string
    pub by_version: BTreeMap<String, u64>,
}

impl LedgerStats {
    pub fn count_for(&self, version: &str) -> u64 {
        self.by_version.get(version).copied().unwrap_or(0)
    }
}
