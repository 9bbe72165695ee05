//! Ledger trait definition

use crate::error::LedgerResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use covenant_types::{
    AcknowledgementRecord, DisplayMetadata, LedgerStats, MemberId, PolicyVersion, SpaceId,
};

/// Durable store of acknowledgement facts
///
/// Every realization enforces the `(member, space, version)` identity itself,
/// so concurrent writers never need a lock outside the ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert or replace the record with the same identity.
    ///
    /// The stored row is replaced only when the incoming `acknowledged_at` is
    /// greater than or equal to the stored one.
    async fn upsert(&self, record: AcknowledgementRecord) -> LedgerResult<()>;

    /// Whether a real record for exactly `version` exists
    async fn has_acknowledged(
        &self,
        member: MemberId,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<bool>;

    /// Records acknowledging `version` in `space`, newest first
    async fn list_acknowledged(
        &self,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<Vec<AcknowledgementRecord>>;

    /// Known members of `space` without a record for `version`, ascending id
    async fn unacknowledged_members(
        &self,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<Vec<MemberId>>;

    /// Record that `member` exists in `space`.
    ///
    /// Inserts a sentinel row only when the member has no record in the space
    /// at any version. Returns whether a row was inserted.
    async fn discover(
        &self,
        member: MemberId,
        space: SpaceId,
        metadata: DisplayMetadata,
        seen_at: DateTime<Utc>,
    ) -> LedgerResult<bool>;

    /// Every space holding at least one record, ascending id
    async fn known_spaces(&self) -> LedgerResult<Vec<SpaceId>>;

    /// All records, optionally limited to one space, newest first
    async fn export(&self, space: Option<SpaceId>) -> LedgerResult<Vec<AcknowledgementRecord>>;

    /// Record counts for one space
    async fn stats(&self, space: SpaceId) -> LedgerResult<LedgerStats>;
}
