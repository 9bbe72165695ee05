//! In-memory ledger implementation

use crate::error::LedgerResult;
use crate::records::{sort_newest_first, stats_of, unacknowledged_among};
use crate::traits::Ledger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use covenant_types::{
    AcknowledgementRecord, DisplayMetadata, LedgerStats, MemberId, PolicyVersion, RecordVersion,
    SpaceId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type RecordKey = (MemberId, RecordVersion);

/// In-memory ledger for development, rehearsal and tests
///
/// Records are partitioned by space, so per-space queries never touch other
/// spaces. Check-and-insert runs under a single write guard.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    spaces: Arc<RwLock<HashMap<SpaceId, HashMap<RecordKey, AcknowledgementRecord>>>>,
}

impl InMemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all spaces
    pub async fn len(&self) -> usize {
        let spaces = self.spaces.read().await;
        spaces.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn upsert(&self, record: AcknowledgementRecord) -> LedgerResult<()> {
        let mut spaces = self.spaces.write().await;
        let entries = spaces.entry(record.space_id).or_default();
        let key = (record.member_id, record.version.clone());

        match entries.get(&key) {
            Some(existing) if existing.acknowledged_at > record.acknowledged_at => {
                tracing::debug!(
                    member = %record.member_id,
                    space = %record.space_id,
                    version = %record.version,
                    "Ignoring stale acknowledgement write"
                );
            }
            _ => {
                entries.insert(key, record);
            }
        }
        Ok(())
    }

    async fn has_acknowledged(
        &self,
        member: MemberId,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<bool> {
        let spaces = self.spaces.read().await;
        let key = (member, RecordVersion::Policy(version.clone()));
        Ok(spaces
            .get(&space)
            .map(|entries| entries.contains_key(&key))
            .unwrap_or(false))
    }

    async fn list_acknowledged(
        &self,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<Vec<AcknowledgementRecord>> {
        let spaces = self.spaces.read().await;
        let mut records: Vec<_> = spaces
            .get(&space)
            .map(|entries| {
                entries
                    .values()
                    .filter(|r| r.acknowledges(version))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn unacknowledged_members(
        &self,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<Vec<MemberId>> {
        let spaces = self.spaces.read().await;
        Ok(spaces
            .get(&space)
            .map(|entries| unacknowledged_among(entries.values(), version))
            .unwrap_or_default())
    }

    async fn discover(
        &self,
        member: MemberId,
        space: SpaceId,
        metadata: DisplayMetadata,
        seen_at: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let mut spaces = self.spaces.write().await;
        let entries = spaces.entry(space).or_default();

        if entries.keys().any(|(m, _)| *m == member) {
            return Ok(false);
        }

        let record = AcknowledgementRecord::discovered(member, space, metadata, seen_at);
        entries.insert((member, RecordVersion::Discovered), record);
        Ok(true)
    }

    async fn known_spaces(&self) -> LedgerResult<Vec<SpaceId>> {
        let spaces = self.spaces.read().await;
        let mut ids: Vec<SpaceId> = spaces
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn export(&self, space: Option<SpaceId>) -> LedgerResult<Vec<AcknowledgementRecord>> {
        let spaces = self.spaces.read().await;
        let mut records: Vec<_> = match space {
            Some(space) => spaces
                .get(&space)
                .map(|entries| entries.values().cloned().collect())
                .unwrap_or_default(),
            None => spaces
                .values()
                .flat_map(|entries| entries.values().cloned())
                .collect(),
        };
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn stats(&self, space: SpaceId) -> LedgerResult<LedgerStats> {
        let spaces = self.spaces.read().await;
        Ok(spaces
            .get(&space)
            .map(|entries| stats_of(entries.values()))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const SPACE: SpaceId = SpaceId::new(-1001);

    fn v(s: &str) -> PolicyVersion {
        PolicyVersion::new(s).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn ack(member: i64, version: &str, secs: i64) -> AcknowledgementRecord {
        AcknowledgementRecord::acknowledgement(
            MemberId::new(member),
            SPACE,
            v(version),
            DisplayMetadata::new(),
            at(secs),
        )
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let ledger = InMemoryLedger::new();
        ledger.upsert(ack(100, "1.0", 0)).await.unwrap();
        ledger.upsert(ack(100, "1.0", 0)).await.unwrap();

        assert_eq!(ledger.len().await, 1);
        assert!(ledger
            .has_acknowledged(MemberId::new(100), SPACE, &v("1.0"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_upsert_last_write_wins_by_timestamp() {
        let ledger = InMemoryLedger::new();
        let newer = ack(100, "1.0", 60);
        let mut older = ack(100, "1.0", 0);
        older.metadata = DisplayMetadata::new().with_username("stale");

        ledger.upsert(newer.clone()).await.unwrap();
        ledger.upsert(older).await.unwrap();

        let records = ledger.export(Some(SPACE)).await.unwrap();
        assert_eq!(records, vec![newer]);
    }

    #[tokio::test]
    async fn test_discover_only_inserts_for_unknown_member() {
        let ledger = InMemoryLedger::new();
        let member = MemberId::new(200);

        assert!(ledger
            .discover(member, SPACE, DisplayMetadata::new(), at(0))
            .await
            .unwrap());
        assert!(!ledger
            .discover(member, SPACE, DisplayMetadata::new(), at(5))
            .await
            .unwrap());

        ledger.upsert(ack(300, "1.0", 1)).await.unwrap();
        assert!(!ledger
            .discover(MemberId::new(300), SPACE, DisplayMetadata::new(), at(2))
            .await
            .unwrap());

        assert_eq!(ledger.len().await, 2);
        assert!(!ledger.has_acknowledged(member, SPACE, &v("1.0")).await.unwrap());
    }

    #[tokio::test]
    async fn test_version_change_reimposes_obligation() {
        let ledger = InMemoryLedger::new();
        ledger.upsert(ack(100, "1.0", 0)).await.unwrap();

        let missing = ledger.unacknowledged_members(SPACE, &v("2.0")).await.unwrap();
        assert_eq!(missing, vec![MemberId::new(100)]);
        assert!(ledger
            .unacknowledged_members(SPACE, &v("1.0"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_spaces_are_isolated() {
        let ledger = InMemoryLedger::new();
        ledger.upsert(ack(100, "1.0", 0)).await.unwrap();

        let other = SpaceId::new(-2002);
        assert!(!ledger
            .has_acknowledged(MemberId::new(100), other, &v("1.0"))
            .await
            .unwrap());
        assert!(ledger.unacknowledged_members(other, &v("1.0")).await.unwrap().is_empty());
        assert_eq!(ledger.known_spaces().await.unwrap(), vec![SPACE]);
    }

    #[tokio::test]
    async fn test_list_acknowledged_newest_first() {
        let ledger = InMemoryLedger::new();
        ledger.upsert(ack(1, "1.0", 0)).await.unwrap();
        ledger.upsert(ack(2, "1.0", 30)).await.unwrap();
        ledger.upsert(ack(3, "2.0", 60)).await.unwrap();

        let listed = ledger.list_acknowledged(SPACE, &v("1.0")).await.unwrap();
        let ids: Vec<i64> = listed.iter().map(|r| r.member_id.get()).collect();
        assert_eq!(ids, vec![2, 1]);

        let stats = ledger.stats(SPACE).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.count_for("2.0"), 1);
        assert!(listed[0].acknowledged_at - listed[1].acknowledged_at == Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_concurrent_discovery_inserts_once() {
        let ledger = InMemoryLedger::new();
        let member = MemberId::new(500);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .discover(member, SPACE, DisplayMetadata::new(), at(i))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_keep_the_newest_row() {
        let ledger = InMemoryLedger::new();

        // Timestamps arrive out of order: 0, 7, 14, 5, 12, ...
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledger = ledger.clone();
                let mut record = ack(600, "1.0", (i * 7) % 16);
                record.metadata = DisplayMetadata::new().with_username(format!("writer{i}"));
                tokio::spawn(async move { ledger.upsert(record).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let records = ledger.export(Some(SPACE)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].acknowledged_at, at(15));
    }
}
