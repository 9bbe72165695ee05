//! SQLite ledger implementation

use crate::error::{LedgerResult, StorageError};
use crate::records::{format_timestamp, parse_timestamp, sort_newest_first};
use crate::traits::Ledger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use covenant_types::{
    AcknowledgementRecord, DisplayMetadata, LedgerStats, MemberId, PolicyVersion, RecordVersion,
    SpaceId, DISCOVERED_MARKER,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const RECORD_COLUMNS: &str =
    "member_id, username, display_name, space_id, space_name, acknowledged_at, version";

/// SQLite-backed ledger
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Connect to a SQLite database URL (e.g. `sqlite://covenant.db`) and
    /// initialize the schema. The file is created when missing.
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Self::with_pool(pool).await
    }

    /// Open (or create) a database file
    pub async fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Self::with_pool(pool).await
    }

    /// A private in-memory database.
    ///
    /// Every SQLite memory connection is its own database, so the pool is held
    /// at one connection that never expires.
    pub async fn in_memory() -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> LedgerResult<Self> {
        let ledger = Self { pool };
        ledger.initialize_schema().await?;
        Ok(ledger)
    }

    async fn initialize_schema(&self) -> LedgerResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS acknowledgements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                member_id INTEGER NOT NULL,
                username TEXT,
                display_name TEXT,
                space_id INTEGER NOT NULL,
                space_name TEXT,
                acknowledged_at TEXT NOT NULL,
                version TEXT NOT NULL,
                UNIQUE(member_id, space_id, version)
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS idx_member_space ON acknowledgements(member_id, space_id);"#,
            r#"CREATE INDEX IF NOT EXISTS idx_space_version ON acknowledgements(space_id, version);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Query(e.to_string()))?;
        }

        Ok(())
    }

    fn record_from_row(row: &SqliteRow) -> LedgerResult<AcknowledgementRecord> {
        let member_id: i64 = row
            .try_get("member_id")
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let space_id: i64 = row
            .try_get("space_id")
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let version: String = row
            .try_get("version")
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let acknowledged_at: String = row
            .try_get("acknowledged_at")
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        let metadata = DisplayMetadata {
            username: row.try_get("username").unwrap_or(None),
            display_name: row.try_get("display_name").unwrap_or(None),
            space_name: row.try_get("space_name").unwrap_or(None),
        };

        Ok(AcknowledgementRecord {
            member_id: MemberId::new(member_id),
            space_id: SpaceId::new(space_id),
            version: RecordVersion::parse(&version)
                .map_err(|e| StorageError::InvalidData(e.to_string()))?,
            metadata,
            acknowledged_at: parse_timestamp(&acknowledged_at)?,
        })
    }

    fn records_from_rows(rows: &[SqliteRow]) -> LedgerResult<Vec<AcknowledgementRecord>> {
        let mut records = rows
            .iter()
            .map(Self::record_from_row)
            .collect::<LedgerResult<Vec<_>>>()?;
        // Legacy rows hold naive timestamps; order by parsed time, not text.
        sort_newest_first(&mut records);
        Ok(records)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn upsert(&self, record: AcknowledgementRecord) -> LedgerResult<()> {
        let sql = format!(
            r#"
            INSERT INTO acknowledgements ({RECORD_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(member_id, space_id, version) DO UPDATE SET
                username = excluded.username,
                display_name = excluded.display_name,
                space_name = excluded.space_name,
                acknowledged_at = excluded.acknowledged_at
            WHERE excluded.acknowledged_at >= acknowledgements.acknowledged_at
            "#
        );

        sqlx::query(&sql)
            .bind(record.member_id.get())
            .bind(&record.metadata.username)
            .bind(&record.metadata.display_name)
            .bind(record.space_id.get())
            .bind(&record.metadata.space_name)
            .bind(format_timestamp(&record.acknowledged_at))
            .bind(record.version.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(())
    }

    async fn has_acknowledged(
        &self,
        member: MemberId,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM acknowledgements WHERE member_id = ? AND space_id = ? AND version = ? LIMIT 1",
        )
        .bind(member.get())
        .bind(space.get())
        .bind(version.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(row.is_some())
    }

    async fn list_acknowledged(
        &self,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<Vec<AcknowledgementRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM acknowledgements \
             WHERE space_id = ? AND version = ? ORDER BY acknowledged_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(space.get())
            .bind(version.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        Self::records_from_rows(&rows)
    }

    async fn unacknowledged_members(
        &self,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<Vec<MemberId>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT member_id FROM acknowledgements
            WHERE space_id = ?
              AND member_id NOT IN (
                  SELECT member_id FROM acknowledgements
                  WHERE space_id = ? AND version = ?
              )
            ORDER BY member_id ASC
            "#,
        )
        .bind(space.get())
        .bind(space.get())
        .bind(version.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>("member_id")
                    .map(MemberId::new)
                    .map_err(|e| StorageError::InvalidData(e.to_string()))
            })
            .collect()
    }

    async fn discover(
        &self,
        member: MemberId,
        space: SpaceId,
        metadata: DisplayMetadata,
        seen_at: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let sql = format!(
            r#"
            INSERT INTO acknowledgements ({RECORD_COLUMNS})
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM acknowledgements WHERE member_id = ? AND space_id = ?
            )
            ON CONFLICT(member_id, space_id, version) DO NOTHING
            "#
        );

        let result = sqlx::query(&sql)
            .bind(member.get())
            .bind(&metadata.username)
            .bind(&metadata.display_name)
            .bind(space.get())
            .bind(&metadata.space_name)
            .bind(format_timestamp(&seen_at))
            .bind(DISCOVERED_MARKER)
            .bind(member.get())
            .bind(space.get())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn known_spaces(&self) -> LedgerResult<Vec<SpaceId>> {
        let rows =
            sqlx::query("SELECT DISTINCT space_id FROM acknowledgements ORDER BY space_id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>("space_id")
                    .map(SpaceId::new)
                    .map_err(|e| StorageError::InvalidData(e.to_string()))
            })
            .collect()
    }

    async fn export(&self, space: Option<SpaceId>) -> LedgerResult<Vec<AcknowledgementRecord>> {
        let rows = match space {
            Some(space) => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM acknowledgements \
                     WHERE space_id = ? ORDER BY acknowledged_at DESC"
                );
                sqlx::query(&sql)
                    .bind(space.get())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM acknowledgements ORDER BY acknowledged_at DESC"
                );
                sqlx::query(&sql).fetch_all(&self.pool).await
            }
        }
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Self::records_from_rows(&rows)
    }

    async fn stats(&self, space: SpaceId) -> LedgerResult<LedgerStats> {
        let rows = sqlx::query(
            "SELECT version, COUNT(*) AS count FROM acknowledgements WHERE space_id = ? GROUP BY version",
        )
        .bind(space.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        let mut stats = LedgerStats::default();
        for row in rows {
            let version: String = row
                .try_get("version")
                .map_err(|e| StorageError::InvalidData(e.to_string()))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| StorageError::InvalidData(e.to_string()))?;
            let count = u64::try_from(count).unwrap_or(0);
            stats.total += count;
            stats.by_version.insert(version, count);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

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
            DisplayMetadata::new().with_username(format!("user{member}")),
            at(secs),
        )
    }

    #[tokio::test]
    async fn test_upsert_replaces_only_with_newer_timestamp() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger.upsert(ack(100, "1.0", 60)).await.unwrap();

        let mut stale = ack(100, "1.0", 0);
        stale.metadata = DisplayMetadata::new().with_username("stale");
        ledger.upsert(stale).await.unwrap();

        let mut fresh = ack(100, "1.0", 120);
        fresh.metadata = DisplayMetadata::new().with_username("fresh");
        ledger.upsert(fresh.clone()).await.unwrap();

        let records = ledger.export(Some(SPACE)).await.unwrap();
        assert_eq!(records, vec![fresh]);
    }

    #[tokio::test]
    async fn test_sentinel_never_acknowledges() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let member = MemberId::new(200);

        assert!(ledger
            .discover(member, SPACE, DisplayMetadata::new(), at(0))
            .await
            .unwrap());
        assert!(!ledger.has_acknowledged(member, SPACE, &v("1.0")).await.unwrap());
        assert_eq!(
            ledger.unacknowledged_members(SPACE, &v("1.0")).await.unwrap(),
            vec![member]
        );
    }

    #[tokio::test]
    async fn test_discover_skips_members_with_any_record() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger.upsert(ack(300, "0.9", 0)).await.unwrap();

        assert!(!ledger
            .discover(MemberId::new(300), SPACE, DisplayMetadata::new(), at(1))
            .await
            .unwrap());
        assert!(!ledger
            .discover(MemberId::new(300), SPACE, DisplayMetadata::new(), at(2))
            .await
            .unwrap());

        let stats = ledger.stats(SPACE).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.count_for(DISCOVERED_MARKER), 0);
    }

    #[tokio::test]
    async fn test_unacknowledged_members_sorted_and_scoped() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        for member in [30, 10, 20] {
            ledger
                .discover(MemberId::new(member), SPACE, DisplayMetadata::new(), at(0))
                .await
                .unwrap();
        }
        ledger.upsert(ack(20, "1.0", 5)).await.unwrap();

        let other = SpaceId::new(-2002);
        ledger
            .discover(MemberId::new(1), other, DisplayMetadata::new(), at(0))
            .await
            .unwrap();

        let missing = ledger.unacknowledged_members(SPACE, &v("1.0")).await.unwrap();
        assert_eq!(missing, vec![MemberId::new(10), MemberId::new(30)]);
        assert_eq!(ledger.known_spaces().await.unwrap(), vec![other, SPACE]);
    }

    #[tokio::test]
    async fn test_legacy_naive_timestamp_rows_load() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO acknowledgements (member_id, username, display_name, space_id, space_name, acknowledged_at, version) \
             VALUES (42, 'old', NULL, -1001, 'Legacy Group', '2023-05-01T09:15:00.123456', '1.0')",
        )
        .execute(&ledger.pool)
        .await
        .unwrap();

        let records = ledger.list_acknowledged(SPACE, &v("1.0")).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].acknowledged_at,
            Utc.with_ymd_and_hms(2023, 5, 1, 9, 15, 0).unwrap()
                + chrono::Duration::microseconds(123_456)
        );
        assert_eq!(records[0].metadata.space_name.as_deref(), Some("Legacy Group"));
    }

    #[tokio::test]
    async fn test_capitalized_sentinel_rows_load() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO acknowledgements (member_id, username, display_name, space_id, space_name, acknowledged_at, version) \
             VALUES (43, NULL, NULL, -1001, NULL, '2023-05-01T09:15:00', 'Discovered')",
        )
        .execute(&ledger.pool)
        .await
        .unwrap();
        ledger.upsert(ack(44, "1.0", 0)).await.unwrap();

        let records = ledger.export(Some(SPACE)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.member_id == MemberId::new(43) && r.is_sentinel()));
        assert_eq!(
            ledger.unacknowledged_members(SPACE, &v("1.0")).await.unwrap(),
            vec![MemberId::new(43)]
        );
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let ledger = SqliteLedger::open(&path).await.unwrap();
            ledger.upsert(ack(100, "1.0", 0)).await.unwrap();
        }

        let reopened = SqliteLedger::open(&path).await.unwrap();
        assert!(reopened
            .has_acknowledged(MemberId::new(100), SPACE, &v("1.0"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_discovery_inserts_once() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("race.db").display());
        let ledger = SqliteLedger::new(&url, 4, 5).await.unwrap();
        let member = MemberId::new(777);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .discover(member, SPACE, DisplayMetadata::new(), at(i))
                        .await
                })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if let Ok(true) = handle.await.unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(ledger.stats(SPACE).await.unwrap().total, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_keep_the_newest_row() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("upsert.db").display());
        let ledger = SqliteLedger::new(&url, 4, 5).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledger = ledger.clone();
                let record = ack(600, "1.0", (i * 7) % 16);
                tokio::spawn(async move { ledger.upsert(record).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let records = ledger.export(Some(SPACE)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].acknowledged_at, at(15));
        assert_eq!(ledger.stats(SPACE).await.unwrap().total, 1);
    }
}
