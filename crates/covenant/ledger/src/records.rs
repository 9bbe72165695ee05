//! Record helpers shared by the ledger realizations
//!
//! Timestamp encoding for text-backed stores, plus the derived-set
//! computations for backends that hold plain record lists.

use crate::error::{LedgerResult, StorageError};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use covenant_types::{AcknowledgementRecord, LedgerStats, MemberId, PolicyVersion};
use std::collections::BTreeSet;

/// Encode a timestamp as RFC 3339 UTC with microseconds
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a stored timestamp.
///
/// Accepts RFC 3339 with any offset, and naive ISO-8601 without an offset,
/// which older ledgers wrote; naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> LedgerResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(StorageError::InvalidData(format!(
        "unrecognised timestamp: {}",
        raw
    )))
}

/// Sort newest first; member id breaks ties so output is stable
pub fn sort_newest_first(records: &mut [AcknowledgementRecord]) {
    records.sort_by(|a, b| {
        b.acknowledged_at
            .cmp(&a.acknowledged_at)
            .then_with(|| a.member_id.cmp(&b.member_id))
    });
}

/// `KnownMembers − AcknowledgedSet(version)` over the records of one space
pub fn unacknowledged_among<'a, I>(records: I, version: &PolicyVersion) -> Vec<MemberId>
where
    I: IntoIterator<Item = &'a AcknowledgementRecord>,
{
    let mut known = BTreeSet::new();
    let mut acknowledged = BTreeSet::new();
    for record in records {
        known.insert(record.member_id);
        if record.acknowledges(version) {
            acknowledged.insert(record.member_id);
        }
    }
    known.difference(&acknowledged).copied().collect()
}

/// Count records by stored version string
pub fn stats_of<'a, I>(records: I) -> LedgerStats
where
    I: IntoIterator<Item = &'a AcknowledgementRecord>,
{
    let mut stats = LedgerStats::default();
    for record in records {
        stats.total += 1;
        *stats
            .by_version
            .entry(record.version.as_str().to_string())
            .or_insert(0) += 1;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use covenant_types::{DisplayMetadata, SpaceId};

    fn ack(member: i64, version: &str, secs: i64) -> AcknowledgementRecord {
        AcknowledgementRecord::acknowledgement(
            MemberId::new(member),
            SpaceId::new(-1),
            PolicyVersion::new(version).unwrap(),
            DisplayMetadata::new(),
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
    }

    fn seen(member: i64, secs: i64) -> AcknowledgementRecord {
        AcknowledgementRecord::discovered(
            MemberId::new(member),
            SpaceId::new(-1),
            DisplayMetadata::new(),
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
    }

    #[test]
    fn test_timestamp_format_is_micros_utc() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(format_timestamp(&at), "2024-03-01T12:30:00.000000Z");
        assert_eq!(parse_timestamp(&format_timestamp(&at)).unwrap(), at);
    }

    #[test]
    fn test_legacy_naive_timestamps_read_as_utc() {
        let expected = Utc.with_ymd_and_hms(2023, 11, 5, 8, 0, 1).unwrap()
            + chrono::Duration::microseconds(250_000);

        assert_eq!(parse_timestamp("2023-11-05T08:00:01.250000").unwrap(), expected);
        assert_eq!(parse_timestamp("2023-11-05 08:00:01.25").unwrap(), expected);
    }

    #[test]
    fn test_offset_timestamps_normalised() {
        let parsed = parse_timestamp("2024-01-01T02:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_unacknowledged_excludes_other_versions_and_sentinels() {
        let records = vec![ack(1, "1.0", 10), ack(2, "2.0", 11), seen(3, 12), seen(1, 5)];
        let v1 = PolicyVersion::new("1.0").unwrap();

        let missing = unacknowledged_among(&records, &v1);
        assert_eq!(missing, vec![MemberId::new(2), MemberId::new(3)]);
    }

    #[test]
    fn test_stats_counts_sentinels() {
        let records = vec![ack(1, "1.0", 1), ack(2, "1.0", 2), seen(3, 3)];
        let stats = stats_of(&records);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.count_for("1.0"), 2);
        assert_eq!(stats.count_for("discovered"), 1);
    }

    #[test]
    fn test_sort_newest_first() {
        let mut records = vec![ack(2, "1.0", 5), ack(1, "1.0", 9), ack(3, "1.0", 5)];
        sort_newest_first(&mut records);
        let order: Vec<i64> = records.iter().map(|r| r.member_id.get()).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
