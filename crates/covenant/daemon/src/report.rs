//! Read-only ledger reports for administrators

use crate::error::DaemonResult;
use covenant_ledger::Ledger;
use covenant_types::{PolicyVersion, SpaceId};
use std::io::Write;

/// Members holding an acknowledgement of `version` in `space`, newest first
pub async fn who_acknowledged(
    ledger: &dyn Ledger,
    space: SpaceId,
    version: &PolicyVersion,
    out: &mut dyn Write,
) -> DaemonResult<usize> {
    let records = ledger.list_acknowledged(space, version).await?;

    if records.is_empty() {
        writeln!(out, "No members have acknowledged policy v{} in {} yet.", version, space)?;
        return Ok(0);
    }

    writeln!(
        out,
        "Members who acknowledged policy v{} in {}: {} total",
        version,
        space,
        records.len()
    )?;
    for record in &records {
        let label = record
            .metadata
            .label()
            .unwrap_or_else(|| "unknown".to_string());
        writeln!(
            out,
            "  {:>14}  {:<32}  {}",
            record.member_id,
            label,
            record.acknowledged_at.to_rfc3339()
        )?;
    }
    Ok(records.len())
}

/// Known members of `space` still owing an acknowledgement of `version`
pub async fn unacknowledged(
    ledger: &dyn Ledger,
    space: SpaceId,
    version: &PolicyVersion,
    out: &mut dyn Write,
) -> DaemonResult<usize> {
    let members = ledger.unacknowledged_members(space, version).await?;
    writeln!(
        out,
        "Known members of {} without policy v{}: {}",
        space,
        version,
        members.len()
    )?;
    for member in &members {
        writeln!(out, "  {}", member)?;
    }
    Ok(members.len())
}

/// Record counts per stored version, as JSON
pub async fn stats(ledger: &dyn Ledger, space: SpaceId, out: &mut dyn Write) -> DaemonResult<()> {
    let stats = ledger.stats(space).await?;
    serde_json::to_writer_pretty(&mut *out, &stats)?;
    writeln!(out)?;
    Ok(())
}

/// Every record as one JSON object per line
pub async fn export(
    ledger: &dyn Ledger,
    space: Option<SpaceId>,
    out: &mut dyn Write,
) -> DaemonResult<usize> {
    let records = ledger.export(space).await?;
    for record in &records {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out)?;
    }
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use covenant_ledger::InMemoryLedger;
    use covenant_types::{AcknowledgementRecord, DisplayMetadata, MemberId};

    async fn ledger() -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        let space = SpaceId::new(-1001);
        ledger
            .upsert(AcknowledgementRecord::acknowledgement(
                MemberId::new(100),
                space,
                PolicyVersion::new("1.0").unwrap(),
                DisplayMetadata::new().with_username("alice"),
                Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            ))
            .await
            .unwrap();
        ledger
            .discover(MemberId::new(200), space, DisplayMetadata::new(), Utc::now())
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_who_acknowledged_lists_labels() {
        let ledger = ledger().await;
        let mut out = Vec::new();
        let count = who_acknowledged(
            &ledger,
            SpaceId::new(-1001),
            &PolicyVersion::new("1.0").unwrap(),
            &mut out,
        )
        .await
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(count, 1);
        assert!(text.contains("1 total"));
        assert!(text.contains("@alice"));
        assert!(!text.contains("200"));
    }

    #[tokio::test]
    async fn test_unacknowledged_after_version_bump() {
        let ledger = ledger().await;
        let mut out = Vec::new();
        let count = unacknowledged(
            &ledger,
            SpaceId::new(-1001),
            &PolicyVersion::new("2.0").unwrap(),
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_export_is_json_lines() {
        let ledger = ledger().await;
        let mut out = Vec::new();
        let count = export(&ledger, None, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(count, 2);
        assert_eq!(lines.len(), 2);
        for line in lines {
            let record: AcknowledgementRecord = serde_json::from_str(line).unwrap();
            assert_eq!(record.space_id, SpaceId::new(-1001));
        }
    }

    #[tokio::test]
    async fn test_stats_counts_sentinels() {
        let ledger = ledger().await;
        let mut out = Vec::new();
        stats(&ledger, SpaceId::new(-1001), &mut out).await.unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["total"], 2);
        assert_eq!(value["by_version"]["1.0"], 1);
        assert_eq!(value["by_version"]["discovered"], 1);
    }
}
