//! Spreadsheet ledger implementation
//!
//! Stores one record per row of a Google Sheets worksheet through the values
//! API. The worksheet keeps a header row:
//!
//! `member_id | username | display_name | space_id | space_name | acknowledged_at | version`
//!
//! A spreadsheet has no unique constraint, so every write runs under an
//! in-process mutex: read the rows, then update the matching row in place or
//! append. A single writer process per worksheet is assumed.

use crate::error::{LedgerResult, StorageError};
use crate::records::{
    format_timestamp, parse_timestamp, sort_newest_first, stats_of, unacknowledged_among,
};
use crate::traits::Ledger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use covenant_types::{
    AcknowledgementRecord, DisplayMetadata, LedgerStats, MemberId, PolicyVersion, RecordVersion,
    SpaceId,
};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::Mutex;

/// Column header written to row 1
pub const SHEET_HEADER: [&str; 7] = [
    "member_id",
    "username",
    "display_name",
    "space_id",
    "space_name",
    "acknowledged_at",
    "version",
];

/// Connection settings for the spreadsheet ledger
#[derive(Debug, Clone)]
pub struct SheetsOptions {
    /// API root, `https://sheets.googleapis.com` in production
    pub api_base: String,
    pub spreadsheet_id: String,
    pub worksheet: String,
    /// OAuth bearer token with spreadsheet scope
    pub access_token: String,
    pub request_timeout: Duration,
}

impl SheetsOptions {
    pub fn new(spreadsheet_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            api_base: "https://sheets.googleapis.com".to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            worksheet: "Agreements".to_string(),
            access_token: access_token.into(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_worksheet(mut self, worksheet: impl Into<String>) -> Self {
        self.worksheet = worksheet.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// A record together with its 1-based sheet row
#[derive(Debug, Clone)]
struct SheetRow {
    row: usize,
    record: AcknowledgementRecord,
}

/// Google Sheets backed ledger
#[derive(Debug)]
pub struct SheetsLedger {
    client: Client,
    options: SheetsOptions,
    write_lock: Mutex<()>,
}

impl SheetsLedger {
    /// Build the client and make sure the header row is in place
    pub async fn connect(options: SheetsOptions) -> LedgerResult<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| StorageError::Connection(format!("failed to build HTTP client: {}", e)))?;

        let ledger = Self {
            client,
            options,
            write_lock: Mutex::new(()),
        };
        ledger.ensure_header().await?;
        Ok(ledger)
    }

    fn range(&self, cells: &str) -> String {
        format!("'{}'!{}", self.options.worksheet.replace('\'', "''"), cells)
    }

    fn values_url(&self, range: &str, action: Option<&str>) -> LedgerResult<Url> {
        let mut url = Url::parse(self.options.api_base.trim_end_matches('/'))
            .map_err(|e| StorageError::Connection(format!("invalid sheets api base: {}", e)))?;

        let last = match action {
            Some(action) => format!("{}:{}", range, action),
            None => range.to_string(),
        };

        url.path_segments_mut()
            .map_err(|_| StorageError::Connection("sheets api base cannot be a base".into()))?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                self.options.spreadsheet_id.as_str(),
                "values",
                last.as_str(),
            ]);
        Ok(url)
    }

    async fn read_range(&self, range: &str) -> LedgerResult<Vec<Vec<Value>>> {
        let url = self.values_url(range, None)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.options.access_token)
            .send()
            .await
            .map_err(|e| StorageError::Remote(format!("sheets read failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Remote(format!("sheets error {}: {}", status, body)));
        }

        let body: ValueRange = response
            .json()
            .await
            .map_err(|e| StorageError::InvalidData(format!("invalid sheets response: {}", e)))?;
        Ok(body.values)
    }

    async fn write_row(&self, row: usize, cells: Vec<Value>) -> LedgerResult<()> {
        let range = self.range(&format!("A{row}:G{row}"));
        let mut url = self.values_url(&range, None)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let payload = json!({ "range": range, "values": [cells] });
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.options.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| StorageError::Remote(format!("sheets update failed: {}", e)))?;

        Self::check(response).await
    }

    async fn append_row(&self, cells: Vec<Value>) -> LedgerResult<()> {
        let range = self.range("A:G");
        let mut url = self.values_url(&range, Some("append"))?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let payload = json!({ "values": [cells] });
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.options.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| StorageError::Remote(format!("sheets append failed: {}", e)))?;

        Self::check(response).await
    }

    async fn check(response: reqwest::Response) -> LedgerResult<()> {
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(StorageError::Remote(format!("sheets error {}: {}", status, body)))
    }

    async fn ensure_header(&self) -> LedgerResult<()> {
        let rows = self.read_range(&self.range("A1:G1")).await?;
        let current: Vec<String> = rows
            .first()
            .map(|row| row.iter().map(cell_text).collect())
            .unwrap_or_default();

        if current.iter().map(String::as_str).eq(SHEET_HEADER) {
            return Ok(());
        }

        tracing::info!(worksheet = %self.options.worksheet, "Writing ledger header row");
        let header = SHEET_HEADER.iter().map(|h| json!(h)).collect();
        self.write_row(1, header).await
    }

    /// All decodable records; undecodable rows are logged and skipped
    async fn rows(&self) -> LedgerResult<Vec<SheetRow>> {
        let values = self.read_range(&self.range("A:G")).await?;
        let mut rows = Vec::with_capacity(values.len().saturating_sub(1));

        for (index, cells) in values.iter().enumerate().skip(1) {
            let row = index + 1;
            if cells.iter().all(|c| cell_text(c).is_empty()) {
                continue;
            }
            match record_from_cells(cells) {
                Ok(record) => rows.push(SheetRow { row, record }),
                Err(e) => {
                    tracing::warn!(
                        worksheet = %self.options.worksheet,
                        row,
                        error = %e,
                        "Skipping undecodable ledger row"
                    );
                }
            }
        }
        Ok(rows)
    }

    async fn records_in(&self, space: Option<SpaceId>) -> LedgerResult<Vec<AcknowledgementRecord>> {
        Ok(self
            .rows()
            .await?
            .into_iter()
            .map(|r| r.record)
            .filter(|r| space.map_or(true, |s| r.space_id == s))
            .collect())
    }
}

#[async_trait]
impl Ledger for SheetsLedger {
    async fn upsert(&self, record: AcknowledgementRecord) -> LedgerResult<()> {
        let _guard = self.write_lock.lock().await;
        let rows = self.rows().await?;

        let existing = rows
            .iter()
            .find(|r| r.record.identity() == record.identity());

        match existing {
            Some(existing) if existing.record.acknowledged_at > record.acknowledged_at => {
                tracing::debug!(
                    member = %record.member_id,
                    space = %record.space_id,
                    version = %record.version,
                    "Ignoring stale acknowledgement write"
                );
                Ok(())
            }
            Some(existing) => self.write_row(existing.row, cells_from_record(&record)).await,
            None => self.append_row(cells_from_record(&record)).await,
        }
    }

    async fn has_acknowledged(
        &self,
        member: MemberId,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<bool> {
        Ok(self
            .records_in(Some(space))
            .await?
            .iter()
            .any(|r| r.member_id == member && r.acknowledges(version)))
    }

    async fn list_acknowledged(
        &self,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<Vec<AcknowledgementRecord>> {
        let mut records: Vec<_> = self
            .records_in(Some(space))
            .await?
            .into_iter()
            .filter(|r| r.acknowledges(version))
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn unacknowledged_members(
        &self,
        space: SpaceId,
        version: &PolicyVersion,
    ) -> LedgerResult<Vec<MemberId>> {
        let records = self.records_in(Some(space)).await?;
        Ok(unacknowledged_among(&records, version))
    }

    async fn discover(
        &self,
        member: MemberId,
        space: SpaceId,
        metadata: DisplayMetadata,
        seen_at: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let _guard = self.write_lock.lock().await;
        let known = self
            .rows()
            .await?
            .iter()
            .any(|r| r.record.member_id == member && r.record.space_id == space);
        if known {
            return Ok(false);
        }

        let record = AcknowledgementRecord::discovered(member, space, metadata, seen_at);
        self.append_row(cells_from_record(&record)).await?;
        Ok(true)
    }

    async fn known_spaces(&self) -> LedgerResult<Vec<SpaceId>> {
        let spaces: BTreeSet<SpaceId> = self
            .records_in(None)
            .await?
            .iter()
            .map(|r| r.space_id)
            .collect();
        Ok(spaces.into_iter().collect())
    }

    async fn export(&self, space: Option<SpaceId>) -> LedgerResult<Vec<AcknowledgementRecord>> {
        let mut records = self.records_in(space).await?;
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn stats(&self, space: SpaceId) -> LedgerResult<LedgerStats> {
        let records = self.records_in(Some(space)).await?;
        Ok(stats_of(&records))
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn optional(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn record_from_cells(cells: &[Value]) -> LedgerResult<AcknowledgementRecord> {
    let cell = |index: usize| cells.get(index).map(cell_text).unwrap_or_default();

    let member_id: i64 = cell(0)
        .parse()
        .map_err(|_| StorageError::InvalidData(format!("bad member_id: {:?}", cell(0))))?;
    let space_id: i64 = cell(3)
        .parse()
        .map_err(|_| StorageError::InvalidData(format!("bad space_id: {:?}", cell(3))))?;
    let version =
        RecordVersion::parse(&cell(6)).map_err(|e| StorageError::InvalidData(e.to_string()))?;

    Ok(AcknowledgementRecord {
        member_id: MemberId::new(member_id),
        space_id: SpaceId::new(space_id),
        version,
        metadata: DisplayMetadata {
            username: optional(cell(1)),
            display_name: optional(cell(2)),
            space_name: optional(cell(4)),
        },
        acknowledged_at: parse_timestamp(&cell(5))?,
    })
}

fn cells_from_record(record: &AcknowledgementRecord) -> Vec<Value> {
    let text = |v: &Option<String>| json!(v.clone().unwrap_or_default());
    vec![
        json!(record.member_id.to_string()),
        text(&record.metadata.username),
        text(&record.metadata.display_name),
        json!(record.space_id.to_string()),
        text(&record.metadata.space_name),
        json!(format_timestamp(&record.acknowledged_at)),
        json!(record.version.as_str()),
    ]
}
