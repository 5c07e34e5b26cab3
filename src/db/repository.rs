use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    EnrichmentResult, Entry, NewEntry, ProcessingStatus, SummaryCacheEntry, SummaryResult,
};

use super::schema::SCHEMA;
use super::{EntryStore, SummaryCacheStore};

const ENTRY_COLUMNS: &str = r#"id, created_at, updated_at, source_url, normalized_url, tag, notes,
    time_spent_seconds, quantity, canonical_url, domain, source_type, title, description,
    published_at, runtime_seconds, metadata_json, enrichment_status, enrichment_error, enriched_at,
    summary_text, summary_status, summary_error, summary_provider, summary_model, summary_version,
    summary_generated_at"#;

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Entry operations

    pub async fn insert_entry(&self, entry: NewEntry) -> Result<Entry> {
        let id = Uuid::new_v4();
        let now = timestamp(Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO entries (id, created_at, updated_at, source_url, normalized_url, tag, notes,
                                           time_spent_seconds, quantity)
                       VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                    params![
                        id.to_string(),
                        now,
                        entry.source_url,
                        entry.normalized_url,
                        entry.tag,
                        entry.notes,
                        entry.time_spent_seconds,
                        entry.quantity,
                    ],
                )?;
                Ok(())
            })
            .await?;

        self.get_entry(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Entry {} vanished after insert", id).into())
    }

    pub async fn get_entry(&self, id: Uuid) -> Result<Option<Entry>> {
        let entry = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS))?;
                let entry = stmt
                    .query_row(params![id.to_string()], entry_from_row)
                    .optional()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    async fn list_entries_where(&self, condition: &'static str, limit: usize) -> Result<Vec<Entry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM entries WHERE {} ORDER BY created_at ASC, rowid ASC LIMIT ?1",
                    ENTRY_COLUMNS, condition
                ))?;
                let entries = stmt
                    .query_map(params![limit], entry_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }
}

#[async_trait]
impl EntryStore for Repository {
    async fn list_pending_enrichment(&self, limit: usize) -> Result<Vec<Entry>> {
        self.list_entries_where("enrichment_status = 'pending'", limit)
            .await
    }

    async fn list_pending_summary(&self, limit: usize) -> Result<Vec<Entry>> {
        self.list_entries_where("summary_status = 'pending' AND enrichment_status = 'ok'", limit)
            .await
    }

    async fn update_enrichment_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let now = Utc::now();
        let enriched_at = matches!(status, ProcessingStatus::Ok | ProcessingStatus::Failed)
            .then(|| timestamp(now));
        let sql = format!(
            r#"UPDATE entries
               SET enrichment_status = ?2, enrichment_error = ?3, enriched_at = ?4, updated_at = ?5
               WHERE id = ?1 AND enrichment_status IN ({})"#,
            status_list(status.predecessors())
        );
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    &sql,
                    params![id.to_string(), status, error, enriched_at, timestamp(now)],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn update_enrichment_result(&self, id: Uuid, result: EnrichmentResult) -> Result<bool> {
        let metadata_json = result
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = timestamp(Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    r#"UPDATE entries
                       SET canonical_url = ?2, domain = ?3, source_type = ?4, title = ?5, description = ?6,
                           published_at = ?7, runtime_seconds = ?8, metadata_json = ?9,
                           enrichment_status = 'ok', enrichment_error = NULL, enriched_at = ?10, updated_at = ?10
                       WHERE id = ?1 AND enrichment_status = 'processing'"#,
                    params![
                        id.to_string(),
                        result.canonical_url,
                        result.domain,
                        result.source_type,
                        result.title,
                        result.description,
                        result.published_at.map(timestamp),
                        result.runtime_seconds,
                        metadata_json,
                        now,
                    ],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn update_summary_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        error: Option<String>,
    ) -> Result<bool> {
        // Claims and terminal outcomes other than failure need a finished enrichment
        let enrichment_guard = match status {
            ProcessingStatus::Processing | ProcessingStatus::Skipped | ProcessingStatus::Ok => {
                " AND enrichment_status = 'ok'"
            }
            ProcessingStatus::Pending | ProcessingStatus::Failed => "",
        };
        let sql = format!(
            r#"UPDATE entries
               SET summary_status = ?2, summary_error = ?3, updated_at = ?4
               WHERE id = ?1 AND summary_status IN ({}){}"#,
            status_list(status.predecessors()),
            enrichment_guard
        );
        let now = timestamp(Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(&sql, params![id.to_string(), status, error, now])?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn update_summary_result(&self, id: Uuid, result: SummaryResult) -> Result<bool> {
        let now = timestamp(Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    r#"UPDATE entries
                       SET summary_text = ?2, summary_provider = ?3, summary_model = ?4, summary_version = ?5,
                           summary_status = 'ok', summary_error = NULL, summary_generated_at = ?6, updated_at = ?7
                       WHERE id = ?1 AND summary_status IN ('pending', 'processing')
                         AND enrichment_status = 'ok'"#,
                    params![
                        id.to_string(),
                        result.text,
                        result.provider,
                        result.model,
                        result.version,
                        timestamp(result.generated_at),
                        now,
                    ],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn reset_enrichment(&self, id: Uuid) -> Result<bool> {
        let now = timestamp(Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    r#"UPDATE entries
                       SET enrichment_status = 'pending', enrichment_error = NULL, enriched_at = NULL, updated_at = ?2
                       WHERE id = ?1"#,
                    params![id.to_string(), now],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn reset_summary(&self, id: Uuid) -> Result<bool> {
        let now = timestamp(Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    r#"UPDATE entries
                       SET summary_status = 'pending', summary_error = NULL, summary_generated_at = NULL, updated_at = ?2
                       WHERE id = ?1"#,
                    params![id.to_string(), now],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn requeue_stale_processing(&self) -> Result<usize> {
        let now = timestamp(Utc::now());
        let touched = self
            .conn
            .call(move |conn| {
                let enrichment = conn.execute(
                    "UPDATE entries SET enrichment_status = 'pending', updated_at = ?1 WHERE enrichment_status = 'processing'",
                    params![now],
                )?;
                let summary = conn.execute(
                    "UPDATE entries SET summary_status = 'pending', updated_at = ?1 WHERE summary_status = 'processing'",
                    params![now],
                )?;
                Ok(enrichment + summary)
            })
            .await?;
        Ok(touched)
    }
}

#[async_trait]
impl SummaryCacheStore for Repository {
    async fn get_by_hash(&self, url_hash: &str) -> Result<Option<SummaryCacheEntry>> {
        let url_hash = url_hash.to_string();
        let entry = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT url_hash, canonical_url, summary_text, provider, model, version, created_at FROM summary_cache WHERE url_hash = ?1",
                )?;
                let entry = stmt
                    .query_row(params![url_hash], cache_entry_from_row)
                    .optional()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    async fn put(&self, entry: SummaryCacheEntry) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO summary_cache (url_hash, canonical_url, summary_text, provider, model, version, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                       ON CONFLICT(url_hash) DO UPDATE SET
                           summary_text = excluded.summary_text,
                           provider = excluded.provider,
                           model = excluded.model,
                           version = excluded.version,
                           created_at = excluded.created_at"#,
                    params![
                        entry.url_hash,
                        entry.canonical_url,
                        entry.summary_text,
                        entry.provider,
                        entry.model,
                        entry.version,
                        timestamp(entry.created_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn status_list(statuses: &[ProcessingStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56.000000Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn optional_datetime(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn required_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(optional_datetime(row, idx)?.unwrap_or_else(Utc::now))
}

fn entry_from_row(row: &Row) -> rusqlite::Result<Entry> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    Ok(Entry {
        id,
        created_at: required_datetime(row, 1)?,
        updated_at: required_datetime(row, 2)?,
        source_url: row.get(3)?,
        normalized_url: row.get(4)?,
        tag: row.get(5)?,
        notes: row.get(6)?,
        time_spent_seconds: row.get(7)?,
        quantity: row.get(8)?,
        canonical_url: row.get(9)?,
        domain: row.get(10)?,
        source_type: row.get(11)?,
        title: row.get(12)?,
        description: row.get(13)?,
        published_at: optional_datetime(row, 14)?,
        runtime_seconds: row.get(15)?,
        metadata: row
            .get::<_, Option<String>>(16)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        enrichment_status: row.get(17)?,
        enrichment_error: row.get(18)?,
        enriched_at: optional_datetime(row, 19)?,
        summary_text: row.get(20)?,
        summary_status: row.get(21)?,
        summary_error: row.get(22)?,
        summary_provider: row.get(23)?,
        summary_model: row.get(24)?,
        summary_version: row.get(25)?,
        summary_generated_at: optional_datetime(row, 26)?,
    })
}

fn cache_entry_from_row(row: &Row) -> rusqlite::Result<SummaryCacheEntry> {
    Ok(SummaryCacheEntry {
        url_hash: row.get(0)?,
        canonical_url: row.get(1)?,
        summary_text: row.get(2)?,
        provider: row.get(3)?,
        model: row.get(4)?,
        version: row.get(5)?,
        created_at: required_datetime(row, 6)?,
    })
}
