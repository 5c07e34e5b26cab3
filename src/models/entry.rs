use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Youtube,
    Podcast,
    Article,
    Doc,
    #[default]
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Youtube => "youtube",
            SourceType::Podcast => "podcast",
            SourceType::Article => "article",
            SourceType::Doc => "doc",
            SourceType::Other => "other",
        }
    }

    /// Source types where an estimated reading time is meaningful.
    pub fn is_readable(&self) -> bool {
        matches!(self, SourceType::Article | SourceType::Doc | SourceType::Other)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "youtube" => Ok(SourceType::Youtube),
            "podcast" => Ok(SourceType::Podcast),
            "article" => Ok(SourceType::Article),
            "doc" => Ok(SourceType::Doc),
            "other" => Ok(SourceType::Other),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

/// Lifecycle of one pipeline stage on a record.
///
/// `pending -> processing -> {ok | failed | skipped}`. Terminal states only
/// leave through an explicit reset back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Ok,
    Failed,
    Skipped,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Ok => "ok",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Skipped => "skipped",
        }
    }

    /// Statuses a record may be in for a conditional move to `self`.
    pub fn predecessors(&self) -> &'static [ProcessingStatus] {
        match self {
            ProcessingStatus::Processing => &[ProcessingStatus::Pending],
            ProcessingStatus::Ok | ProcessingStatus::Failed => &[ProcessingStatus::Processing],
            ProcessingStatus::Skipped => &[ProcessingStatus::Pending, ProcessingStatus::Processing],
            ProcessingStatus::Pending => &[
                ProcessingStatus::Pending,
                ProcessingStatus::Processing,
                ProcessingStatus::Ok,
                ProcessingStatus::Failed,
                ProcessingStatus::Skipped,
            ],
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "ok" => Ok(ProcessingStatus::Ok),
            "failed" => Ok(ProcessingStatus::Failed),
            "skipped" => Ok(ProcessingStatus::Skipped),
            other => Err(format!("unknown processing status: {}", other)),
        }
    }
}

impl ToSql for ProcessingStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ProcessingStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for SourceType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SourceType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// A captured URL together with its enrichment and summary state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // User input, owned by the capture layer
    pub source_url: String,
    pub normalized_url: String,
    pub tag: Option<String>,
    pub notes: Option<String>,
    pub time_spent_seconds: Option<i64>,
    pub quantity: Option<i64>,

    // Enrichment
    pub canonical_url: Option<String>,
    pub domain: Option<String>,
    pub source_type: SourceType,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub runtime_seconds: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    pub enrichment_status: ProcessingStatus,
    pub enrichment_error: Option<String>,
    pub enriched_at: Option<DateTime<Utc>>,

    // Summary
    pub summary_text: Option<String>,
    pub summary_status: ProcessingStatus,
    pub summary_error: Option<String>,
    pub summary_provider: Option<String>,
    pub summary_model: Option<String>,
    pub summary_version: Option<String>,
    pub summary_generated_at: Option<DateTime<Utc>>,
}

impl Entry {
    /// URL used for the summary cache key: canonical when known, else the source URL.
    pub fn cache_url(&self) -> &str {
        self.canonical_url.as_deref().unwrap_or(&self.source_url)
    }

    pub fn has_summarizable_content(&self) -> bool {
        let present = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.title) || present(&self.description)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub source_url: String,
    pub normalized_url: String,
    pub tag: Option<String>,
    pub notes: Option<String>,
    pub time_spent_seconds: Option<i64>,
    pub quantity: Option<i64>,
}

/// Sanitized enrichment output, written in one update alongside status `ok`.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentResult {
    pub canonical_url: Option<String>,
    pub domain: Option<String>,
    pub source_type: SourceType,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub runtime_seconds: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}
