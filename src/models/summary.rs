use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generated summary, written in one update alongside status `ok`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
}

/// One cached summary per URL hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryCacheEntry {
    pub url_hash: String,
    pub canonical_url: String,
    pub summary_text: String,
    pub provider: String,
    pub model: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

impl From<SummaryCacheEntry> for SummaryResult {
    fn from(entry: SummaryCacheEntry) -> Self {
        Self {
            text: entry.summary_text,
            provider: entry.provider,
            model: entry.model,
            version: entry.version,
            generated_at: entry.created_at,
        }
    }
}
