use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::db::SummaryCacheStore;
use crate::error::Result;
use crate::models::{Entry, SummaryCacheEntry, SummaryResult};

/// Content-addressed summaries, keyed by the SHA-256 of a record's canonical URL.
#[derive(Clone)]
pub struct SummaryCache {
    store: Arc<dyn SummaryCacheStore>,
}

impl SummaryCache {
    pub fn new(store: Arc<dyn SummaryCacheStore>) -> Self {
        Self { store }
    }

    pub fn hash_url(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    /// Cache key for a record (canonical URL, else source URL).
    pub fn key_for(entry: &Entry) -> String {
        Self::hash_url(entry.cache_url())
    }

    pub async fn lookup(&self, url_hash: &str) -> Result<Option<SummaryResult>> {
        Ok(self.store.get_by_hash(url_hash).await?.map(SummaryResult::from))
    }

    pub async fn store(&self, url_hash: &str, canonical_url: &str, result: &SummaryResult) -> Result<()> {
        self.store
            .put(SummaryCacheEntry {
                url_hash: url_hash.to_string(),
                canonical_url: canonical_url.to_string(),
                summary_text: result.text.clone(),
                provider: result.provider.clone(),
                model: result.model.clone(),
                version: result.version.clone(),
                created_at: Utc::now(),
            })
            .await
    }
}
