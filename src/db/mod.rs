//! Persistence interface consumed by the pipeline, and its SQLite implementation.

mod repository;
mod schema;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{EnrichmentResult, Entry, ProcessingStatus, SummaryCacheEntry, SummaryResult};

pub use repository::Repository;

/// Record storage as seen by the worker.
///
/// Every mutation is a single-record conditional update; the returned `bool`
/// reports whether the row was in a state that allowed the change. A `false`
/// means another actor (usually a user refresh) got there first.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Records with `enrichment_status = pending`, oldest first.
    async fn list_pending_enrichment(&self, limit: usize) -> Result<Vec<Entry>>;

    /// Records with `summary_status = pending` and `enrichment_status = ok`, oldest first.
    async fn list_pending_summary(&self, limit: usize) -> Result<Vec<Entry>>;

    async fn update_enrichment_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        error: Option<String>,
    ) -> Result<bool>;

    /// Stores the result and sets the status to `ok`, clearing any error.
    async fn update_enrichment_result(&self, id: Uuid, result: EnrichmentResult) -> Result<bool>;

    /// Moves to `processing` or `skipped` only while `enrichment_status = ok`.
    async fn update_summary_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        error: Option<String>,
    ) -> Result<bool>;

    /// Stores the result and sets the status to `ok`, clearing any error.
    /// Rejected unless `enrichment_status = ok`.
    async fn update_summary_result(&self, id: Uuid, result: SummaryResult) -> Result<bool>;

    async fn reset_enrichment(&self, id: Uuid) -> Result<bool>;

    async fn reset_summary(&self, id: Uuid) -> Result<bool>;

    /// Returns every stage left in `processing` to `pending`. Returns the number of rows touched.
    async fn requeue_stale_processing(&self) -> Result<usize>;
}

#[async_trait]
pub trait SummaryCacheStore: Send + Sync {
    async fn get_by_hash(&self, url_hash: &str) -> Result<Option<SummaryCacheEntry>>;

    /// Upsert keyed by `url_hash`; the latest write wins.
    async fn put(&self, entry: SummaryCacheEntry) -> Result<()>;
}
