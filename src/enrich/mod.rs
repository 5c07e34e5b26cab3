//! Metadata enrichment strategies.
//!
//! Each strategy declares which URLs it claims and a priority; the
//! [`EnricherRegistry`] dispatches a URL to the lowest-priority claimant.

mod duration;
mod html;
mod podcast;
mod registry;
mod web;
mod youtube;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::SourceType;

pub use podcast::PodcastEnricher;
pub use registry::EnricherRegistry;
pub use web::WebEnricher;
pub use youtube::{YouTubeEnricher, DEFAULT_API_BASE};

/// Metadata extracted by a strategy, before sanitization.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub canonical_url: String,
    pub domain: String,
    pub source_type: SourceType,
    pub title: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub runtime_seconds: Option<i64>,
    pub metadata: Map<String, Value>,
}

#[async_trait]
pub trait Enricher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower runs first.
    fn priority(&self) -> i32;

    fn can_handle(&self, url: &str) -> bool;

    async fn enrich(&self, url: &str) -> Result<Enrichment>;
}

/// Host of a URL without a leading `www.`, lowercased.
pub(crate) fn domain_of(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}
