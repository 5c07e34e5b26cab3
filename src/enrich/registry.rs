use std::sync::Arc;

use super::{Enricher, Enrichment};
use crate::error::Result;

/// Priority-ordered set of strategies with a mandatory fallback.
///
/// The first strategy whose `can_handle` claims a URL owns it: its result or
/// error is returned as-is. The fallback only runs when nothing claims the URL.
pub struct EnricherRegistry {
    enrichers: Vec<Arc<dyn Enricher>>,
    fallback: Arc<dyn Enricher>,
}

impl EnricherRegistry {
    pub fn new(fallback: Arc<dyn Enricher>) -> Self {
        Self {
            enrichers: Vec::new(),
            fallback,
        }
    }

    pub fn register(&mut self, enricher: Arc<dyn Enricher>) {
        self.enrichers.push(enricher);
        // Stable: equal priorities keep registration order
        self.enrichers.sort_by_key(|e| e.priority());
    }

    pub fn with(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.register(enricher);
        self
    }

    /// Strategy names in dispatch order, fallback last.
    pub fn names(&self) -> Vec<&'static str> {
        self.enrichers
            .iter()
            .map(|e| e.name())
            .chain(std::iter::once(self.fallback.name()))
            .collect()
    }

    pub async fn enrich(&self, url: &str) -> Result<Enrichment> {
        let enricher = self
            .enrichers
            .iter()
            .find(|e| e.can_handle(url))
            .unwrap_or(&self.fallback);
        tracing::debug!("Enriching {} with {}", url, enricher.name());
        enricher.enrich(url).await
    }
}
