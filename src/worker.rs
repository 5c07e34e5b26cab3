//! Background pipeline: two polling loops that move records through
//! enrichment and summarization.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ai::{Summarizer, SummaryInput};
use crate::db::EntryStore;
use crate::enrich::{Enrichment, EnricherRegistry};
use crate::error::Result;
use crate::models::{EnrichmentResult, Entry, ProcessingStatus};
use crate::services::{clean_text, SummaryCache};

pub const DEFAULT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_BATCH_SIZE: usize = 5;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

struct Pipeline {
    entries: Arc<dyn EntryStore>,
    cache: SummaryCache,
    registry: Arc<EnricherRegistry>,
    summarizer: Option<Arc<dyn Summarizer>>,
    batch_size: usize,
}

#[derive(Clone, Copy)]
enum Stage {
    Enrichment,
    Summary,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Enrichment => "enrichment",
            Stage::Summary => "summary",
        }
    }
}

pub struct Worker {
    pipeline: Arc<Pipeline>,
    interval: Duration,
    stop: Option<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
}

impl Worker {
    pub fn new(
        entries: Arc<dyn EntryStore>,
        cache: SummaryCache,
        registry: Arc<EnricherRegistry>,
        summarizer: Option<Arc<dyn Summarizer>>,
        config: WorkerConfig,
    ) -> Self {
        let interval = if config.interval.is_zero() {
            Duration::from_secs(DEFAULT_INTERVAL_SECS)
        } else {
            config.interval
        };
        let batch_size = if config.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            config.batch_size
        };

        Self {
            pipeline: Arc::new(Pipeline {
                entries,
                cache,
                registry,
                summarizer,
                batch_size,
            }),
            interval,
            stop: None,
            handles: Vec::new(),
        }
    }

    /// Requeue interrupted claims and spawn both loops.
    ///
    /// Cancelling `shutdown` ends the loops and drops any batch in flight;
    /// [`Worker::stop`] lets the current batch finish first.
    pub async fn start(&mut self, shutdown: CancellationToken) {
        if !self.handles.is_empty() {
            tracing::warn!("Worker already started");
            return;
        }

        match self.pipeline.entries.requeue_stale_processing().await {
            Ok(0) => {}
            Ok(count) => tracing::info!("Requeued {} records left in processing", count),
            Err(e) => tracing::error!("Failed to requeue stale records: {}", e),
        }

        tracing::info!(
            "Starting worker (interval {:?}, batch size {})",
            self.interval,
            self.pipeline.batch_size
        );

        let stop = shutdown.child_token();
        for stage in [Stage::Enrichment, Stage::Summary] {
            self.handles.push(tokio::spawn(run_loop(
                self.pipeline.clone(),
                stage,
                self.interval,
                stop.clone(),
                shutdown.clone(),
            )));
        }
        self.stop = Some(stop);
    }

    /// Signal both loops and wait for them to exit.
    pub async fn stop(&mut self) {
        tracing::info!("Stopping worker");
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!("Worker loop panicked: {}", e);
            }
        }
        tracing::info!("Worker stopped");
    }

    #[cfg(test)]
    async fn process_enrichment_batch(&self) {
        self.pipeline.process_enrichment_batch().await;
    }

    #[cfg(test)]
    async fn process_summary_batch(&self) {
        self.pipeline.process_summary_batch().await;
    }
}

async fn run_loop(
    pipeline: Arc<Pipeline>,
    stage: Stage,
    period: Duration,
    stop: CancellationToken,
    shutdown: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let batch = async {
                    match stage {
                        Stage::Enrichment => pipeline.process_enrichment_batch().await,
                        Stage::Summary => pipeline.process_summary_batch().await,
                    }
                };
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = batch => {}
                }
            }
        }
    }
    tracing::debug!("{} loop exited", stage.name());
}

impl Pipeline {
    async fn process_enrichment_batch(&self) {
        let entries = match self.entries.list_pending_enrichment(self.batch_size).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Failed to list pending enrichment: {}", e);
                return;
            }
        };

        for entry in entries {
            if let Err(e) = self.enrich_entry(&entry).await {
                tracing::error!("Enrichment bookkeeping failed for {}: {}", entry.id, e);
            }
        }
    }

    async fn enrich_entry(&self, entry: &Entry) -> Result<()> {
        let claimed = self
            .entries
            .update_enrichment_status(entry.id, ProcessingStatus::Processing, None)
            .await?;
        if !claimed {
            tracing::debug!("Enrichment for {} was claimed elsewhere", entry.id);
            return Ok(());
        }

        match self.registry.enrich(&entry.source_url).await {
            Ok(enrichment) => {
                let title = enrichment.title.clone();
                let source_type = enrichment.source_type;
                let applied = self
                    .entries
                    .update_enrichment_result(entry.id, sanitize_enrichment(enrichment))
                    .await?;
                if applied {
                    tracing::info!("Enriched {} ({}): {}", entry.id, source_type, title);
                } else {
                    tracing::info!("Discarded enrichment for {}: record was reset", entry.id);
                }
            }
            Err(e) => {
                tracing::warn!("Enrichment failed for {} ({}): {}", entry.id, entry.source_url, e);
                self.fail(Stage::Enrichment, entry.id, e.to_string()).await?;
            }
        }
        Ok(())
    }

    async fn process_summary_batch(&self) {
        let Some(summarizer) = self.summarizer.clone() else {
            return;
        };

        let entries = match self.entries.list_pending_summary(self.batch_size).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Failed to list pending summaries: {}", e);
                return;
            }
        };

        for entry in entries {
            if let Err(e) = self.summarize_entry(summarizer.as_ref(), &entry).await {
                tracing::error!("Summary bookkeeping failed for {}: {}", entry.id, e);
            }
        }
    }

    async fn summarize_entry(&self, summarizer: &dyn Summarizer, entry: &Entry) -> Result<()> {
        if !entry.has_summarizable_content() {
            if self
                .entries
                .update_summary_status(entry.id, ProcessingStatus::Skipped, None)
                .await?
            {
                tracing::debug!("Skipped summary for {}: no title or description", entry.id);
            }
            return Ok(());
        }

        let url_hash = SummaryCache::key_for(entry);
        match self.cache.lookup(&url_hash).await {
            Ok(Some(cached)) => {
                if self.entries.update_summary_result(entry.id, cached).await? {
                    tracing::info!("Used cached summary for {}", entry.id);
                }
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Summary cache lookup failed for {}: {}", entry.id, e),
        }

        let claimed = self
            .entries
            .update_summary_status(entry.id, ProcessingStatus::Processing, None)
            .await?;
        if !claimed {
            tracing::debug!("Summary for {} was claimed elsewhere", entry.id);
            return Ok(());
        }

        let input = SummaryInput {
            title: entry.title.clone().unwrap_or_default(),
            description: entry.description.clone().unwrap_or_default(),
            source_type: entry.source_type,
            url: entry.source_url.clone(),
            tag: entry.tag.clone(),
        };

        match summarizer.summarize(&input).await {
            Ok(result) => {
                if !self.entries.update_summary_result(entry.id, result.clone()).await? {
                    tracing::info!("Discarded summary for {}: record was reset", entry.id);
                    // Hand the claim back so the record is picked up after re-enrichment
                    self.entries
                        .update_summary_status(entry.id, ProcessingStatus::Pending, None)
                        .await?;
                    return Ok(());
                }
                if let Err(e) = self.cache.store(&url_hash, entry.cache_url(), &result).await {
                    tracing::warn!("Failed to cache summary for {}: {}", entry.id, e);
                }
                tracing::info!("Summarized {}", entry.id);
            }
            Err(e) => {
                tracing::warn!("Summarization failed for {}: {}", entry.id, e);
                self.fail(Stage::Summary, entry.id, e.to_string()).await?;
            }
        }
        Ok(())
    }

    async fn fail(&self, stage: Stage, id: Uuid, message: String) -> Result<()> {
        let applied = match stage {
            Stage::Enrichment => {
                self.entries
                    .update_enrichment_status(id, ProcessingStatus::Failed, Some(message))
                    .await?
            }
            Stage::Summary => {
                self.entries
                    .update_summary_status(id, ProcessingStatus::Failed, Some(message))
                    .await?
            }
        };
        if !applied {
            tracing::debug!("{} failure for {} not recorded: record was reset", stage.name(), id);
        }
        Ok(())
    }
}

/// Strip replacement/NUL characters and store blank strings as absent.
fn sanitize_enrichment(enrichment: Enrichment) -> EnrichmentResult {
    EnrichmentResult {
        canonical_url: clean_text(&enrichment.canonical_url),
        domain: clean_text(&enrichment.domain),
        source_type: enrichment.source_type,
        title: clean_text(&enrichment.title),
        description: clean_text(&enrichment.description),
        published_at: enrichment.published_at,
        runtime_seconds: enrichment.runtime_seconds,
        metadata: (!enrichment.metadata.is_empty())
            .then(|| serde_json::Value::Object(enrichment.metadata)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Repository, SummaryCacheStore};
    use crate::enrich::Enricher;
    use crate::error::AppError;
    use crate::models::{NewEntry, SourceType, SummaryResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Enriches every URL, failing those containing `fail`.
    struct ScriptedEnricher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Enricher for ScriptedEnricher {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn priority(&self) -> i32 {
            100
        }

        fn can_handle(&self, _url: &str) -> bool {
            true
        }

        async fn enrich(&self, url: &str) -> Result<Enrichment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("fail") {
                return Err(AppError::Enrichment("HTTP error: 500".into()));
            }
            if url.contains("empty") {
                return Ok(Enrichment {
                    canonical_url: url.to_string(),
                    domain: "example.com".into(),
                    title: " \u{FFFD} ".into(),
                    ..Default::default()
                });
            }
            Ok(Enrichment {
                canonical_url: url.to_string(),
                domain: "example.com".into(),
                source_type: SourceType::Article,
                title: format!("Title\0 of {}", url),
                description: "Description".into(),
                runtime_seconds: Some(120),
                ..Default::default()
            })
        }
    }

    struct CountingSummarizer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, input: &SummaryInput) -> Result<SummaryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::SummarizerApi("quota exceeded".into()));
            }
            Ok(SummaryResult {
                text: format!("Summary of {}", input.title),
                provider: "fake".into(),
                model: "fake-1".into(),
                version: "1.0.0".into(),
                generated_at: Utc::now(),
            })
        }

        fn provider(&self) -> &str {
            "fake"
        }

        fn model(&self) -> &str {
            "fake-1"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }
    }

    struct Harness {
        repo: Arc<Repository>,
        enricher: Arc<ScriptedEnricher>,
        summarizer: Arc<CountingSummarizer>,
        worker: Worker,
    }

    async fn harness(with_summarizer: bool, summarizer_fails: bool, config: WorkerConfig) -> Harness {
        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        let enricher = Arc::new(ScriptedEnricher {
            calls: AtomicUsize::new(0),
        });
        let summarizer = Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
            fail: summarizer_fails,
        });
        let registry = Arc::new(EnricherRegistry::new(enricher.clone()));
        let worker = Worker::new(
            repo.clone(),
            SummaryCache::new(repo.clone()),
            registry,
            with_summarizer.then(|| summarizer.clone() as Arc<dyn Summarizer>),
            config,
        );
        Harness {
            repo,
            enricher,
            summarizer,
            worker,
        }
    }

    async fn add(repo: &Repository, url: &str) -> Entry {
        repo.insert_entry(NewEntry {
            source_url: url.to_string(),
            normalized_url: url.to_string(),
            tag: Some("rust".into()),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    async fn reload(repo: &Repository, entry: &Entry) -> Entry {
        repo.get_entry(entry.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_enrichment_batch_survives_failures() {
        let h = harness(false, false, WorkerConfig::default()).await;
        let mut entries = Vec::new();
        for i in 1..=5 {
            let url = if i == 3 {
                "https://example.com/fail".to_string()
            } else {
                format!("https://example.com/{}", i)
            };
            entries.push(add(&h.repo, &url).await);
        }

        h.worker.process_enrichment_batch().await;

        assert_eq!(h.enricher.calls.load(Ordering::SeqCst), 5);
        for (i, entry) in entries.iter().enumerate() {
            let stored = reload(&h.repo, entry).await;
            if i == 2 {
                assert_eq!(stored.enrichment_status, ProcessingStatus::Failed);
                assert_eq!(stored.enrichment_error.as_deref(), Some("HTTP error: 500"));
                assert!(stored.enriched_at.is_some());
            } else {
                assert_eq!(stored.enrichment_status, ProcessingStatus::Ok);
                assert_eq!(stored.enrichment_error, None);
                assert_eq!(stored.source_type, SourceType::Article);
                assert_eq!(stored.runtime_seconds, Some(120));
                assert_eq!(stored.title, Some(format!("Title of {}", stored.source_url)));
            }
        }
    }

    #[tokio::test]
    async fn test_enrichment_respects_batch_size() {
        let config = WorkerConfig {
            batch_size: 2,
            ..WorkerConfig::default()
        };
        let h = harness(false, false, config).await;
        for i in 0..3 {
            add(&h.repo, &format!("https://example.com/{}", i)).await;
        }

        h.worker.process_enrichment_batch().await;

        assert_eq!(h.enricher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.repo.list_pending_enrichment(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_enrichment_is_skipped_for_summary() {
        let h = harness(true, false, WorkerConfig::default()).await;
        let entry = add(&h.repo, "https://example.com/empty").await;

        h.worker.process_enrichment_batch().await;
        let stored = reload(&h.repo, &entry).await;
        assert_eq!(stored.enrichment_status, ProcessingStatus::Ok);
        assert_eq!(stored.title, None);
        assert_eq!(stored.description, None);

        h.worker.process_summary_batch().await;
        let stored = reload(&h.repo, &entry).await;
        assert_eq!(stored.summary_status, ProcessingStatus::Skipped);
        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_summary_waits_for_enrichment() {
        let h = harness(true, false, WorkerConfig::default()).await;
        let entry = add(&h.repo, "https://example.com/a").await;

        h.worker.process_summary_batch().await;

        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(reload(&h.repo, &entry).await.summary_status, ProcessingStatus::Pending);
    }

    #[tokio::test]
    async fn test_cache_short_circuits_second_record() {
        let h = harness(true, false, WorkerConfig::default()).await;
        let first = add(&h.repo, "https://example.com/shared").await;
        h.worker.process_enrichment_batch().await;
        h.worker.process_summary_batch().await;

        let stored = reload(&h.repo, &first).await;
        assert_eq!(stored.summary_status, ProcessingStatus::Ok);
        assert_eq!(stored.summary_text.as_deref(), Some("Summary of Title of https://example.com/shared"));
        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 1);

        let second = add(&h.repo, "https://example.com/shared").await;
        h.worker.process_enrichment_batch().await;
        h.worker.process_summary_batch().await;

        let stored = reload(&h.repo, &second).await;
        assert_eq!(stored.summary_status, ProcessingStatus::Ok);
        assert_eq!(stored.summary_text, reload(&h.repo, &first).await.summary_text);
        assert_eq!(stored.summary_provider.as_deref(), Some("fake"));
        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_summary_failure_is_recorded() {
        let h = harness(true, true, WorkerConfig::default()).await;
        let entry = add(&h.repo, "https://example.com/a").await;
        h.worker.process_enrichment_batch().await;

        h.worker.process_summary_batch().await;

        let stored = reload(&h.repo, &entry).await;
        assert_eq!(stored.summary_status, ProcessingStatus::Failed);
        assert!(stored.summary_error.unwrap().contains("quota exceeded"));

        // No automatic retry
        h.worker.process_summary_batch().await;
        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_without_summarizer_summary_is_noop() {
        let h = harness(false, false, WorkerConfig::default()).await;
        let entry = add(&h.repo, "https://example.com/a").await;
        h.worker.process_enrichment_batch().await;

        h.worker.process_summary_batch().await;

        assert_eq!(reload(&h.repo, &entry).await.summary_status, ProcessingStatus::Pending);
    }

    #[tokio::test]
    async fn test_refresh_requeues_enrichment() {
        let h = harness(false, false, WorkerConfig::default()).await;
        let entry = add(&h.repo, "https://example.com/a").await;
        h.worker.process_enrichment_batch().await;
        assert!(h.repo.reset_enrichment(entry.id).await.unwrap());

        let stored = reload(&h.repo, &entry).await;
        assert_eq!(stored.enrichment_status, ProcessingStatus::Pending);
        assert_eq!(stored.enriched_at, None);

        h.worker.process_enrichment_batch().await;
        assert_eq!(h.enricher.calls.load(Ordering::SeqCst), 2);
    }

    /// Resets enrichment while a summary is being generated.
    struct ResettingSummarizer {
        repo: Arc<Repository>,
        id: Uuid,
    }

    #[async_trait]
    impl Summarizer for ResettingSummarizer {
        async fn summarize(&self, _input: &SummaryInput) -> Result<SummaryResult> {
            self.repo.reset_enrichment(self.id).await?;
            Ok(SummaryResult {
                text: "stale".into(),
                provider: "fake".into(),
                model: "fake-1".into(),
                version: "1.0.0".into(),
                generated_at: Utc::now(),
            })
        }

        fn provider(&self) -> &str {
            "fake"
        }

        fn model(&self) -> &str {
            "fake-1"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }
    }

    #[tokio::test]
    async fn test_summary_discarded_when_enrichment_reset_mid_flight() {
        let h = harness(false, false, WorkerConfig::default()).await;
        let entry = add(&h.repo, "https://example.com/a").await;
        h.worker.process_enrichment_batch().await;

        let worker = Worker::new(
            h.repo.clone(),
            SummaryCache::new(h.repo.clone()),
            Arc::new(EnricherRegistry::new(h.enricher.clone())),
            Some(Arc::new(ResettingSummarizer {
                repo: h.repo.clone(),
                id: entry.id,
            }) as Arc<dyn Summarizer>),
            WorkerConfig::default(),
        );
        worker.process_summary_batch().await;

        let stored = reload(&h.repo, &entry).await;
        assert_eq!(stored.enrichment_status, ProcessingStatus::Pending);
        assert_eq!(stored.summary_status, ProcessingStatus::Pending);
        assert_eq!(stored.summary_text, None);
        assert!(h
            .repo
            .get_by_hash(&SummaryCache::key_for(&stored))
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_sanitize_enrichment() {
        let result = sanitize_enrichment(Enrichment {
            canonical_url: "https://example.com/".into(),
            domain: "".into(),
            title: "\0 Hello \u{FFFD}".into(),
            description: "  ".into(),
            ..Default::default()
        });

        assert_eq!(result.canonical_url.as_deref(), Some("https://example.com/"));
        assert_eq!(result.domain, None);
        assert_eq!(result.title.as_deref(), Some("Hello"));
        assert_eq!(result.description, None);
        assert_eq!(result.metadata, None);
    }

    #[tokio::test]
    async fn test_zero_config_falls_back_to_defaults() {
        let config = WorkerConfig {
            interval: Duration::ZERO,
            batch_size: 0,
        };
        let h = harness(false, false, config).await;
        assert_eq!(h.worker.interval, Duration::from_secs(DEFAULT_INTERVAL_SECS));
        assert_eq!(h.worker.pipeline.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[tokio::test]
    async fn test_start_processes_on_tick_and_stop_waits() {
        let config = WorkerConfig {
            interval: Duration::from_millis(20),
            batch_size: 5,
        };
        let mut h = harness(true, false, config).await;
        let entry = add(&h.repo, "https://example.com/a").await;

        h.worker.start(CancellationToken::new()).await;

        let mut done = false;
        for _ in 0..100 {
            let stored = reload(&h.repo, &entry).await;
            if stored.summary_status == ProcessingStatus::Ok {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(2), h.worker.stop()).await
        );
        assert!(done, "record was not processed by the running worker");
        assert!(h.worker.handles.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_token_ends_loops() {
        let config = WorkerConfig {
            interval: Duration::from_millis(10),
            batch_size: 5,
        };
        let mut h = harness(false, false, config).await;
        let shutdown = CancellationToken::new();

        h.worker.start(shutdown.clone()).await;
        shutdown.cancel();

        for handle in h.worker.handles.drain(..) {
            let joined =
                tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(2), handle).await);
            tokio_test::assert_ok!(joined);
        }
    }

    #[tokio::test]
    async fn test_start_requeues_stale_claims() {
        let mut h = harness(false, false, WorkerConfig::default()).await;
        let entry = add(&h.repo, "https://example.com/a").await;
        assert!(h
            .repo
            .update_enrichment_status(entry.id, ProcessingStatus::Processing, None)
            .await
            .unwrap());

        h.worker.start(CancellationToken::new()).await;
        h.worker.stop().await;

        assert_eq!(
            reload(&h.repo, &entry).await.enrichment_status,
            ProcessingStatus::Pending
        );
    }
}
