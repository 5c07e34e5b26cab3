use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

mod ai;
mod config;
mod db;
mod enrich;
mod error;
mod models;
mod services;
mod worker;

use ai::{ClaudeSummarizer, Summarizer};
use config::Config;
use db::{EntryStore, Repository};
use enrich::{EnricherRegistry, PodcastEnricher, WebEnricher, YouTubeEnricher};
use error::Result;
use models::NewEntry;
use services::{dedup_key, SafeFetcher, SummaryCache, UrlGuard};
use worker::{Worker, WorkerConfig};

const USAGE: &str = "usage: learnd [--add <url> [tag] | --refresh-enrichment <id> | --refresh-summary <id> | --status <id>]";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (info unless RUST_LOG says otherwise)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let config = Config::load()?;
    let repo = Arc::new(Repository::new(&config.db_path).await?);

    match args.get(1).map(String::as_str) {
        None => run_worker(&config, repo).await,
        Some("--add") => {
            let url = args.get(2).ok_or_else(usage_error)?;
            let entry = repo
                .insert_entry(NewEntry {
                    source_url: url.trim().to_string(),
                    normalized_url: dedup_key(url),
                    tag: args.get(3).cloned(),
                    ..Default::default()
                })
                .await?;
            println!("{}", entry.id);
            Ok(())
        }
        Some("--refresh-enrichment") => {
            let id = parse_id(args.get(2))?;
            report_reset(id, repo.reset_enrichment(id).await?, "enrichment");
            Ok(())
        }
        Some("--refresh-summary") => {
            let id = parse_id(args.get(2))?;
            report_reset(id, repo.reset_summary(id).await?, "summary");
            Ok(())
        }
        Some("--status") => {
            let id = parse_id(args.get(2))?;
            match repo.get_entry(id).await? {
                Some(entry) => {
                    println!("id:         {}", entry.id);
                    println!("url:        {}", entry.source_url);
                    println!("enrichment: {}", entry.enrichment_status);
                    if let Some(error) = &entry.enrichment_error {
                        println!("  error:    {}", error);
                    }
                    println!("summary:    {}", entry.summary_status);
                    if let Some(error) = &entry.summary_error {
                        println!("  error:    {}", error);
                    }
                    println!("type:       {}", entry.source_type);
                    println!("title:      {}", entry.title.as_deref().unwrap_or("-"));
                    println!("text:       {}", entry.summary_text.as_deref().unwrap_or("-"));
                }
                None => println!("No record with id {}", id),
            }
            Ok(())
        }
        Some(_) => Err(usage_error()),
    }
}

async fn run_worker(config: &Config, repo: Arc<Repository>) -> Result<()> {
    let guard = config
        .parsed_blocked_cidrs()?
        .into_iter()
        .fold(UrlGuard::new(), UrlGuard::block_cidr);
    let fetcher = Arc::new(SafeFetcher::with_guard(
        guard,
        config.fetch_timeout(),
        config.max_body_bytes,
    )?);

    let mut registry = EnricherRegistry::new(Arc::new(WebEnricher::new(fetcher.clone())))
        .with(Arc::new(PodcastEnricher::new(fetcher.clone())));
    if let Some(key) = &config.youtube_api_key {
        registry.register(Arc::new(YouTubeEnricher::new(
            fetcher.clone(),
            key.clone(),
            config.youtube_api_base.clone(),
        )));
    } else {
        tracing::info!("No YouTube API key configured; YouTube links use the web enricher");
    }
    tracing::info!("Enrichers: {}", registry.names().join(", "));

    let summarizer: Option<Arc<dyn Summarizer>> = match &config.claude_api_key {
        Some(key) => {
            let summarizer = ClaudeSummarizer::new(key.clone())?;
            tracing::info!(
                "Summaries by {} {} (summarizer {})",
                summarizer.provider(),
                summarizer.model(),
                summarizer.version()
            );
            Some(Arc::new(summarizer))
        }
        None => {
            tracing::info!("No Claude API key configured; summarization disabled");
            None
        }
    };

    let store: Arc<dyn EntryStore> = repo.clone();
    let mut worker = Worker::new(
        store,
        SummaryCache::new(repo),
        Arc::new(registry),
        summarizer,
        WorkerConfig {
            interval: config.worker_interval(),
            batch_size: config.worker_batch_size,
        },
    );

    let shutdown = CancellationToken::new();
    worker.start(shutdown.clone()).await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C, shutting down");

    worker.stop().await;
    Ok(())
}

fn usage_error() -> error::AppError {
    anyhow::anyhow!(USAGE).into()
}

fn parse_id(arg: Option<&String>) -> Result<Uuid> {
    let raw = arg.ok_or_else(usage_error)?;
    Uuid::parse_str(raw.trim()).map_err(|e| anyhow::anyhow!("invalid id {}: {}", raw, e).into())
}

fn report_reset(id: Uuid, changed: bool, stage: &str) {
    if changed {
        println!("Queued {} refresh for {}", stage, id);
    } else {
        println!("No record with id {}", id);
    }
}
