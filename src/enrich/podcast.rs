use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use regex::Regex;
use scraper::Html;
use serde_json::{json, Map};
use url::Url;

use super::duration::parse_json_ld_duration;
use super::html::{json_ld_scripts, meta_name, meta_property};
use super::{Enricher, Enrichment};
use crate::error::{AppError, Result};
use crate::models::SourceType;
use crate::services::SafeFetcher;

const PODCAST_HOST: &str = "podcasts.apple.com";

static PODCAST_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/id(\d+)").expect("Failed to compile podcast id regex"));
static EPISODE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]i=(\d+)").expect("Failed to compile episode id regex"));

/// Episode pages on Apple Podcasts.
pub struct PodcastEnricher {
    fetcher: Arc<SafeFetcher>,
}

impl PodcastEnricher {
    pub fn new(fetcher: Arc<SafeFetcher>) -> Self {
        Self { fetcher }
    }
}

fn is_podcast_host(url: &Url) -> bool {
    url.host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case(PODCAST_HOST))
}

#[async_trait]
impl Enricher for PodcastEnricher {
    fn name(&self) -> &'static str {
        "podcast"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn can_handle(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|u| is_podcast_host(&u))
    }

    async fn enrich(&self, url: &str) -> Result<Enrichment> {
        let parsed = self.fetcher.validate(url).await?;
        if !is_podcast_host(&parsed) {
            return Err(AppError::Enrichment(format!(
                "unsupported host: {}",
                parsed.host_str().unwrap_or_default()
            )));
        }

        let page = self.fetcher.fetch(parsed.as_str()).await?.error_for_status()?;
        let result = parse_podcast_page(url, &page.url, &page.body);
        if result.runtime_seconds.is_none() {
            tracing::info!("Podcast duration not found for {}", url);
        }
        Ok(result)
    }
}

fn capture<'a>(re: &Regex, haystack: &'a str) -> &'a str {
    re.captures(haystack)
        .and_then(|caps| caps.get(1))
        .map_or("", |m| m.as_str())
}

/// Build the enrichment for a fetched episode page. `final_url` is where
/// redirects ended and becomes the canonical URL.
fn parse_podcast_page(source_url: &str, final_url: &Url, body: &str) -> Enrichment {
    let document = Html::parse_document(body);

    let mut metadata = Map::new();
    metadata.insert("podcast_id".into(), json!(capture(&PODCAST_ID_RE, source_url)));
    metadata.insert("episode_id".into(), json!(capture(&EPISODE_ID_RE, source_url)));

    let title = meta_property(&document, "og:title")
        .or_else(|| meta_name(&document, "apple:title"))
        .unwrap_or_default();
    let description = meta_property(&document, "og:description")
        .or_else(|| meta_name(&document, "apple:description"))
        .unwrap_or_default();

    let published_at = meta_property(&document, "music:release_date")
        .and_then(|date| NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight));

    let runtime = meta_property(&document, "music:duration")
        .and_then(|content| content.parse::<i64>().ok())
        .filter(|seconds| *seconds > 0)
        .or_else(|| {
            json_ld_scripts(&document)
                .iter()
                .map(|script| parse_json_ld_duration(script))
                .find(|seconds| *seconds > 0)
        });

    Enrichment {
        canonical_url: final_url.to_string(),
        domain: final_url
            .host_str()
            .unwrap_or(PODCAST_HOST)
            .to_ascii_lowercase(),
        source_type: SourceType::Podcast,
        title,
        description,
        published_at,
        runtime_seconds: runtime,
        metadata,
    }
}
