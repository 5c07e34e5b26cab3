use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map};

use super::duration::parse_iso8601;
use super::{Enricher, Enrichment};
use crate::error::{AppError, Result};
use crate::models::SourceType;
use crate::services::{truncate_chars, SafeFetcher};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

const MAX_DESCRIPTION_CHARS: usize = 500;
const MIN_SENTENCE_CUT: usize = 200;

static VIDEO_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/shorts/|youtube\.com/embed/)([a-zA-Z0-9_-]{11})",
    )
    .expect("Failed to compile YouTube regex")
});

/// Video metadata from the YouTube Data API v3.
pub struct YouTubeEnricher {
    fetcher: Arc<SafeFetcher>,
    api_key: String,
    api_base: String,
}

impl YouTubeEnricher {
    pub fn new(fetcher: Arc<SafeFetcher>, api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            fetcher,
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn api_url(&self, video_id: &str) -> String {
        format!(
            "{}/videos?id={}&part=snippet,contentDetails&key={}",
            self.api_base,
            urlencoding::encode(video_id),
            urlencoding::encode(&self.api_key)
        )
    }
}

#[async_trait]
impl Enricher for YouTubeEnricher {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_handle(&self, url: &str) -> bool {
        extract_video_id(url).is_some()
    }

    async fn enrich(&self, url: &str) -> Result<Enrichment> {
        let video_id = extract_video_id(url)
            .ok_or_else(|| AppError::Enrichment("could not extract video ID from URL".to_string()))?;

        let page = self
            .fetcher
            .fetch_with_accept(&self.api_url(video_id), "application/json")
            .await
            .map_err(without_request_url)?;
        if page.status != StatusCode::OK {
            return Err(AppError::Enrichment(format!(
                "YouTube API error: {}",
                page.status.as_u16()
            )));
        }

        let response: VideoListResponse = serde_json::from_str(&page.body)?;
        enrichment_from_response(video_id, response)
    }
}

/// The request URL carries the API key and must not end up in stored errors.
fn without_request_url(err: AppError) -> AppError {
    match err {
        AppError::Http(e) => AppError::Http(e.without_url()),
        other => other,
    }
}

pub(crate) fn extract_video_id(url: &str) -> Option<&str> {
    VIDEO_ID_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn enrichment_from_response(video_id: &str, response: VideoListResponse) -> Result<Enrichment> {
    let item = response
        .items
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Enrichment("video not found".to_string()))?;
    let snippet = item.snippet;

    let runtime = parse_iso8601(&item.content_details.duration);
    let published_at = DateTime::parse_from_rfc3339(&snippet.published_at)
        .ok()
        .map(|dt| dt.with_timezone(&Utc));

    let mut metadata = Map::new();
    metadata.insert("channel_title".into(), json!(snippet.channel_title));
    metadata.insert("channel_id".into(), json!(snippet.channel_id));
    metadata.insert("video_id".into(), json!(video_id));

    Ok(Enrichment {
        canonical_url: format!("https://www.youtube.com/watch?v={}", video_id),
        domain: "youtube.com".to_string(),
        source_type: SourceType::Youtube,
        title: snippet.title,
        description: truncate_description(&snippet.description),
        published_at,
        runtime_seconds: (runtime > 0).then_some(runtime),
        metadata,
    })
}

/// Keep descriptions to at most 500 characters, preferring a sentence break.
fn truncate_description(description: &str) -> String {
    if description.chars().count() <= MAX_DESCRIPTION_CHARS {
        return description.to_string();
    }

    let head = truncate_chars(description, MAX_DESCRIPTION_CHARS);
    if let Some(idx) = head.rfind(". ") {
        if head[..idx].chars().count() > MIN_SENTENCE_CUT {
            return head[..=idx].to_string();
        }
    }
    format!("{}...", truncate_chars(description, MAX_DESCRIPTION_CHARS - 3))
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    #[serde(default)]
    snippet: Snippet,
    #[serde(default)]
    content_details: ContentDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Snippet {
    title: String,
    description: String,
    channel_title: String,
    channel_id: String,
    published_at: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContentDetails {
    duration: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_http_errors_drop_request_url() {
        let response = reqwest::Response::from(
            http::Response::builder()
                .status(500)
                .body(Vec::new())
                .unwrap(),
        );
        let err = AppError::Http(response.error_for_status().unwrap_err());
        assert!(err.to_string().contains("no.url.provided.local"));

        let redacted = without_request_url(err);
        assert!(matches!(redacted, AppError::Http(_)));
        assert!(!redacted.to_string().contains("no.url.provided.local"));

        let other = without_request_url(AppError::Enrichment("video not found".into()));
        assert_eq!(other.to_string(), "video not found");
    }

    #[test]
    fn test_extract_video_id_shapes() {
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", Some("dQw4w9WgXcQ")),
            ("https://youtu.be/dQw4w9WgXcQ?t=42", Some("dQw4w9WgXcQ")),
            ("https://youtube.com/shorts/abcdefghijk", Some("abcdefghijk")),
            ("https://www.youtube.com/embed/A_b-C_d-E_f", Some("A_b-C_d-E_f")),
            ("https://www.youtube.com/watch?v=short", None),
            ("https://www.youtube.com/channel/UC123", None),
            ("https://example.com/watch?v=dQw4w9WgXcQ", None),
        ];

        for (url, want) in cases {
            assert_eq!(extract_video_id(url), want, "url {}", url);
        }
    }

    #[test]
    fn test_enrichment_from_response() {
        let body = r#"{
            "items": [{
                "snippet": {
                    "title": "Never Gonna Give You Up",
                    "description": "The official video.",
                    "channelTitle": "Rick Astley",
                    "channelId": "UCuAXFkgsw1L7xaCfnd5JJOw",
                    "publishedAt": "2009-10-25T06:57:33Z"
                },
                "contentDetails": {"duration": "PT3M33S"}
            }]
        }"#;
        let response: VideoListResponse = serde_json::from_str(body).unwrap();
        let result = enrichment_from_response("dQw4w9WgXcQ", response).unwrap();

        assert_eq!(result.canonical_url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(result.domain, "youtube.com");
        assert_eq!(result.source_type, SourceType::Youtube);
        assert_eq!(result.title, "Never Gonna Give You Up");
        assert_eq!(result.runtime_seconds, Some(213));
        assert_eq!(
            result.published_at,
            Some(Utc.with_ymd_and_hms(2009, 10, 25, 6, 57, 33).unwrap())
        );
        assert_eq!(result.metadata["channel_title"], "Rick Astley");
        assert_eq!(result.metadata["video_id"], "dQw4w9WgXcQ");
    }

    #[test]
    fn test_empty_items_is_not_found() {
        let response: VideoListResponse = serde_json::from_str(r#"{"items": []}"#).unwrap();
        let err = enrichment_from_response("dQw4w9WgXcQ", response).unwrap_err();
        assert_eq!(err.to_string(), "video not found");
    }

    #[test]
    fn test_truncate_description_prefers_sentence_break() {
        let first = "a".repeat(300);
        let description = format!("{}. {}", first, "b".repeat(400));
        let truncated = truncate_description(&description);
        assert_eq!(truncated, format!("{}.", first));
    }

    #[test]
    fn test_truncate_description_hard_cut() {
        let description = format!("{}. {}", "a".repeat(100), "b".repeat(600));
        let truncated = truncate_description(&description);
        assert_eq!(truncated.chars().count(), 500);
        assert!(truncated.ends_with("..."));

        assert_eq!(truncate_description("short"), "short");
    }

    #[test]
    fn test_api_url_encodes_key() {
        let fetcher = Arc::new(SafeFetcher::new(std::time::Duration::from_secs(1), 1024).unwrap());
        let enricher = YouTubeEnricher::new(fetcher, "k e&y", "https://api.example.com/v3/");
        assert_eq!(
            enricher.api_url("dQw4w9WgXcQ"),
            "https://api.example.com/v3/videos?id=dQw4w9WgXcQ&part=snippet,contentDetails&key=k%20e%26y"
        );
    }
}
