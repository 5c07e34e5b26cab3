use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::{json, Map};
use url::Url;

use super::html::{first_text, meta_name, meta_property};
use super::{domain_of, Enricher, Enrichment};
use crate::error::Result;
use crate::models::SourceType;
use crate::services::SafeFetcher;

const READING_WORDS_PER_MINUTE: usize = 200;

/// Elements whose text never counts toward reading time.
static IGNORED_ELEMENTS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    ["script", "style", "noscript", "svg", "canvas", "head"]
        .into_iter()
        .collect()
});

/// Page chrome excluded from reading time along with everything beneath it.
static CHROME_ELEMENTS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| ["nav", "footer", "aside"].into_iter().collect());

/// Generic page metadata. Claims every URL and serves as the registry fallback.
pub struct WebEnricher {
    fetcher: Arc<SafeFetcher>,
}

impl WebEnricher {
    pub fn new(fetcher: Arc<SafeFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Enricher for WebEnricher {
    fn name(&self) -> &'static str {
        "web"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn can_handle(&self, _url: &str) -> bool {
        true
    }

    async fn enrich(&self, url: &str) -> Result<Enrichment> {
        let requested = self.fetcher.validate(url).await?;
        let page = self.fetcher.fetch(requested.as_str()).await?.error_for_status()?;
        Ok(parse_web_page(&requested, &page.url, &page.body))
    }
}

fn parse_web_page(requested: &Url, final_url: &Url, body: &str) -> Enrichment {
    let document = Html::parse_document(body);
    let domain = domain_of(requested);

    let title = meta_property(&document, "og:title")
        .or_else(|| first_text(&document, "title"))
        .unwrap_or_default();
    let description = meta_property(&document, "og:description")
        .or_else(|| meta_name(&document, "description"))
        .unwrap_or_default();
    let og_type = meta_property(&document, "og:type");

    let canonical_url = canonical_link(&document)
        .and_then(|href| final_url.join(&href).ok())
        .unwrap_or_else(|| final_url.clone());

    let source_type = classify_source_type(&domain, og_type.as_deref().unwrap_or_default());

    let mut metadata = Map::new();
    if let Some(og_type) = og_type {
        metadata.insert("og_type".into(), json!(og_type));
    }

    let mut runtime_seconds = None;
    if source_type.is_readable() {
        let (seconds, words) = estimate_reading_time(&document);
        if seconds > 0 {
            runtime_seconds = Some(seconds);
            metadata.insert("read_time_seconds".into(), json!(seconds));
            metadata.insert("word_count".into(), json!(words));
        }
    }

    Enrichment {
        canonical_url: canonical_url.to_string(),
        domain,
        source_type,
        title,
        description,
        published_at: None,
        runtime_seconds,
        metadata,
    }
}

fn canonical_link(document: &Html) -> Option<String> {
    let selector = Selector::parse("link[rel='canonical']").ok()?;
    document
        .select(&selector)
        .filter_map(|elem| elem.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())
        .map(str::to_string)
}

/// Classify by domain keywords, then by `og:type`.
fn classify_source_type(domain: &str, og_type: &str) -> SourceType {
    let domain = domain.to_ascii_lowercase();
    let has = |needle: &str| domain.contains(needle);

    if has("youtube.com") || has("youtu.be") {
        return SourceType::Youtube;
    }
    if has("podcasts.apple.com") || has("spotify.com") {
        return SourceType::Podcast;
    }
    if has("medium.com") || has("dev.to") || has("blog") || has("substack.com") {
        return SourceType::Article;
    }
    if has("docs.") || has("documentation") || has("pkg.go.dev") || has("developer.") {
        return SourceType::Doc;
    }

    match og_type {
        "article" => SourceType::Article,
        "video" | "video.other" => SourceType::Youtube,
        _ => SourceType::Other,
    }
}

/// Reading time in seconds (whole minutes, rounded up) and the word count it is based on.
fn estimate_reading_time(document: &Html) -> (i64, usize) {
    let words = count_words(primary_content(document));
    if words == 0 {
        return (0, 0);
    }
    let minutes = words.div_ceil(READING_WORDS_PER_MINUTE);
    ((minutes * 60) as i64, words)
}

/// `<article>`, else `<main>`, else `<body>`, else the document root.
fn primary_content(document: &Html) -> ElementRef<'_> {
    ["article", "main", "body"]
        .iter()
        .filter_map(|tag| Selector::parse(tag).ok())
        .find_map(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element())
}

fn count_words(element: ElementRef<'_>) -> usize {
    let name = element.value().name();
    if IGNORED_ELEMENTS.contains(name) || CHROME_ELEMENTS.contains(name) {
        return 0;
    }

    let mut total = 0;
    for child in element.children() {
        total += match child.value() {
            Node::Text(text) => text.split_whitespace().count(),
            Node::Element(_) => ElementRef::wrap(child).map_or(0, count_words),
            _ => 0,
        };
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(count: usize) -> String {
        vec!["word"; count].join(" ")
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_reading_time_prefers_article() {
        let body = format!(
            "<html><body><div>{}</div><article>{}</article></body></html>",
            words(200),
            words(200)
        );
        let document = Html::parse_document(&body);
        assert_eq!(estimate_reading_time(&document), (60, 200));
    }

    #[test]
    fn test_reading_time_ignores_script_and_style() {
        let body = format!(
            "<html><head><style>{}</style></head><body><script>{}</script><p>{}</p></body></html>",
            words(50),
            words(50),
            words(10)
        );
        let document = Html::parse_document(&body);
        assert_eq!(estimate_reading_time(&document), (60, 10));
    }

    #[test]
    fn test_reading_time_rounds_up() {
        let body = format!("<html><body><main>{}</main></body></html>", words(201));
        let document = Html::parse_document(&body);
        assert_eq!(estimate_reading_time(&document), (120, 201));
    }

    #[test]
    fn test_reading_time_skips_page_chrome() {
        let body = format!(
            "<html><body><nav>{}</nav><main><p>{}</p><aside>{}</aside></main><footer>{}</footer></body></html>",
            words(30),
            words(12),
            words(30),
            words(30)
        );
        let document = Html::parse_document(&body);
        assert_eq!(estimate_reading_time(&document), (60, 12));
    }

    #[test]
    fn test_empty_page_has_no_reading_time() {
        let document = Html::parse_document("<html><body><script>x y z</script></body></html>");
        assert_eq!(estimate_reading_time(&document), (0, 0));
    }

    #[test]
    fn test_classify_source_type() {
        let cases = [
            ("youtube.com", "", SourceType::Youtube),
            ("m.youtube.com", "", SourceType::Youtube),
            ("podcasts.apple.com", "", SourceType::Podcast),
            ("open.spotify.com", "", SourceType::Podcast),
            ("medium.com", "website", SourceType::Article),
            ("engineering.blog.example.com", "", SourceType::Article),
            ("docs.rs", "", SourceType::Doc),
            ("developer.mozilla.org", "article", SourceType::Doc),
            ("example.com", "article", SourceType::Article),
            ("example.com", "video.other", SourceType::Youtube),
            ("example.com", "website", SourceType::Other),
        ];

        for (domain, og_type, want) in cases {
            assert_eq!(classify_source_type(domain, og_type), want, "{} / {}", domain, og_type);
        }
    }

    #[test]
    fn test_parse_web_page_metadata() {
        let body = format!(
            r#"<html><head>
                <title>Fallback</title>
                <meta property="og:title" content="Understanding Lifetimes">
                <meta name="description" content="Plain description">
                <meta property="og:type" content="article">
                <link rel="canonical" href="/posts/lifetimes">
            </head><body><article>{}</article></body></html>"#,
            words(450)
        );

        let result = parse_web_page(
            &url("https://www.example.com/posts/lifetimes?utm_source=x"),
            &url("https://www.example.com/posts/lifetimes/"),
            &body,
        );

        assert_eq!(result.title, "Understanding Lifetimes");
        assert_eq!(result.description, "Plain description");
        assert_eq!(result.canonical_url, "https://www.example.com/posts/lifetimes");
        assert_eq!(result.domain, "example.com");
        assert_eq!(result.source_type, SourceType::Article);
        assert_eq!(result.runtime_seconds, Some(180));
        assert_eq!(result.metadata["og_type"], "article");
        assert_eq!(result.metadata["read_time_seconds"], 180);
        assert_eq!(result.metadata["word_count"], 450);
    }

    #[test]
    fn test_parse_web_page_falls_back_to_title_and_final_url() {
        let body = "<html><head><title> Plain Page </title></head><body><p>hello there</p></body></html>";
        let result = parse_web_page(
            &url("https://example.com/old"),
            &url("https://example.com/new"),
            body,
        );

        assert_eq!(result.title, "Plain Page");
        assert_eq!(result.description, "");
        assert_eq!(result.canonical_url, "https://example.com/new");
        assert_eq!(result.source_type, SourceType::Other);
        assert_eq!(result.runtime_seconds, Some(60));
        assert!(result.metadata.get("og_type").is_none());
    }

    #[test]
    fn test_video_pages_skip_reading_time() {
        let body = format!(
            r#"<html><head><meta property="og:type" content="video"></head><body>{}</body></html>"#,
            words(500)
        );
        let result = parse_web_page(&url("https://example.com/v"), &url("https://example.com/v"), &body);
        assert_eq!(result.source_type, SourceType::Youtube);
        assert_eq!(result.runtime_seconds, None);
        assert!(result.metadata.get("word_count").is_none());
    }
}
