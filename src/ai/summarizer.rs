use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{SourceType, SummaryResult};
use crate::services::truncate_chars;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const CLAUDE_MODEL: &str = "claude-3-5-haiku-20241022";
const PROVIDER: &str = "anthropic";
const SUMMARIZER_VERSION: &str = "1.0.0";
const MAX_TOKENS: u32 = 150;
const MAX_PROMPT_DESCRIPTION_CHARS: usize = 1000;

/// What a summarizer gets to see of a record.
#[derive(Debug, Clone, Default)]
pub struct SummaryInput {
    pub title: String,
    pub description: String,
    pub source_type: SourceType,
    pub url: String,
    pub tag: Option<String>,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, input: &SummaryInput) -> Result<SummaryResult>;

    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    fn version(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

/// Short learning-log summaries from the Anthropic Messages API.
pub struct ClaudeSummarizer {
    client: Client,
    api_key: String,
}

impl ClaudeSummarizer {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl Summarizer for ClaudeSummarizer {
    async fn summarize(&self, input: &SummaryInput) -> Result<SummaryResult> {
        tracing::debug!("Requesting summary for {}", input.url);
        let request = MessageRequest {
            model: CLAUDE_MODEL.to_string(),
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user".to_string(),
                content: build_prompt(input),
            }],
        };

        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::SummarizerApi(format!(
                "API error {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let message_response: MessageResponse = response.json().await?;
        let text = response_text(message_response)?;

        Ok(SummaryResult {
            text,
            provider: PROVIDER.to_string(),
            model: CLAUDE_MODEL.to_string(),
            version: SUMMARIZER_VERSION.to_string(),
            generated_at: Utc::now(),
        })
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        CLAUDE_MODEL
    }

    fn version(&self) -> &str {
        SUMMARIZER_VERSION
    }
}

fn response_text(response: MessageResponse) -> Result<String> {
    let text = response
        .content
        .into_iter()
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::SummarizerApi("no text generated".to_string()));
    }
    Ok(text.to_string())
}

fn build_prompt(input: &SummaryInput) -> String {
    let mut prompt = format!(
        "Summarize this {} in 1-2 concise sentences for a learning log. \
         Focus on the key takeaway or main topic. Be direct and informative.\n\n",
        input.source_type
    );

    if !input.title.is_empty() {
        prompt.push_str(&format!("Title: {}\n\n", input.title));
    }

    if !input.description.is_empty() {
        let description = truncate_chars(&input.description, MAX_PROMPT_DESCRIPTION_CHARS);
        if description.len() < input.description.len() {
            prompt.push_str(&format!("Description: {}...\n\n", description));
        } else {
            prompt.push_str(&format!("Description: {}\n\n", description));
        }
    }

    if let Some(tag) = input.tag.as_deref().filter(|t| !t.trim().is_empty()) {
        prompt.push_str(&format!("Topics: {}\n\n", tag));
    }

    prompt.push_str("Summary:");
    prompt
}
