//! Anthropic messages API advisor.
//!
//! One request per question, no streaming and no tools. The sentiment
//! prompt asks for a bare JSON object; the reply is parsed and clamped in
//! `super::parse_sentiment`.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{LlmError, parse_sentiment};
use crate::config::LlmConfig;
use crate::domain::lesson::Lesson;
use crate::domain::strategy::TradeCandidate;
use crate::ports::advisor::{SentimentReading, TradeAdvisor};

/// Env var holding the API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const API_VERSION: &str = "2023-06-01";

const SENTIMENT_SYSTEM: &str = "You are a cautious equity options analyst. \
Reply with a single JSON object and nothing else: \
{\"score\": <number from -1 (very bearish) to 1 (very bullish)>, \
\"rationale\": \"<one or two sentences>\"}.";

const RATIONALE_SYSTEM: &str = "You are a cautious equity options analyst. \
In at most three sentences, explain the case for the proposed trade and \
the main risk, taking the listed past lessons into account.";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Messages API advisor.
pub struct AnthropicAdvisor {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicAdvisor {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey(API_KEY_ENV));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    /// Build from config with the key taken from ANTHROPIC_API_KEY.
    pub fn from_env(config: &LlmConfig) -> Result<Self, LlmError> {
        let key = std::env::var(API_KEY_ENV).map_err(|_| LlmError::MissingApiKey(API_KEY_ENV))?;
        Self::new(config, key)
    }

    /// Send one user message and return the concatenated text blocks.
    async fn complete(&self, system: &str, prompt: String) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, "Sending request to Anthropic");

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let reply: MessagesResponse = response.json().await?;
        let text: String = reply
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(text)
    }
}

fn rationale_prompt(candidate: &TradeCandidate, lessons: &[Lesson]) -> String {
    let mut prompt = format!(
        "Proposed trade: {} on {} at underlying {:.2}, {} contract(s), legs {}, \
         net credit {:.2} per share, collateral ${:.0}, max loss ${:.0}.\n",
        candidate.kind,
        candidate.underlying,
        candidate.underlying_price,
        candidate.contracts,
        candidate.symbols().join(", "),
        candidate.net_credit(),
        candidate.collateral_required(),
        candidate.max_loss(),
    );
    if lessons.is_empty() {
        prompt.push_str("No past lessons apply.");
    } else {
        prompt.push_str("Past lessons:\n");
        for lesson in lessons {
            prompt.push_str(&format!("- [{}] {}: {}\n", lesson.severity, lesson.title, lesson.body));
        }
    }
    prompt
}

#[async_trait]
impl TradeAdvisor for AnthropicAdvisor {
    #[instrument(skip(self, context))]
    async fn sentiment(&self, underlying: &str, context: &str) -> anyhow::Result<SentimentReading> {
        let prompt = format!(
            "Rate the near-term (30 day) sentiment for {underlying}.\nMarket context:\n{context}"
        );
        let text = self
            .complete(SENTIMENT_SYSTEM, prompt)
            .await
            .with_context(|| format!("Sentiment request for {underlying} failed"))?;
        Ok(parse_sentiment(&text)?)
    }

    #[instrument(skip(self, candidate, lessons), fields(underlying = %candidate.underlying))]
    async fn rationale(
        &self,
        candidate: &TradeCandidate,
        lessons: &[Lesson],
    ) -> anyhow::Result<String> {
        let text = self
            .complete(RATIONALE_SYSTEM, rationale_prompt(candidate, lessons))
            .await
            .context("Rationale request failed")?;
        Ok(text.trim().to_string())
    }
}
