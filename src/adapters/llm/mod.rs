//! LLM Trade Advisors
//!
//! Implements the `TradeAdvisor` port. `AnthropicAdvisor` asks the
//! messages API for a sentiment score and a trade rationale;
//! `NeutralAdvisor` stands in when the LLM is disabled.
//!
//! Sub-modules:
//! - `anthropic`: messages API client

pub mod anthropic;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::lesson::Lesson;
use crate::domain::strategy::TradeCandidate;
use crate::ports::advisor::{SentimentReading, TradeAdvisor};

pub use anthropic::AnthropicAdvisor;

/// Failures talking to or interpreting the LLM.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{0} not set")]
    MissingApiKey(&'static str),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("LLM returned no text content")]
    EmptyCompletion,
    #[error("LLM reply is not the requested JSON: {0}")]
    InvalidJson(String),
}

/// Sentiment reply shape requested from the model.
#[derive(Debug, Deserialize)]
struct SentimentReply {
    score: f64,
    #[serde(default)]
    rationale: String,
}

/// First balanced `{...}` object in `text`, ignoring braces in strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a completion into a clamped sentiment reading.
pub fn parse_sentiment(completion: &str) -> Result<SentimentReading, LlmError> {
    let json = extract_json_object(completion)
        .ok_or_else(|| LlmError::InvalidJson(truncate(completion, 200)))?;
    let reply: SentimentReply =
        serde_json::from_str(json).map_err(|e| LlmError::InvalidJson(e.to_string()))?;
    if !reply.score.is_finite() {
        return Err(LlmError::InvalidJson(format!("score is {}", reply.score)));
    }
    Ok(SentimentReading::clamped(reply.score, reply.rationale))
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Advisor used when the LLM is disabled: always neutral.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralAdvisor;

#[async_trait]
impl TradeAdvisor for NeutralAdvisor {
    async fn sentiment(&self, _underlying: &str, _context: &str) -> anyhow::Result<SentimentReading> {
        Ok(SentimentReading::clamped(0.0, "LLM disabled; neutral sentiment"))
    }

    async fn rationale(
        &self,
        candidate: &TradeCandidate,
        lessons: &[Lesson],
    ) -> anyhow::Result<String> {
        Ok(format!(
            "{} {} x{} for {:.2} credit, {} lesson(s) considered",
            candidate.kind,
            candidate.underlying,
            candidate.contracts,
            candidate.net_credit(),
            lessons.len()
        ))
    }
}
