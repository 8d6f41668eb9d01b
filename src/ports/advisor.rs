//! Trade Advisor Port - LLM Sentiment and Rationale
//!
//! The sentiment gate and the trade journal both ask an advisor. The
//! advisor never places orders and never sees credentials.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::lesson::Lesson;
use crate::domain::strategy::TradeCandidate;

/// Market sentiment for one underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
  /// Bearish (-1) to bullish (+1).
  pub score: f64,
  /// One or two sentences explaining the score.
  pub rationale: String,
}

impl SentimentReading {
  /// Build a reading with the score clamped to [-1, 1].
  ///
  /// NaN collapses to neutral.
  pub fn clamped(score: f64, rationale: impl Into<String>) -> Self {
    let score = if score.is_nan() {
      0.0
    } else {
      score.clamp(-1.0, 1.0)
    };
    Self {
      score,
      rationale: rationale.into(),
    }
  }
}

/// Trait for trade advisors.
#[async_trait]
pub trait TradeAdvisor: Send + Sync + 'static {
  /// Sentiment for `underlying` given a short market context string.
  async fn sentiment(&self, underlying: &str, context: &str) -> anyhow::Result<SentimentReading>;

  /// Human-readable rationale for an approved trade.
  async fn rationale(
    &self,
    candidate: &TradeCandidate,
    lessons: &[Lesson],
  ) -> anyhow::Result<String>;
}
