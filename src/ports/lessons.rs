//! Lesson Store Port - Lessons-Learned Retrieval
//!
//! Append and ranked search over recorded lessons.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::lesson::Lesson;

/// A lesson with its relevance score for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredLesson {
  pub lesson: Lesson,
  pub score: f64,
}

/// Trait for lesson storage providers.
#[async_trait]
pub trait LessonStore: Send + Sync + 'static {
  /// Persist a new lesson.
  async fn record(&self, lesson: &Lesson) -> anyhow::Result<()>;

  /// Up to `limit` lessons relevant to `query`, best first.
  async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<ScoredLesson>>;

  /// Every stored lesson, oldest first.
  async fn all(&self) -> anyhow::Result<Vec<Lesson>>;
}
