//! Lessons Store - Append-only JSONL Lesson Retrieval
//!
//! Implements the `LessonStore` port on a single `lessons.jsonl` file.
//! Search is local: query terms are matched against each lesson's terms
//! and weighted by severity, ties going to the newest lesson.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::adapters::persistence::jsonl::{append_record, read_records};
use crate::domain::lesson::{Lesson, tokenize};
use crate::ports::lessons::{LessonStore, ScoredLesson};

/// JSONL-backed lesson store.
pub struct JsonlLessonStore {
    path: PathBuf,
    /// Serialises appends from concurrent jobs in one process.
    write_lock: Mutex<()>,
}

impl JsonlLessonStore {
    /// Open (and create the parent directory of) a lessons file.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }
}

/// Rank lessons against a query, dropping zero scores.
pub fn rank(lessons: Vec<Lesson>, query: &str, limit: usize) -> Vec<ScoredLesson> {
    let terms = tokenize(query);
    let mut scored: Vec<ScoredLesson> = lessons
        .into_iter()
        .filter_map(|lesson| {
            let score = lesson.score(&terms);
            (score > 0.0).then_some(ScoredLesson { lesson, score })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.lesson.created_at.cmp(&a.lesson.created_at))
    });
    scored.truncate(limit);
    scored
}

#[async_trait]
impl LessonStore for JsonlLessonStore {
    #[instrument(skip(self, lesson), fields(id = %lesson.id, severity = %lesson.severity))]
    async fn record(&self, lesson: &Lesson) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        append_record(&self.path, lesson)
            .await
            .context("Failed to record lesson")?;
        info!(title = %lesson.title, "Lesson recorded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredLesson>> {
        let lessons = self.all().await?;
        let total = lessons.len();
        let ranked = rank(lessons, query, limit);
        debug!(total, matched = ranked.len(), "Lesson search");
        Ok(ranked)
    }

    async fn all(&self) -> Result<Vec<Lesson>> {
        let mut lessons: Vec<Lesson> = read_records(&self.path).await?;
        lessons.sort_by_key(|l| l.created_at);
        Ok(lessons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lesson::Severity;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_record_and_search_ranked() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlLessonStore::new(dir.path().join("nested/lessons.jsonl"))
            .await
            .unwrap();

        let now = Utc::now();
        let low = Lesson::new("SPY gap", "Gap through short put", Severity::Low, vec![], now);
        let high = Lesson::new(
            "SPY stop",
            "Stop loss on short put after CPI",
            Severity::High,
            vec!["SPY".into()],
            now,
        );
        let unrelated = Lesson::new("QQQ", "Condor wings too narrow", Severity::Critical, vec![], now);
        for l in [&low, &high, &unrelated] {
            store.record(l).await.unwrap();
        }

        let results = store.search("SPY short put", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].lesson.id, high.id);
        assert_eq!(results[1].lesson.id, low.id);
        assert_eq!(store.all().await.unwrap().len(), 3);
    }

    #[test]
    fn test_rank_ties_newest_first_and_limit() {
        let now = Utc::now();
        let older = Lesson::new("IWM", "iwm drift", Severity::Medium, vec![], now - Duration::days(2));
        let newer = Lesson::new("IWM", "iwm drift", Severity::Medium, vec![], now);
        let ranked = rank(vec![older.clone(), newer.clone()], "iwm", 1);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].lesson.id, newer.id);
    }

    #[tokio::test]
    async fn test_search_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlLessonStore::new(dir.path().join("lessons.jsonl")).await.unwrap();
        assert!(store.search("anything", 3).await.unwrap().is_empty());
    }
}
