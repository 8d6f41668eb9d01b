//! Lessons learned from closed trades.
//!
//! A lesson is a short note attached to a losing exit (or written by hand)
//! and retrieved before the next decision on a similar underlying. Ranking
//! is plain term overlap weighted by severity.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Words too common to carry meaning in a lesson query.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "was", "were", "are", "but", "not", "from",
    "into", "too", "has", "had", "have", "its", "our", "out", "per", "than", "then", "when",
];

/// Minimum token length kept by [`Lesson::terms`].
const MIN_TERM_LEN: usize = 3;

/// How much a lesson should weigh on the next decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Ranking multiplier.
    pub fn weight(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 1.5,
            Self::High => 2.0,
            Self::Critical => 3.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => anyhow::bail!("unknown severity {other:?} (low|medium|high|critical)"),
        }
    }
}

/// A recorded lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    /// Free-form tags, usually the underlying and strategy.
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Lesson {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        severity: Severity,
        tags: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            body: body.into(),
            severity,
            tags,
            created_at,
        }
    }

    /// Searchable terms from title, body and tags.
    pub fn terms(&self) -> BTreeSet<String> {
        let mut terms = tokenize(&self.title);
        terms.extend(tokenize(&self.body));
        for tag in &self.tags {
            terms.extend(tokenize(tag));
        }
        terms
    }

    /// Relevance to a query: matched terms times severity weight.
    ///
    /// Zero when nothing overlaps, regardless of severity.
    pub fn score(&self, query_terms: &BTreeSet<String>) -> f64 {
        let own = self.terms();
        let hits = query_terms.intersection(&own).count();
        if hits == 0 {
            return 0.0;
        }
        hits as f64 * self.severity.weight()
    }
}

/// Lowercase alphanumeric tokens of at least three characters, minus stop words.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= MIN_TERM_LEN)
        .map(str::to_ascii_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}
