use chrono::{DateTime, Utc};
use mnemo_core::OwnerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Advisory topic tag on a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Fact,
    Preference,
    Event,
    Decision,
    Lesson,
    Health,
    Relationship,
    Config,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Fact,
        Category::Preference,
        Category::Event,
        Category::Decision,
        Category::Lesson,
        Category::Health,
        Category::Relationship,
        Category::Config,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Fact => "fact",
            Category::Preference => "preference",
            Category::Event => "event",
            Category::Decision => "decision",
            Category::Lesson => "lesson",
            Category::Health => "health",
            Category::Relationship => "relationship",
            Category::Config => "config",
        }
    }

    /// Lenient parse; anything unrecognized is a `Fact`.
    pub fn parse(s: &str) -> Self {
        let s = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .unwrap_or(Category::Fact)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a memory came from. Higher priority wins merges and conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    UserConfirmed,
    Observed,
    System,
}

impl Source {
    pub fn priority(&self) -> u8 {
        match self {
            Source::UserConfirmed => 3,
            Source::Observed => 2,
            Source::System => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::UserConfirmed => "user_confirmed",
            Source::Observed => "observed",
            Source::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_confirmed" => Some(Source::UserConfirmed),
            "observed" => Some(Source::Observed),
            "system" => Some(Source::System),
            _ => None,
        }
    }

    /// Whether a write from `self` may replace a record written by `existing`.
    pub fn may_overwrite(&self, existing: Source) -> bool {
        self.priority() >= existing.priority()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    /// `None` = global.
    pub owner: Option<OwnerId>,
    pub content: String,
    pub category: Category,
    pub source: Source,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub importance: f32,
    pub permanent: bool,
    pub recall_count: u32,
    pub access_count: u64,
    /// Bumped on every semantic change (content, embedding, category).
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Decay epoch of the last update or recall. `None` until first touched.
    #[serde(skip)]
    pub(crate) touched_epoch: Option<u64>,
}

impl MemoryRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// Input for a fresh record. The store assigns id, timestamps and counters.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub owner: Option<OwnerId>,
    pub content: String,
    pub category: Category,
    pub source: Source,
    pub embedding: Vec<f32>,
    pub importance: f32,
    pub permanent: bool,
    pub recall_count: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewRecord {
    pub fn new(content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            owner: None,
            content: content.into(),
            category: Category::Fact,
            source: Source::UserConfirmed,
            embedding,
            importance: 0.5,
            permanent: false,
            recall_count: 1,
            expires_at: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<OwnerId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self.recall_count = 0;
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Field-level changes for [`crate::MemoryStore::update`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub content: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub category: Option<Category>,
    pub importance: Option<f32>,
    pub permanent: Option<bool>,
    pub recall_count: Option<u32>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

impl RecordPatch {
    /// Whether applying this patch changes what the record means.
    pub fn is_semantic(&self) -> bool {
        self.content.is_some() || self.embedding.is_some() || self.category.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_lenient() {
        assert_eq!(Category::parse("Preference"), Category::Preference);
        assert_eq!(Category::parse(" health "), Category::Health);
        assert_eq!(Category::parse("gossip"), Category::Fact);
    }

    #[test]
    fn test_source_priority() {
        assert!(Source::UserConfirmed.may_overwrite(Source::Observed));
        assert!(Source::UserConfirmed.may_overwrite(Source::UserConfirmed));
        assert!(!Source::System.may_overwrite(Source::Observed));
        assert_eq!(Source::parse("observed"), Some(Source::Observed));
        assert_eq!(Source::parse("bogus"), None);
    }

    #[test]
    fn test_permanent_starts_at_zero() {
        let rec = NewRecord::new("User's blood type is O+", vec![1.0]).permanent();
        assert!(rec.permanent);
        assert_eq!(rec.recall_count, 0);
    }
}
