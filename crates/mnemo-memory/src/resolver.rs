use chrono::{DateTime, Utc};
use mnemo_config::MemoryConfig;
use mnemo_core::{MnemoError, OwnerId, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::record::{Category, NewRecord, RecordPatch, Source};
use crate::store::{MemoryStore, Scope, SearchFilter};

/// Outcome class of a candidate against its nearest neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Insert,
    Update,
    Skip,
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Zone::Insert => "insert",
            Zone::Update => "update",
            Zone::Skip => "skip",
        })
    }
}

/// Zone for a similarity: `[0, insert)` inserts, `[insert, update)` updates,
/// `[update, 1]` skips.
pub fn classify(similarity: f32, cfg: &MemoryConfig) -> Zone {
    if similarity < cfg.insert_threshold {
        Zone::Insert
    } else if similarity < cfg.update_threshold {
        Zone::Update
    } else {
        Zone::Skip
    }
}

/// An accepted statement on its way into the store.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub content: String,
    pub category: Category,
    pub importance: f32,
    pub embedding: Vec<f32>,
    pub owner: Option<OwnerId>,
    pub permanent: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Candidate {
    pub fn new(content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            content: content.into(),
            category: Category::Fact,
            importance: 0.5,
            embedding,
            owner: None,
            permanent: false,
            expires_at: None,
        }
    }

    pub fn with_owner(mut self, owner: Option<OwnerId>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }
}

/// The nearest record a resolution points at, as it was when resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub id: Uuid,
    pub revision: u64,
    pub similarity: f32,
}

/// A zone decision plus what it was decided against.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub zone: Zone,
    pub target: Option<Target>,
    pub owner: Option<OwnerId>,
    /// Scope write generation observed before the neighbour lookup.
    pub generation: u64,
}

/// What `apply` actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted(Uuid),
    Updated(Uuid),
    Skipped { duplicate_of: Option<Uuid> },
}

/// Decides INSERT / UPDATE / SKIP for accepted candidates and drives the store.
///
/// Resolution is optimistic: `resolve` reads without locking, `apply`
/// takes the owner scope's lock and refuses to act if any write landed in
/// the scope since. Every capture goes in with `user_confirmed` provenance.
pub struct SimilarityResolver {
    store: Arc<MemoryStore>,
}

impl SimilarityResolver {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Classify `embedding` against its single nearest neighbour in `owner`'s scope.
    pub fn resolve(
        &self,
        embedding: &[f32],
        owner: Option<OwnerId>,
        cfg: &MemoryConfig,
    ) -> Result<Resolution> {
        self.store.check_dimension(embedding.len())?;
        let generation = self.store.scope(&owner).generation();
        let filter = SearchFilter::scoped(Scope::Exact(owner.clone()));
        let nearest = self.store.nearest(embedding, 1, &filter)?;

        let resolution = match nearest.into_iter().next() {
            None => Resolution {
                zone: Zone::Insert,
                target: None,
                owner,
                generation,
            },
            Some((record, similarity)) => {
                let mut zone = classify(similarity, cfg);
                if zone == Zone::Update && !Source::UserConfirmed.may_overwrite(record.source) {
                    debug!(record_id = %record.id, source = %record.source, "nearest record outranks candidate");
                    zone = Zone::Skip;
                }
                Resolution {
                    zone,
                    target: Some(Target {
                        id: record.id,
                        revision: record.revision,
                        similarity,
                    }),
                    owner,
                    generation,
                }
            }
        };

        debug!(
            zone = %resolution.zone,
            similarity = resolution.target.map(|t| t.similarity),
            owner = ?resolution.owner,
            "candidate resolved"
        );
        Ok(resolution)
    }

    /// Apply a resolution, failing with `ConcurrentUpdateConflict` if the
    /// scope changed since it was resolved.
    pub fn apply(
        &self,
        resolution: &Resolution,
        candidate: Candidate,
        cfg: &MemoryConfig,
    ) -> Result<Applied> {
        let scope = self.store.scope(&resolution.owner);
        let _guard = scope.lock();
        if scope.generation() != resolution.generation {
            return Err(MnemoError::ConcurrentUpdateConflict {
                id: resolution.target.map(|t| t.id).unwrap_or(Uuid::nil()),
            });
        }
        self.apply_locked(resolution, candidate, cfg)
    }

    /// Apply, and on conflict retry once against the current state.
    ///
    /// If the record this candidate meant to merge into was changed by
    /// another writer, the candidate is dropped as a SKIP.
    pub fn apply_or_retry(
        &self,
        resolution: Resolution,
        candidate: Candidate,
        cfg: &MemoryConfig,
    ) -> Result<Applied> {
        match self.apply(&resolution, candidate.clone(), cfg) {
            Err(MnemoError::ConcurrentUpdateConflict { id }) => {
                debug!(record_id = %id, "write conflict, re-resolving");
                let scope = self.store.scope(&resolution.owner);
                let _guard = scope.lock();

                if let (Zone::Update, Some(target)) = (resolution.zone, resolution.target) {
                    let moved = self
                        .store
                        .get(target.id)
                        .is_some_and(|r| r.revision != target.revision);
                    if moved {
                        warn!(record_id = %target.id, "target changed under a concurrent writer, skipping candidate");
                        return Ok(Applied::Skipped {
                            duplicate_of: Some(target.id),
                        });
                    }
                }

                let fresh = self.resolve(&candidate.embedding, resolution.owner.clone(), cfg)?;
                self.apply_locked(&fresh, candidate, cfg)
            }
            other => other,
        }
    }

    /// Resolve and apply in one go.
    pub fn commit(&self, candidate: Candidate, cfg: &MemoryConfig) -> Result<Applied> {
        let resolution = self.resolve(&candidate.embedding, candidate.owner.clone(), cfg)?;
        self.apply_or_retry(resolution, candidate, cfg)
    }

    fn apply_locked(
        &self,
        resolution: &Resolution,
        candidate: Candidate,
        cfg: &MemoryConfig,
    ) -> Result<Applied> {
        match (resolution.zone, resolution.target) {
            (Zone::Skip, target) => {
                debug!(duplicate_of = ?target.map(|t| t.id), "candidate skipped");
                Ok(Applied::Skipped {
                    duplicate_of: target.map(|t| t.id),
                })
            }
            (Zone::Update, Some(target)) => {
                let current = self
                    .store
                    .get(target.id)
                    .ok_or(MnemoError::RecordNotFound(target.id))?;
                let permanent = current.permanent || candidate.permanent;
                let patch = RecordPatch {
                    content: Some(candidate.content),
                    embedding: Some(candidate.embedding),
                    category: Some(candidate.category),
                    importance: Some(current.importance.max(candidate.importance)),
                    permanent: Some(permanent),
                    recall_count: Some(if permanent {
                        current.recall_count
                    } else {
                        current.recall_count.saturating_add(1)
                    }),
                    expires_at: candidate.expires_at.map(Some),
                };
                let updated = self.store.update_locked(target.id, patch)?;
                info!(
                    record_id = %updated.id,
                    zone = %Zone::Update,
                    similarity = target.similarity,
                    revision = updated.revision,
                    "memory updated"
                );
                Ok(Applied::Updated(updated.id))
            }
            (Zone::Insert, _) | (Zone::Update, None) => {
                let mut new = NewRecord::new(candidate.content, candidate.embedding)
                    .with_category(candidate.category)
                    .with_source(Source::UserConfirmed)
                    .with_importance(candidate.importance);
                new.owner = candidate.owner;
                new.recall_count = cfg.initial_recall_count;
                new.expires_at = candidate.expires_at;
                if candidate.permanent {
                    new = new.permanent();
                }
                let record = self.store.insert_locked(new)?;
                info!(
                    record_id = %record.id,
                    zone = %Zone::Insert,
                    owner = ?record.owner,
                    "memory inserted"
                );
                Ok(Applied::Inserted(record.id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_boundaries() {
        let cfg = MemoryConfig::default();
        assert_eq!(classify(0.0, &cfg), Zone::Insert);
        assert_eq!(classify(0.6999, &cfg), Zone::Insert);
        assert_eq!(classify(0.70, &cfg), Zone::Update);
        assert_eq!(classify(0.8499, &cfg), Zone::Update);
        assert_eq!(classify(0.85, &cfg), Zone::Skip);
        assert_eq!(classify(1.0, &cfg), Zone::Skip);
    }

    #[test]
    fn test_thresholds_come_from_config() {
        let cfg = MemoryConfig {
            insert_threshold: 0.5,
            update_threshold: 0.6,
            ..Default::default()
        };
        assert_eq!(classify(0.55, &cfg), Zone::Update);
        assert_eq!(classify(0.7, &cfg), Zone::Skip);
    }

    #[test]
    fn test_observed_record_not_overwritten() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        store
            .insert(
                NewRecord::new("User works at a bakery", vec![1.0, 0.0])
                    .with_source(Source::Observed),
            )
            .unwrap();
        let resolver = SimilarityResolver::new(Arc::clone(&store));
        let cfg = MemoryConfig::default();
        // Observed ranks below user_confirmed, so a confirmed candidate may update it.
        let res = resolver.resolve(&[0.8, 0.6], None, &cfg).unwrap();
        assert_eq!(res.zone, Zone::Update);
    }
}
