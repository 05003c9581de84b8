use chrono::Utc;
use mnemo_config::MemoryConfig;
use mnemo_core::{MnemoError, Requester, Result};
use mnemo_llm::EmbeddingProvider;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::access::AccessControl;
use crate::record::{Category, MemoryRecord};
use crate::store::{MemoryStore, SearchFilter};

/// How far past `limit` the neighbour search reaches before ranking.
const OVERFETCH: usize = 4;
/// Weight of the recall-count term in the ranking score.
const RECALL_WEIGHT: f32 = 0.02;
/// Both sides of a conflict must be at least this relevant to the query.
const CONFLICT_MIN_SIMILARITY: f32 = 0.5;

/// Standing of a recalled memory relative to others returned with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Standing {
    Clear,
    /// Wins a disagreement with another result.
    Authoritative,
    /// Disagrees with, and is outranked by, `with`.
    Conflicted { with: Uuid },
}

#[derive(Debug, Clone, Serialize)]
pub struct RecalledMemory {
    pub record: MemoryRecord,
    pub similarity: f32,
    pub score: f32,
    pub standing: Standing,
}

/// A recall request.
#[derive(Debug, Clone)]
pub struct RecallQuery {
    pub text: String,
    pub requester: Requester,
    /// Defaults to `recall_limit`.
    pub limit: Option<usize>,
    pub category: Option<Category>,
}

impl RecallQuery {
    pub fn new(text: impl Into<String>, requester: Requester) -> Self {
        Self {
            text: text.into(),
            requester,
            limit: None,
            category: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
}

/// Ranking score: similarity dominates, recent relevance nudges.
pub fn score(similarity: f32, recall_count: u32) -> f32 {
    similarity + (recall_count.max(1).saturating_add(1) as f32).log2() * RECALL_WEIGHT
}

/// Serves semantic queries and keeps access bookkeeping.
pub struct RecallEngine {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    access: Arc<dyn AccessControl>,
}

impl RecallEngine {
    pub fn new(
        store: Arc<MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        access: Arc<dyn AccessControl>,
    ) -> Self {
        Self {
            store,
            embedder,
            access,
        }
    }

    /// Recall; any failure degrades to an empty result.
    pub async fn recall(&self, query: &RecallQuery, cfg: &MemoryConfig) -> Vec<RecalledMemory> {
        match self.try_recall(query, cfg).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "recall failed, returning no memories");
                vec![]
            }
        }
    }

    /// Recall, surfacing errors.
    pub async fn try_recall(
        &self,
        query: &RecallQuery,
        cfg: &MemoryConfig,
    ) -> Result<Vec<RecalledMemory>> {
        let limit = query.limit.unwrap_or(cfg.recall_limit);
        if limit == 0 || query.text.trim().is_empty() {
            return Ok(vec![]);
        }

        let vector = embed_bounded(
            self.embedder.as_ref(),
            query.text.trim(),
            cfg.provider_timeout(),
        )
        .await?;

        let filter = SearchFilter::default()
            .with_category(query.category)
            .with_min_similarity(cfg.recall_min_similarity);
        let requester = &query.requester;
        let neighbours = self.store.nearest_matching(
            &vector,
            limit.saturating_mul(OVERFETCH),
            &filter,
            |r| self.access.permit(requester, r.owner.as_deref(), r.category),
        )?;

        let mut ranked: Vec<RecalledMemory> = neighbours
            .into_iter()
            .map(|(record, similarity)| RecalledMemory {
                score: score(similarity, record.recall_count),
                record,
                similarity,
                standing: Standing::Clear,
            })
            .collect();
        ranked.sort_by(rank);
        ranked.truncate(limit);

        let ids: Vec<Uuid> = ranked.iter().map(|m| m.record.id).collect();
        let touched: HashMap<Uuid, MemoryRecord> = self
            .store
            .touch_recalled(&ids, cfg.recall_boost, Utc::now())?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        for m in ranked.iter_mut() {
            if let Some(r) = touched.get(&m.record.id) {
                m.record = r.clone();
            }
        }

        mark_conflicts(&mut ranked);
        debug!(
            requester = ?requester.id,
            returned = ranked.len(),
            "recall served"
        );
        Ok(ranked)
    }
}

/// One embedding call, failing with `Timeout` after `timeout`.
pub(crate) async fn embed_bounded(
    embedder: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>> {
    tokio::time::timeout(timeout, embedder.embed_one(text))
        .await
        .map_err(|_| {
            MnemoError::Timeout(format!(
                "{} embedding after {}s",
                embedder.name(),
                timeout.as_secs()
            ))
        })?
}

fn rank(a: &RecalledMemory, b: &RecalledMemory) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.record
                .importance
                .partial_cmp(&a.record.importance)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.record.updated_at.cmp(&a.record.updated_at))
}

/// Flag same-category results that disagree. Higher source priority wins,
/// then the more recently updated record.
fn mark_conflicts(results: &mut [RecalledMemory]) {
    for i in 0..results.len() {
        for j in (i + 1)..results.len() {
            let (a, b) = (&results[i], &results[j]);
            if a.record.category != b.record.category
                || a.similarity < CONFLICT_MIN_SIMILARITY
                || b.similarity < CONFLICT_MIN_SIMILARITY
                || a.record.content.trim().eq_ignore_ascii_case(b.record.content.trim())
            {
                continue;
            }
            let a_wins = (a.record.source.priority(), a.record.updated_at)
                >= (b.record.source.priority(), b.record.updated_at);
            let (winner, loser) = if a_wins { (i, j) } else { (j, i) };
            let winner_id = results[winner].record.id;
            if results[winner].standing == Standing::Clear {
                results[winner].standing = Standing::Authoritative;
            }
            if !matches!(results[loser].standing, Standing::Conflicted { .. }) {
                results[loser].standing = Standing::Conflicted { with: winner_id };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_favours_similarity() {
        // A modest recall_count does not outweigh a clearly better match.
        assert!(score(0.9, 0) > score(0.8, 20));
        assert!(score(0.8, 8) > score(0.8, 1));
        assert_eq!(score(0.5, 0), score(0.5, 1));
    }
}
