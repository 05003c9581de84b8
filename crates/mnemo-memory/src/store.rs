use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::record::{Category, MemoryRecord, NewRecord, RecordPatch, Source};
use mnemo_core::{MnemoError, OwnerId, Result};
use mnemo_llm::normalize_importance;

const META_EMBEDDING_DIM: &str = "embedding_dim";
const META_EMBEDDING_PROVIDER: &str = "embedding_provider";
const META_TURN_COUNTER: &str = "turn_counter";
const META_LAST_DECAY_TURN: &str = "last_decay_turn";
const META_DECAY_EPOCH: &str = "decay_epoch";

const PREVIEW_CHARS: usize = 60;

const SELECT_COLUMNS: &str = "id, owner, content, category, source, embedding, importance, permanent,
     recall_count, access_count, revision, touched_epoch, created_at, updated_at, accessed_at, expires_at";

fn db_err(e: rusqlite::Error) -> MnemoError {
    MnemoError::Storage(e.to_string())
}

/// Which owners a nearest-neighbour query may return.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    /// Only records with exactly this owner (`None` = global records only).
    Exact(Option<OwnerId>),
    /// Global records plus the given owner's own.
    Visible(Option<OwnerId>),
    #[default]
    Any,
}

impl Scope {
    fn admits(&self, owner: &Option<OwnerId>) -> bool {
        match self {
            Scope::Exact(o) => o == owner,
            Scope::Visible(o) => owner.is_none() || owner == o,
            Scope::Any => true,
        }
    }
}

/// Filters for [`MemoryStore::nearest`].
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub scope: Scope,
    pub category: Option<Category>,
    pub min_similarity: Option<f32>,
}

impl SearchFilter {
    pub fn scoped(scope: Scope) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: Option<Category>) -> Self {
        self.category = category;
        self
    }

    pub fn with_min_similarity(mut self, floor: f32) -> Self {
        self.min_similarity = Some(floor);
        self
    }
}

/// Result of a batch forget. Missing ids never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForgetReport {
    pub deleted: Vec<Uuid>,
    pub not_found: Vec<Uuid>,
}

/// A near-duplicate pair found by [`MemoryStore::dedup`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicatePair {
    pub keep: Uuid,
    pub remove: Uuid,
    pub similarity: f32,
    pub keep_preview: String,
    pub remove_preview: String,
}

/// Result of a dedup pass. `removed` stays empty on a dry run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupReport {
    pub applied: bool,
    pub pairs: Vec<DuplicatePair>,
    pub removed: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessSummary {
    pub id: Uuid,
    pub content: String,
    pub access_count: u64,
}

/// Aggregate view of the store for operators.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total: usize,
    pub permanent: usize,
    /// Past `expires_at` but not yet swept.
    pub expired: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub most_accessed: Vec<AccessSummary>,
    pub dimension: Option<usize>,
    pub provider: Option<String>,
    pub halted: bool,
}

#[derive(Debug, Default)]
struct StoreMeta {
    dimension: Option<usize>,
    provider: Option<String>,
    /// (established, offending) after a dimension mismatch.
    halted: Option<(usize, usize)>,
    epoch: u64,
}

/// Serialization point for one owner scope's read-modify-write.
#[derive(Debug, Default)]
pub(crate) struct ScopeState {
    lock: Mutex<()>,
    generation: AtomicU64,
}

impl ScopeState {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Durable memory collection with brute-force cosine nearest-neighbour search.
///
/// SQLite holds the durable copy; an in-memory index serves reads, so
/// concurrent recalls share a read lock and never wait on each other.
/// Every write commits its SQLite transaction and updates the index while
/// still holding the connection, so the two never disagree.
///
/// Lock order: `db`, then `meta`, then `index`.
pub struct MemoryStore {
    db: Arc<Mutex<Connection>>,
    index: RwLock<HashMap<Uuid, MemoryRecord>>,
    meta: RwLock<StoreMeta>,
    scopes: Mutex<HashMap<Option<OwnerId>, Arc<ScopeState>>>,
}

impl MemoryStore {
    /// Open or create the memory database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening memory store");

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                owner TEXT,
                content TEXT NOT NULL,
                category TEXT NOT NULL,
                source TEXT NOT NULL,
                embedding BLOB NOT NULL,
                importance REAL NOT NULL,
                permanent INTEGER NOT NULL DEFAULT 0,
                recall_count INTEGER NOT NULL DEFAULT 0,
                access_count INTEGER NOT NULL DEFAULT 0,
                revision INTEGER NOT NULL DEFAULT 0,
                touched_epoch INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                accessed_at TEXT,
                expires_at TEXT
            );

            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_memories_owner ON memories(owner);
            CREATE INDEX IF NOT EXISTS idx_memories_expires ON memories(expires_at);
            ",
        )
        .map_err(db_err)?;

        let meta = StoreMeta {
            dimension: read_meta(&conn, META_EMBEDDING_DIM)?.and_then(|v| v.parse().ok()),
            provider: read_meta(&conn, META_EMBEDDING_PROVIDER)?,
            halted: None,
            epoch: read_meta(&conn, META_DECAY_EPOCH)?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        };
        let records = load_records(&conn)?;
        if !records.is_empty() {
            info!(count = records.len(), dimension = ?meta.dimension, "loaded memories from SQLite");
        }

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            index: RwLock::new(records.into_iter().map(|r| (r.id, r)).collect()),
            meta: RwLock::new(meta),
            scopes: Mutex::new(HashMap::new()),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    // ── Dimension guard ────────────────────────────────────────

    /// Vector dimension fixed by the first write, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.meta.read().dimension
    }

    pub fn provider_identity(&self) -> Option<String> {
        self.meta.read().provider.clone()
    }

    /// `(established, offending)` if a dimension mismatch has halted writes.
    pub fn halted(&self) -> Option<(usize, usize)> {
        self.meta.read().halted
    }

    /// Check a configured embedding provider against the established space.
    ///
    /// A different dimension halts the store. A different provider with the
    /// same dimension is only logged.
    pub fn ensure_compatible(&self, dims: usize, provider: &str) -> Result<()> {
        let db = self.db.lock();
        let mut meta = self.meta.write();
        match meta.dimension {
            Some(established) if established != dims => {
                meta.halted = Some((established, dims));
                error!(
                    established,
                    configured = dims,
                    provider,
                    "embedding provider does not match the store; writes halted until reset"
                );
                Err(MnemoError::DimensionMismatch {
                    expected: established,
                    actual: dims,
                })
            }
            _ => {
                match meta.provider.as_deref() {
                    Some(known) if known != provider => {
                        warn!(
                            stored = known,
                            configured = provider,
                            "embedding provider changed with the same dimension; similarities may be meaningless"
                        );
                    }
                    Some(_) => {}
                    None => {
                        write_meta(&db, META_EMBEDDING_PROVIDER, provider)?;
                        meta.provider = Some(provider.to_string());
                    }
                }
                Ok(())
            }
        }
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        match self.meta.read().halted {
            Some((expected, actual)) => Err(MnemoError::StoreHalted { expected, actual }),
            None => Ok(()),
        }
    }

    /// Reject a vector that does not fit the established dimension, halting the store.
    pub(crate) fn check_dimension(&self, actual: usize) -> Result<()> {
        self.check_writable()?;
        if actual == 0 {
            return Err(MnemoError::InvalidContent("empty embedding".into()));
        }
        let mut meta = self.meta.write();
        match meta.dimension {
            Some(expected) if expected != actual => {
                meta.halted = Some((expected, actual));
                error!(expected, actual, "embedding dimension mismatch; writes halted until reset");
                Err(MnemoError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }

    // ── Scopes ─────────────────────────────────────────────────

    pub(crate) fn scope(&self, owner: &Option<OwnerId>) -> Arc<ScopeState> {
        let mut scopes = self.scopes.lock();
        Arc::clone(scopes.entry(owner.clone()).or_default())
    }

    fn bump(&self, owner: &Option<OwnerId>) {
        self.scope(owner).generation.fetch_add(1, Ordering::SeqCst);
    }

    // ── Mutations ──────────────────────────────────────────────

    /// Insert a new record, serialized with other writers in its owner scope.
    pub fn insert(&self, new: NewRecord) -> Result<MemoryRecord> {
        let scope = self.scope(&new.owner);
        let _guard = scope.lock();
        self.insert_locked(new)
    }

    /// Insert assuming the caller holds the owner scope's lock.
    pub(crate) fn insert_locked(&self, new: NewRecord) -> Result<MemoryRecord> {
        let content = new.content.trim();
        if content.is_empty() {
            return Err(MnemoError::InvalidContent("empty content".into()));
        }

        let mut db = self.db.lock();
        self.check_dimension(new.embedding.len())?;

        let now = Utc::now();
        let record = MemoryRecord {
            id: Uuid::new_v4(),
            owner: new.owner,
            content: content.to_string(),
            category: new.category,
            source: new.source,
            embedding: new.embedding,
            importance: normalize_importance(new.importance),
            permanent: new.permanent,
            recall_count: if new.permanent { 0 } else { new.recall_count },
            access_count: 0,
            revision: 0,
            created_at: now,
            updated_at: now,
            accessed_at: None,
            expires_at: new.expires_at,
            touched_epoch: None,
        };

        let establishing = self.meta.read().dimension.is_none();
        let tx = db.transaction().map_err(db_err)?;
        write_row(&tx, &record)?;
        if establishing {
            write_meta(&tx, META_EMBEDDING_DIM, &record.embedding.len().to_string())?;
        }
        tx.commit().map_err(db_err)?;
        if establishing {
            self.meta.write().dimension = Some(record.embedding.len());
            info!(dimension = record.embedding.len(), "embedding dimension established");
        }
        self.index.write().insert(record.id, record.clone());
        drop(db);

        self.bump(&record.owner);
        debug!(record_id = %record.id, owner = ?record.owner, "memory inserted");
        Ok(record)
    }

    /// Apply field changes to an existing record.
    ///
    /// Semantic changes bump `revision` and count as a touch for decay.
    pub fn update(&self, id: Uuid, patch: RecordPatch) -> Result<MemoryRecord> {
        let owner = self.get(id).ok_or(MnemoError::RecordNotFound(id))?.owner;
        let scope = self.scope(&owner);
        let _guard = scope.lock();
        self.update_locked(id, patch)
    }

    pub(crate) fn update_locked(&self, id: Uuid, patch: RecordPatch) -> Result<MemoryRecord> {
        let mut db = self.db.lock();
        let mut record = self.get(id).ok_or(MnemoError::RecordNotFound(id))?;

        if let Some(ref embedding) = patch.embedding {
            self.check_dimension(embedding.len())?;
        } else {
            self.check_writable()?;
        }
        let semantic = patch.is_semantic();

        if let Some(content) = patch.content {
            let content = content.trim();
            if content.is_empty() {
                return Err(MnemoError::InvalidContent("empty content".into()));
            }
            record.content = content.to_string();
        }
        if let Some(embedding) = patch.embedding {
            record.embedding = embedding;
        }
        if let Some(category) = patch.category {
            record.category = category;
        }
        if let Some(importance) = patch.importance {
            record.importance = normalize_importance(importance);
        }
        if let Some(permanent) = patch.permanent {
            record.permanent = permanent;
        }
        if let Some(recall_count) = patch.recall_count {
            record.recall_count = recall_count;
        }
        if let Some(expires_at) = patch.expires_at {
            record.expires_at = expires_at;
        }
        record.updated_at = Utc::now();
        if semantic {
            record.revision += 1;
            record.touched_epoch = Some(self.meta.read().epoch);
        }

        let tx = db.transaction().map_err(db_err)?;
        write_row(&tx, &record)?;
        tx.commit().map_err(db_err)?;
        self.index.write().insert(record.id, record.clone());
        drop(db);

        if semantic {
            self.bump(&record.owner);
        }
        debug!(record_id = %id, revision = record.revision, "memory updated");
        Ok(record)
    }

    /// Delete a record. Returns `false` if no such record existed.
    pub fn delete(&self, id: Uuid) -> Result<bool> {
        let owner = match self.index.read().get(&id) {
            Some(r) => r.owner.clone(),
            None => return Ok(false),
        };
        let scope = self.scope(&owner);
        let _guard = scope.lock();
        self.delete_locked(id)
    }

    fn delete_locked(&self, id: Uuid) -> Result<bool> {
        let db = self.db.lock();
        let rows = db
            .execute("DELETE FROM memories WHERE id = ?1", params![id.to_string()])
            .map_err(db_err)?;
        let removed = self.index.write().remove(&id);
        drop(db);

        if let Some(ref record) = removed {
            self.bump(&record.owner);
        }
        Ok(rows > 0 || removed.is_some())
    }

    /// Delete every id given, reporting the ones that did not exist.
    pub fn forget(&self, ids: &[Uuid]) -> Result<ForgetReport> {
        let mut report = ForgetReport::default();
        for &id in ids {
            if self.delete(id)? {
                report.deleted.push(id);
            } else {
                report.not_found.push(id);
            }
        }
        info!(
            deleted = report.deleted.len(),
            not_found = report.not_found.len(),
            "forget completed"
        );
        Ok(report)
    }

    /// Delete every record whose `expires_at` is at or before `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<Uuid> = self
            .index
            .read()
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.id)
            .collect();

        let mut swept = 0;
        for id in expired {
            if self.delete(id)? {
                swept += 1;
            }
        }
        if swept > 0 {
            info!(swept, "expired memories swept");
        }
        Ok(swept)
    }

    /// Find live records of the same owner whose embeddings are at least
    /// `threshold` similar, and delete the weaker of each pair when `apply`.
    ///
    /// The higher importance wins; on a tie the older record is kept. A
    /// record already marked for removal takes part in no further pairs.
    pub fn dedup(&self, threshold: f32, apply: bool) -> Result<DedupReport> {
        let now = Utc::now();
        let pairs = {
            let index = self.index.read();
            let mut live: Vec<&MemoryRecord> =
                index.values().filter(|r| !r.is_expired(now)).collect();
            live.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

            let mut marked = HashSet::new();
            let mut pairs = Vec::new();
            for (i, a) in live.iter().enumerate() {
                for b in &live[i + 1..] {
                    if marked.contains(&a.id) {
                        break;
                    }
                    if a.owner != b.owner || marked.contains(&b.id) {
                        continue;
                    }
                    let similarity = cosine_similarity(&a.embedding, &b.embedding);
                    if similarity < threshold {
                        continue;
                    }
                    let (keep, remove) = if b.importance > a.importance {
                        (b, a)
                    } else {
                        (a, b)
                    };
                    marked.insert(remove.id);
                    pairs.push(DuplicatePair {
                        keep: keep.id,
                        remove: remove.id,
                        similarity,
                        keep_preview: preview(&keep.content),
                        remove_preview: preview(&remove.content),
                    });
                }
            }
            pairs
        };

        let mut report = DedupReport {
            applied: apply,
            pairs,
            removed: Vec::new(),
        };
        if apply {
            for pair in &report.pairs {
                if self.delete(pair.remove)? {
                    report.removed.push(pair.remove);
                }
            }
        }
        info!(
            found = report.pairs.len(),
            removed = report.removed.len(),
            applied = apply,
            "dedup completed"
        );
        Ok(report)
    }

    /// Wipe every record and the established embedding space.
    ///
    /// The only way out of a halted store.
    pub fn reset(&self) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(db_err)?;
        tx.execute("DELETE FROM memories", []).map_err(db_err)?;
        tx.execute("DELETE FROM store_meta", []).map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        *self.meta.write() = StoreMeta::default();
        self.index.write().clear();
        drop(db);

        for scope in self.scopes.lock().values() {
            scope.generation.fetch_add(1, Ordering::SeqCst);
        }
        warn!("memory store reset; all records and the embedding dimension were wiped");
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────

    /// Fetch a live (non-expired) record.
    pub fn get(&self, id: Uuid) -> Option<MemoryRecord> {
        let now = Utc::now();
        self.index
            .read()
            .get(&id)
            .filter(|r| !r.is_expired(now))
            .cloned()
    }

    /// Number of stored records, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Top-`k` live records by cosine similarity, best first.
    pub fn nearest(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(MemoryRecord, f32)>> {
        self.nearest_matching(query, k, filter, |_| true)
    }

    /// Like [`nearest`](Self::nearest), with an extra per-record predicate
    /// applied before ranking.
    pub fn nearest_matching<F>(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
        admit: F,
    ) -> Result<Vec<(MemoryRecord, f32)>>
    where
        F: Fn(&MemoryRecord) -> bool,
    {
        if let Some(dim) = self.dimension() {
            if query.len() != dim {
                return Err(MnemoError::DimensionMismatch {
                    expected: dim,
                    actual: query.len(),
                });
            }
        }
        if k == 0 {
            return Ok(vec![]);
        }

        let now = Utc::now();
        let floor = filter.min_similarity.unwrap_or(f32::NEG_INFINITY);
        let index = self.index.read();
        let mut scored: Vec<(&MemoryRecord, f32)> = index
            .values()
            .filter(|r| !r.is_expired(now))
            .filter(|r| filter.scope.admits(&r.owner))
            .filter(|r| filter.category.is_none_or(|c| c == r.category))
            .filter(|&r| admit(r))
            .map(|r| (r, cosine_similarity(query, &r.embedding)))
            .filter(|(_, sim)| *sim >= floor)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(r, s)| (r.clone(), s)).collect())
    }

    /// Totals for operators.
    pub fn stats(&self, top: usize) -> MemoryStats {
        let now = Utc::now();
        let (dimension, provider, halted) = {
            let meta = self.meta.read();
            (meta.dimension, meta.provider.clone(), meta.halted.is_some())
        };
        let index = self.index.read();
        let mut by_category = BTreeMap::new();
        let mut by_source = BTreeMap::new();
        let mut permanent = 0;
        let mut expired = 0;
        for r in index.values() {
            *by_category.entry(r.category.to_string()).or_insert(0) += 1;
            *by_source.entry(r.source.to_string()).or_insert(0) += 1;
            if r.permanent {
                permanent += 1;
            }
            if r.is_expired(now) {
                expired += 1;
            }
        }

        let mut accessed: Vec<&MemoryRecord> =
            index.values().filter(|r| r.access_count > 0).collect();
        accessed.sort_by(|a, b| b.access_count.cmp(&a.access_count));
        let most_accessed = accessed
            .into_iter()
            .take(top)
            .map(|r| AccessSummary {
                id: r.id,
                content: r.content.clone(),
                access_count: r.access_count,
            })
            .collect();

        MemoryStats {
            total: index.len(),
            permanent,
            expired,
            by_category,
            by_source,
            most_accessed,
            dimension,
            provider,
            halted,
        }
    }

    // ── Recall bookkeeping ─────────────────────────────────────

    /// Record that these memories were just recalled.
    ///
    /// Not a semantic change: revision and scope generation stay put.
    pub fn touch_recalled(
        &self,
        ids: &[Uuid],
        boost: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemoryRecord>> {
        let mut db = self.db.lock();
        let epoch = self.meta.read().epoch;
        let mut touched: Vec<MemoryRecord> = {
            let index = self.index.read();
            ids.iter().filter_map(|id| index.get(id).cloned()).collect()
        };

        let tx = db.transaction().map_err(db_err)?;
        for record in touched.iter_mut() {
            record.access_count += 1;
            record.accessed_at = Some(now);
            if !record.permanent {
                record.recall_count = record.recall_count.saturating_add(boost);
            }
            record.touched_epoch = Some(epoch);
            tx.execute(
                "UPDATE memories SET access_count = ?1, accessed_at = ?2, recall_count = ?3, touched_epoch = ?4
                 WHERE id = ?5",
                params![
                    record.access_count as i64,
                    now.to_rfc3339(),
                    record.recall_count as i64,
                    epoch as i64,
                    record.id.to_string(),
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        {
            let mut index = self.index.write();
            for record in &touched {
                if let Some(slot) = index.get_mut(&record.id) {
                    slot.access_count = record.access_count;
                    slot.accessed_at = record.accessed_at;
                    slot.recall_count = record.recall_count;
                    slot.touched_epoch = record.touched_epoch;
                }
            }
        }
        drop(db);
        Ok(touched)
    }

    // ── Decay support ──────────────────────────────────────────

    pub fn current_epoch(&self) -> u64 {
        self.meta.read().epoch
    }

    /// Records a decay tick would lower right now.
    pub(crate) fn decay_candidates(&self, floor: u32) -> Vec<Uuid> {
        let epoch = self.current_epoch();
        self.index
            .read()
            .values()
            .filter(|r| decays(r, epoch, floor))
            .map(|r| r.id)
            .collect()
    }

    /// Lower `recall_count` on one batch in a single transaction.
    ///
    /// Rechecks eligibility, since a record may have been recalled after the
    /// candidate list was taken.
    pub(crate) fn decay_batch(&self, ids: &[Uuid], amount: u32, floor: u32) -> Result<usize> {
        let mut db = self.db.lock();
        let epoch = self.current_epoch();
        let mut lowered: Vec<(Uuid, u32)> = Vec::with_capacity(ids.len());
        {
            let index = self.index.read();
            for id in ids {
                if let Some(r) = index.get(id).filter(|r| decays(r, epoch, floor)) {
                    lowered.push((r.id, r.recall_count.saturating_sub(amount).max(floor)));
                }
            }
        }

        let tx = db.transaction().map_err(db_err)?;
        for (id, count) in &lowered {
            tx.execute(
                "UPDATE memories SET recall_count = ?1 WHERE id = ?2",
                params![*count as i64, id.to_string()],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        {
            let mut index = self.index.write();
            for (id, count) in &lowered {
                if let Some(r) = index.get_mut(id) {
                    r.recall_count = *count;
                }
            }
        }
        drop(db);
        Ok(lowered.len())
    }

    /// Close the current decay epoch and remember which turn was decayed.
    pub(crate) fn finish_tick(&self, turn: u64) -> Result<u64> {
        let mut db = self.db.lock();
        let next = self.current_epoch() + 1;
        let tx = db.transaction().map_err(db_err)?;
        write_meta(&tx, META_LAST_DECAY_TURN, &turn.to_string())?;
        write_meta(&tx, META_DECAY_EPOCH, &next.to_string())?;
        tx.commit().map_err(db_err)?;
        self.meta.write().epoch = next;
        drop(db);
        Ok(next)
    }

    pub fn last_decay_turn(&self) -> Result<Option<u64>> {
        let db = self.db.lock();
        Ok(read_meta(&db, META_LAST_DECAY_TURN)?.and_then(|v| v.parse().ok()))
    }

    /// Conversation turns seen so far.
    pub fn turn_count(&self) -> Result<u64> {
        let db = self.db.lock();
        Ok(read_meta(&db, META_TURN_COUNTER)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Advance the persisted turn counter and return the new turn number.
    pub fn next_turn(&self) -> Result<u64> {
        let db = self.db.lock();
        let turn = read_meta(&db, META_TURN_COUNTER)?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        write_meta(&db, META_TURN_COUNTER, &turn.to_string())?;
        Ok(turn)
    }
}

fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

fn decays(r: &MemoryRecord, epoch: u64, floor: u32) -> bool {
    !r.permanent && r.recall_count > floor && r.touched_epoch.is_none_or(|e| e < epoch)
}

// ── SQLite helpers ─────────────────────────────────────────────

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM store_meta WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(db_err)
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )
    .map_err(db_err)?;
    Ok(())
}

fn write_row(conn: &Connection, r: &MemoryRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO memories (id, owner, content, category, source, embedding, importance, permanent,
             recall_count, access_count, revision, touched_epoch, created_at, updated_at, accessed_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(id) DO UPDATE SET
            content = excluded.content,
            category = excluded.category,
            source = excluded.source,
            embedding = excluded.embedding,
            importance = excluded.importance,
            permanent = excluded.permanent,
            recall_count = excluded.recall_count,
            access_count = excluded.access_count,
            revision = excluded.revision,
            touched_epoch = excluded.touched_epoch,
            updated_at = excluded.updated_at,
            accessed_at = excluded.accessed_at,
            expires_at = excluded.expires_at",
        params![
            r.id.to_string(),
            r.owner,
            r.content,
            r.category.as_str(),
            r.source.as_str(),
            encode_embedding(&r.embedding),
            r.importance as f64,
            r.permanent,
            r.recall_count as i64,
            r.access_count as i64,
            r.revision as i64,
            r.touched_epoch.map(|e| e as i64),
            r.created_at.to_rfc3339(),
            r.updated_at.to_rfc3339(),
            r.accessed_at.map(|t| t.to_rfc3339()),
            r.expires_at.map(|t| t.to_rfc3339()),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

struct RawRecord {
    id: String,
    owner: Option<String>,
    content: String,
    category: String,
    source: String,
    embedding: Vec<u8>,
    importance: f64,
    permanent: bool,
    recall_count: i64,
    access_count: i64,
    revision: i64,
    touched_epoch: Option<i64>,
    created_at: String,
    updated_at: String,
    accessed_at: Option<String>,
    expires_at: Option<String>,
}

fn load_records(conn: &Connection) -> Result<Vec<MemoryRecord>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {SELECT_COLUMNS} FROM memories"))
        .map_err(db_err)?;
    let raws = stmt
        .query_map([], |row| {
            Ok(RawRecord {
                id: row.get(0)?,
                owner: row.get(1)?,
                content: row.get(2)?,
                category: row.get(3)?,
                source: row.get(4)?,
                embedding: row.get(5)?,
                importance: row.get(6)?,
                permanent: row.get(7)?,
                recall_count: row.get(8)?,
                access_count: row.get(9)?,
                revision: row.get(10)?,
                touched_epoch: row.get(11)?,
                created_at: row.get(12)?,
                updated_at: row.get(13)?,
                accessed_at: row.get(14)?,
                expires_at: row.get(15)?,
            })
        })
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;

    raws.into_iter().map(RawRecord::into_record).collect()
}

impl RawRecord {
    fn into_record(self) -> Result<MemoryRecord> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| MnemoError::Storage(format!("bad memory id {}: {}", self.id, e)))?;
        let source = Source::parse(&self.source)
            .ok_or_else(|| MnemoError::Storage(format!("bad source on {}: {}", id, self.source)))?;
        let embedding = decode_embedding(&self.embedding)
            .ok_or_else(|| MnemoError::Storage(format!("corrupt embedding on {}", id)))?;
        Ok(MemoryRecord {
            id,
            owner: self.owner,
            content: self.content,
            category: Category::parse(&self.category),
            source,
            embedding,
            importance: self.importance as f32,
            permanent: self.permanent,
            recall_count: self.recall_count.max(0) as u32,
            access_count: self.access_count.max(0) as u64,
            revision: self.revision.max(0) as u64,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            accessed_at: self.accessed_at.as_deref().map(parse_time).transpose()?,
            expires_at: self.expires_at.as_deref().map(parse_time).transpose()?,
            touched_epoch: self.touched_epoch.map(|e| e.max(0) as u64),
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MnemoError::Storage(format!("bad timestamp {s}: {e}")))
}

/// Little-endian f32 bytes.
fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Cosine similarity; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_blob_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&v)), Some(v));
        assert_eq!(decode_embedding(&[1, 2, 3]), None);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_scope_admits() {
        let alice = Some("alice".to_string());
        assert!(Scope::Exact(None).admits(&None));
        assert!(!Scope::Exact(None).admits(&alice));
        assert!(Scope::Visible(alice.clone()).admits(&None));
        assert!(Scope::Visible(alice.clone()).admits(&alice));
        assert!(!Scope::Visible(None).admits(&alice));
    }

    #[test]
    fn test_reopen_restores_records_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let id = {
            let store = MemoryStore::open(&path).unwrap();
            let rec = store
                .insert(NewRecord::new("User has a dog", vec![1.0, 0.0, 0.0]).with_owner("alice"))
                .unwrap();
            store.next_turn().unwrap();
            rec.id
        };
        let store = MemoryStore::open(&path).unwrap();
        let rec = store.get(id).unwrap();
        assert_eq!(rec.content, "User has a dog");
        assert_eq!(rec.owner.as_deref(), Some("alice"));
        assert_eq!(rec.embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(store.dimension(), Some(3));
        assert_eq!(store.turn_count().unwrap(), 1);
    }
}
