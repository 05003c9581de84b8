use chrono::{DateTime, Utc};
use mnemo_config::{MemoryConfig, MnemoConfig};
use mnemo_core::{OwnerId, Result, Role, Turn};
use mnemo_llm::{EmbeddingProvider, Judge, RetryPolicy, build_embedding, build_judge};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::access::{AccessControl, CategoryPrivacy, OwnerScoped};
use crate::decay::{DecayEngine, TickOutcome};
use crate::evaluator::{EvaluatorGate, RejectReason};
use crate::recall::{RecallEngine, RecallQuery, RecalledMemory, embed_bounded};
use crate::resolver::{Applied, Candidate, SimilarityResolver};
use crate::store::{DedupReport, ForgetReport, MemoryStats, MemoryStore};

/// A conversation turn offered for capture.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub text: String,
    pub role: Role,
    pub owner: Option<OwnerId>,
    /// Preceding turns, shown to the judge.
    pub context: Vec<Turn>,
    /// "Remember this forever": exempt from decay.
    pub permanent: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CaptureRequest {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role,
            owner: None,
            context: Vec::new(),
            permanent: false,
            expires_at: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn with_owner(mut self, owner: impl Into<OwnerId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_context(mut self, context: Vec<Turn>) -> Self {
        self.context = context;
        self
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// What happened to a captured turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Rejected(RejectReason),
    Inserted(Uuid),
    Updated(Uuid),
    Skipped { duplicate_of: Option<Uuid> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnReport {
    pub turn: u64,
    pub decay: Option<TickOutcome>,
}

/// The memory system behind one agent: capture, recall, decay and upkeep.
///
/// Configuration is passed into every call rather than held, so a
/// hot-reloaded config takes effect on the next operation.
pub struct MemoryEngine {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    gate: EvaluatorGate,
    resolver: SimilarityResolver,
    decay: DecayEngine,
    recall: RecallEngine,
}

impl MemoryEngine {
    pub fn new(
        store: Arc<MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        judge: Arc<dyn Judge>,
        access: Arc<dyn AccessControl>,
    ) -> Self {
        Self {
            gate: EvaluatorGate::new(judge),
            resolver: SimilarityResolver::new(Arc::clone(&store)),
            decay: DecayEngine::new(Arc::clone(&store)),
            recall: RecallEngine::new(Arc::clone(&store), Arc::clone(&embedder), access),
            embedder,
            store,
        }
    }

    /// Open the configured store and build the configured providers.
    ///
    /// An embedding provider that does not match the store leaves the engine
    /// up but with writes halted, so the operator can still inspect and reset.
    pub fn from_config(cfg: &MnemoConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::open(&cfg.memory.db_path)?);
        let embedder = build_embedding(&cfg.embedding, &cfg.services)?;
        let judge = build_judge(&cfg.evaluator, &cfg.services)?;
        if let Err(e) = store.ensure_compatible(cfg.embedding.dimensions, &cfg.embedding.identity())
        {
            error!(error = %e, "memory writes disabled until the store is reset");
        }
        Ok(Self::new(
            store,
            embedder,
            judge,
            Arc::new(CategoryPrivacy::new(OwnerScoped)),
        ))
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn gate(&self) -> &EvaluatorGate {
        &self.gate
    }

    pub fn resolver(&self) -> &SimilarityResolver {
        &self.resolver
    }

    pub fn decay(&self) -> &DecayEngine {
        &self.decay
    }

    // ── Capture ────────────────────────────────────────────────

    /// Evaluate, embed and resolve one turn.
    ///
    /// Provider calls are retried with backoff on transient failures. Once
    /// retries run out the error is returned and nothing is written.
    pub async fn capture(&self, req: CaptureRequest, cfg: &MemoryConfig) -> Result<CaptureOutcome> {
        if let Some(reason) = self
            .gate
            .screen(&req.text, req.role, req.owner.as_deref(), cfg)?
        {
            return Ok(CaptureOutcome::Rejected(reason));
        }
        self.store.check_writable()?;

        let policy = RetryPolicy::new(cfg.capture_max_retries, cfg.capture_retry_base());

        let gate = &self.gate;
        let text = req.text.as_str();
        let context = req.context.as_slice();
        let verdict = policy
            .run("judge", move || gate.judge_candidate(text, context, cfg))
            .await?;
        if !verdict.store {
            return Ok(CaptureOutcome::Rejected(
                verdict.reason.unwrap_or(RejectReason::JudgedNotUseful),
            ));
        }

        let embedder = self.embedder.as_ref();
        let content = verdict.content.as_str();
        let timeout = cfg.provider_timeout();
        let embedding = policy
            .run("embed", move || embed_bounded(embedder, content, timeout))
            .await?;

        let candidate = Candidate {
            content: verdict.content.clone(),
            category: verdict.category,
            importance: verdict.importance,
            embedding,
            owner: req.owner.clone(),
            permanent: req.permanent,
            expires_at: req.expires_at,
        };
        let outcome = match self.resolver.commit(candidate, cfg)? {
            Applied::Inserted(id) => CaptureOutcome::Inserted(id),
            Applied::Updated(id) => CaptureOutcome::Updated(id),
            Applied::Skipped { duplicate_of } => CaptureOutcome::Skipped { duplicate_of },
        };
        debug!(?outcome, owner = ?req.owner, "capture complete");
        Ok(outcome)
    }

    /// Capture in the background without blocking the conversation turn.
    ///
    /// Returns `None` when automatic capture is disabled. Failures are
    /// logged and otherwise silent.
    pub fn spawn_capture(
        self: &Arc<Self>,
        req: CaptureRequest,
        cfg: MemoryConfig,
    ) -> Option<JoinHandle<()>> {
        if !cfg.auto_capture {
            debug!("auto capture disabled");
            return None;
        }
        let engine = Arc::clone(self);
        Some(tokio::spawn(async move {
            match engine.capture(req, &cfg).await {
                Ok(outcome) => debug!(?outcome, "background capture finished"),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "background capture hit a fatal store error")
                }
                Err(e) => warn!(error = %e, "background capture failed, not remembered"),
            }
        }))
    }

    // ── Recall ─────────────────────────────────────────────────

    pub async fn recall(&self, query: &RecallQuery, cfg: &MemoryConfig) -> Vec<RecalledMemory> {
        self.recall.recall(query, cfg).await
    }

    /// Recall without degrading failures to an empty result. For operator tooling.
    pub async fn try_recall(
        &self,
        query: &RecallQuery,
        cfg: &MemoryConfig,
    ) -> Result<Vec<RecalledMemory>> {
        self.recall.try_recall(query, cfg).await
    }

    // ── Upkeep ─────────────────────────────────────────────────

    /// Count a conversation turn and decay when the cadence says so.
    pub fn on_turn(&self, cfg: &MemoryConfig) -> Result<TurnReport> {
        let turn = self.store.next_turn()?;
        let decay = self.decay.maybe_tick(turn, cfg)?;
        Ok(TurnReport { turn, decay })
    }

    /// Run [`on_turn`](Self::on_turn) on the blocking pool so a decay tick
    /// never stalls the conversation. Failures are logged and yield `None`.
    pub fn spawn_on_turn(self: &Arc<Self>, cfg: MemoryConfig) -> JoinHandle<Option<TurnReport>> {
        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || match engine.on_turn(&cfg) {
            Ok(report) => {
                debug!(turn = report.turn, decayed = report.decay.is_some(), "turn upkeep finished");
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "turn upkeep failed");
                None
            }
        })
    }

    pub fn forget(&self, ids: &[Uuid]) -> Result<ForgetReport> {
        self.store.forget(ids)
    }

    pub fn sweep_expired(&self) -> Result<usize> {
        self.store.sweep_expired(Utc::now())
    }

    /// Report near-duplicates at the update threshold; delete them only
    /// when `apply` is set.
    pub fn dedup(&self, cfg: &MemoryConfig, apply: bool) -> Result<DedupReport> {
        self.store.dedup(cfg.update_threshold, apply)
    }

    /// Wipe the store. Clears a dimension halt.
    pub fn reset(&self) -> Result<()> {
        self.store.reset()?;
        info!(provider = self.embedder.name(), "memory engine reset");
        Ok(())
    }

    pub fn stats(&self) -> MemoryStats {
        self.store.stats(10)
    }
}
