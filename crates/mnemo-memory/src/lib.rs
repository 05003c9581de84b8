//! # mnemo-memory
//!
//! Long-lived semantic memory for a conversational agent.
//!
//! Capture runs a candidate through the [`EvaluatorGate`], embeds it, and
//! lets the [`SimilarityResolver`] decide between inserting, merging into the
//! nearest existing memory, or discarding it as a duplicate. The
//! [`DecayEngine`] lowers relevance of untouched memories every N turns and the
//! [`RecallEngine`] serves ranked semantic queries. [`MemoryEngine`] wires
//! them together over one [`MemoryStore`].

pub mod access;
pub mod decay;
pub mod engine;
pub mod evaluator;
pub mod recall;
pub mod record;
pub mod resolver;
pub mod store;

pub use access::{AccessControl, AllowAll, CategoryPrivacy, OwnerScoped};
pub use decay::{DecayEngine, TickOutcome};
pub use engine::{CaptureOutcome, CaptureRequest, MemoryEngine, TurnReport};
pub use evaluator::{EvaluatorGate, RejectReason, Verdict};
pub use recall::{RecallEngine, RecallQuery, RecalledMemory, Standing};
pub use record::{Category, MemoryRecord, NewRecord, RecordPatch, Source};
pub use resolver::{Applied, Candidate, Resolution, SimilarityResolver, Target, Zone, classify};
pub use store::{
    DedupReport, DuplicatePair, ForgetReport, MemoryStats, MemoryStore, Scope, SearchFilter,
    cosine_similarity,
};
