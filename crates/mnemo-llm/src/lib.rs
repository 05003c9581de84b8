//! # mnemo-llm
//!
//! Narrow interfaces over the external model providers the memory system
//! depends on: text embeddings and the evaluator's keep-or-skip judgment.
//! One implementation per backend, chosen by configuration.

pub mod embedding;
pub mod judge;
pub mod retry;
pub mod mock;
pub mod factory;

pub use embedding::{EmbeddingProvider, OllamaEmbedding, OpenAiEmbedding};
pub use judge::{ChatJudge, Judge, Judgment, normalize_importance, parse_judgment};
pub use retry::RetryPolicy;
pub use mock::{MockEmbedding, MockJudge};
pub use factory::{build_embedding, build_judge};
