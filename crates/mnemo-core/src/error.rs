use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the Mnemo memory system.
#[derive(Error, Debug)]
pub enum MnemoError {
    // ── Provider errors (transient) ────────────────────────────
    #[error("provider error: {0}")]
    Provider(String),

    #[error("provider rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider timed out: {0}")]
    Timeout(String),

    #[error("provider authentication failed: {0}")]
    Auth(String),

    // ── Store errors ───────────────────────────────────────────
    #[error("embedding dimension mismatch: store is {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("store halted after dimension mismatch (store {expected}, provider {actual}); reset required")]
    StoreHalted { expected: usize, actual: usize },

    #[error("concurrent update conflict on memory {id}")]
    ConcurrentUpdateConflict { id: Uuid },

    #[error("memory not found: {0}")]
    RecordNotFound(Uuid),

    #[error("invalid content: {0}")]
    InvalidContent(String),

    #[error("storage error: {0}")]
    Storage(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MnemoError {
    /// Embedding and judgment failures that are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MnemoError::Provider(_)
                | MnemoError::RateLimited { .. }
                | MnemoError::Timeout(_)
                | MnemoError::Auth(_)
        )
    }

    /// Errors that stop every further write until an operator resets the store.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MnemoError::DimensionMismatch { .. } | MnemoError::StoreHalted { .. }
        )
    }

    /// Server-suggested wait before the next attempt, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            MnemoError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MnemoError>;
