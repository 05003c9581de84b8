use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration, mapped to `mnemo.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemoConfig {
    pub memory: MemoryConfig,
    pub embedding: EmbeddingConfig,
    pub evaluator: EvaluatorConfig,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Path to the SQLite database.
    pub db_path: PathBuf,
    /// Similarity below which a candidate is inserted as a new memory.
    pub insert_threshold: f32,
    /// Similarity at or above which a candidate is discarded as a duplicate.
    /// Between the two thresholds the nearest memory is updated in place.
    pub update_threshold: f32,
    /// Default number of memories returned by a recall.
    pub recall_limit: usize,
    /// Recall ignores neighbours below this cosine similarity.
    pub recall_min_similarity: f32,
    /// How much a recall raises `recall_count` on non-permanent memories.
    pub recall_boost: u32,
    /// `recall_count` given to a freshly inserted, non-permanent memory.
    pub initial_recall_count: u32,
    /// Run decay every N conversation turns.
    pub decay_interval: u64,
    /// How much each decay tick lowers `recall_count`.
    pub decay_amount: u32,
    /// `recall_count` never decays below this value.
    pub decay_floor: u32,
    /// Records updated per decay transaction.
    pub decay_batch_size: usize,
    /// Candidates shorter than this (in characters) are never evaluated.
    pub min_content_chars: usize,
    /// Candidates longer than this are rejected as invalid content.
    pub max_content_chars: usize,
    /// Evaluate every user turn for memories automatically.
    pub auto_capture: bool,
    /// Per-call timeout for embedding and judgment calls.
    pub provider_timeout_secs: u64,
    /// Retries after the first failed provider call during capture.
    pub capture_max_retries: u32,
    /// First backoff delay; doubles on every retry (2s, 4s, 8s by default).
    pub capture_retry_base_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("memory.db"),
            insert_threshold: 0.70,
            update_threshold: 0.85,
            recall_limit: 5,
            recall_min_similarity: 0.3,
            recall_boost: 2,
            initial_recall_count: 1,
            decay_interval: 50,
            decay_amount: 1,
            decay_floor: 0,
            decay_batch_size: 256,
            min_content_chars: 5,
            max_content_chars: 2000,
            auto_capture: true,
            provider_timeout_secs: 30,
            capture_max_retries: 3,
            capture_retry_base_ms: 2000,
        }
    }
}

impl MemoryConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn capture_retry_base(&self) -> Duration {
        Duration::from_millis(self.capture_retry_base_ms)
    }
}

// ── Embedding ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding backend: "ollama", "openai" or "mock".
    pub provider: String,
    /// Model name as understood by the backend.
    pub model: String,
    /// Vector dimension produced by the model (768 for nomic-embed-text, 1536 for OpenAI small).
    pub dimensions: usize,
    /// Override the backend's base URL. Empty = backend default.
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            model: "nomic-embed-text".into(),
            dimensions: 768,
            base_url: String::new(),
        }
    }
}

impl EmbeddingConfig {
    /// Identity recorded alongside the store's established dimension.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

// ── Evaluator ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Judgment backend: "ollama", "openai" or "mock".
    pub provider: String,
    /// Small/fast chat model used to judge candidates.
    pub model: String,
    /// Override the backend's base URL. Empty = backend default.
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            model: "qwen3:0.6b".into(),
            base_url: String::new(),
            temperature: 0.1,
            max_tokens: 150,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Services ───────────────────────────────────────────────────

/// External service credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// OpenAI API key, used by the "openai" embedding and evaluator backends.
    /// Can also be set via OPENAI_API_KEY environment variable.
    /// Config file takes priority over environment variable.
    pub openai_api_key: Option<String>,
}

// ── Default for root ───────────────────────────────────────────

impl Default for MnemoConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            embedding: EmbeddingConfig::default(),
            evaluator: EvaluatorConfig::default(),
            logging: LoggingConfig::default(),
            services: ServicesConfig::default(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{} {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

const KNOWN_PROVIDERS: [&str; 3] = ["ollama", "openai", "mock"];

impl MnemoConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();
        let mem = &self.memory;

        // ── Zone thresholds ───
        for (field, value) in [
            ("memory.insert_threshold", mem.insert_threshold),
            ("memory.update_threshold", mem.update_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                warnings.push(ConfigWarning {
                    field: field.into(),
                    message: format!("threshold {} is out of range", value),
                    severity: WarningSeverity::Error,
                    hint: Some("Cosine thresholds must be in (0.0, 1.0]".into()),
                });
            }
        }
        if mem.insert_threshold >= mem.update_threshold {
            warnings.push(ConfigWarning {
                field: "memory.insert_threshold".into(),
                message: format!(
                    "insert_threshold {} must be below update_threshold {}",
                    mem.insert_threshold, mem.update_threshold
                ),
                severity: WarningSeverity::Error,
                hint: Some("Defaults are 0.70 and 0.85".into()),
            });
        }

        if !(0.0..=1.0).contains(&mem.recall_min_similarity) {
            warnings.push(ConfigWarning {
                field: "memory.recall_min_similarity".into(),
                message: format!("{} is out of range", mem.recall_min_similarity),
                severity: WarningSeverity::Error,
                hint: Some("Must be between 0.0 and 1.0".into()),
            });
        }

        // ── Limits ───
        if mem.recall_limit == 0 {
            warnings.push(ConfigWarning {
                field: "memory.recall_limit".into(),
                message: "recall_limit is 0, recall would never return anything".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 5".into()),
            });
        }
        if mem.decay_interval == 0 {
            warnings.push(ConfigWarning {
                field: "memory.decay_interval".into(),
                message: "decay_interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to the number of turns between decay ticks, e.g. 50".into()),
            });
        }
        if mem.decay_batch_size == 0 {
            warnings.push(ConfigWarning {
                field: "memory.decay_batch_size".into(),
                message: "decay_batch_size is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 256".into()),
            });
        }
        if mem.min_content_chars > mem.max_content_chars {
            warnings.push(ConfigWarning {
                field: "memory.min_content_chars".into(),
                message: format!(
                    "min_content_chars {} exceeds max_content_chars {}",
                    mem.min_content_chars, mem.max_content_chars
                ),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }
        if mem.decay_amount == 0 {
            warnings.push(ConfigWarning {
                field: "memory.decay_amount".into(),
                message: "decay_amount is 0, memories will never be deprioritized".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }
        if mem.provider_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "memory.provider_timeout_secs".into(),
                message: "timeout of 0s fails every provider call".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 30".into()),
            });
        }

        // ── Embedding ───
        if self.embedding.dimensions == 0 {
            warnings.push(ConfigWarning {
                field: "embedding.dimensions".into(),
                message: "dimensions is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("768 for nomic-embed-text, 1536 for text-embedding-3-small".into()),
            });
        }
        if !KNOWN_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            warnings.push(ConfigWarning {
                field: "embedding.provider".into(),
                message: format!("unknown embedding provider '{}'", self.embedding.provider),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Supported: {}", KNOWN_PROVIDERS.join(", "))),
            });
        }
        if !KNOWN_PROVIDERS.contains(&self.evaluator.provider.as_str()) {
            warnings.push(ConfigWarning {
                field: "evaluator.provider".into(),
                message: format!("unknown evaluator provider '{}'", self.evaluator.provider),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Supported: {}", KNOWN_PROVIDERS.join(", "))),
            });
        }
        let needs_openai_key =
            self.embedding.provider == "openai" || self.evaluator.provider == "openai";
        if needs_openai_key && self.services.openai_api_key.is_none() {
            warnings.push(ConfigWarning {
                field: "services.openai_api_key".into(),
                message: "an openai backend is selected but no API key is set".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set services.openai_api_key or OPENAI_API_KEY".into()),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
