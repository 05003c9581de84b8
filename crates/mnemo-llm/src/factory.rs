use std::sync::Arc;
use tracing::info;

use crate::embedding::{EmbeddingProvider, OllamaEmbedding, OpenAiEmbedding};
use crate::judge::{ChatJudge, Judge};
use crate::mock::{MockEmbedding, MockJudge};
use mnemo_config::{EmbeddingConfig, EvaluatorConfig, ServicesConfig};
use mnemo_core::{MnemoError, Result};

fn openai_key(services: &ServicesConfig, what: &str) -> Result<String> {
    services.openai_api_key.clone().ok_or_else(|| {
        MnemoError::Config(format!(
            "{what} provider 'openai' needs services.openai_api_key or OPENAI_API_KEY"
        ))
    })
}

/// Build the embedding backend named by `[embedding].provider`.
pub fn build_embedding(
    cfg: &EmbeddingConfig,
    services: &ServicesConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    info!(provider = %cfg.provider, model = %cfg.model, dims = cfg.dimensions, "embedding provider");
    let provider: Arc<dyn EmbeddingProvider> = match cfg.provider.as_str() {
        "ollama" => {
            let mut p = OllamaEmbedding::new(&cfg.model, cfg.dimensions);
            if !cfg.base_url.is_empty() {
                p = p.with_base_url(cfg.base_url.clone());
            }
            Arc::new(p)
        }
        "openai" => {
            let mut p = OpenAiEmbedding::new(openai_key(services, "embedding")?)
                .with_model(cfg.model.clone(), cfg.dimensions);
            if !cfg.base_url.is_empty() {
                p = p.with_base_url(cfg.base_url.clone());
            }
            Arc::new(p)
        }
        "mock" => Arc::new(MockEmbedding::new(cfg.dimensions)),
        other => {
            return Err(MnemoError::Config(format!(
                "unknown embedding provider '{other}'"
            )));
        }
    };
    Ok(provider)
}

/// Build the evaluator judge named by `[evaluator].provider`.
pub fn build_judge(cfg: &EvaluatorConfig, services: &ServicesConfig) -> Result<Arc<dyn Judge>> {
    info!(provider = %cfg.provider, model = %cfg.model, "evaluator judge");
    let judge = match cfg.provider.as_str() {
        "ollama" => ChatJudge::ollama(&cfg.model),
        "openai" => ChatJudge::openai(openai_key(services, "evaluator")?, &cfg.model),
        "mock" => return Ok(Arc::new(MockJudge::new())),
        other => {
            return Err(MnemoError::Config(format!(
                "unknown evaluator provider '{other}'"
            )));
        }
    };
    let mut judge = judge.with_sampling(cfg.temperature, cfg.max_tokens);
    if !cfg.base_url.is_empty() {
        judge = judge.with_base_url(cfg.base_url.clone());
    }
    Ok(Arc::new(judge))
}
