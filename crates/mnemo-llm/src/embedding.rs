use async_trait::async_trait;
use mnemo_core::{MnemoError, Result};
use tracing::debug;

/// Trait for generating text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// The dimensionality of the output embeddings.
    fn dimensions(&self) -> usize;

    /// Provider name.
    fn name(&self) -> &str;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| MnemoError::Provider(format!("{}: empty embedding response", self.name())))?;
        if vector.len() != self.dimensions() {
            return Err(MnemoError::DimensionMismatch {
                expected: self.dimensions(),
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

/// Map a failed HTTP exchange onto the provider error classes.
pub(crate) fn http_error(provider: &str, status: reqwest::StatusCode, body: &str) -> MnemoError {
    match status.as_u16() {
        401 | 403 => MnemoError::Auth(format!("{provider}: HTTP {status}")),
        429 => MnemoError::RateLimited {
            retry_after_secs: 0,
        },
        _ => MnemoError::Provider(format!("{provider}: HTTP {status}: {body}")),
    }
}

/// Map a transport failure (no HTTP response at all).
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> MnemoError {
    if err.is_timeout() {
        MnemoError::Timeout(format!("{provider}: {err}"))
    } else {
        MnemoError::Provider(format!("{provider}: request failed: {err}"))
    }
}

fn parse_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
}

/// OpenAI embeddings provider (text-embedding-3-small, text-embedding-3-large, etc.)
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedding {
    /// Create an OpenAI embedding provider with text-embedding-3-small (1536 dims).
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            model: "text-embedding-3-small".into(),
            dims: 1536,
        }
    }

    /// Use a specific model (e.g. "text-embedding-3-large" with 3072 dims).
    pub fn with_model(mut self, model: String, dims: usize) -> Self {
        self.model = model;
        self.dims = dims;
        self
    }

    /// Use a custom base URL (e.g. for Azure OpenAI).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(model = %self.model, count = texts.len(), "generating embeddings");

        let body = serde_json::json!({
            "model": &self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("openai embedding", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(http_error("openai embedding", status, &text));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MnemoError::Provider(format!("openai embedding parse error: {}", e)))?;

        let embeddings: Vec<Vec<f32>> = data["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| parse_vector(&item["embedding"]))
                    .collect()
            })
            .unwrap_or_default();

        if embeddings.len() != texts.len() {
            return Err(MnemoError::Provider(format!(
                "openai embedding: expected {} vectors, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Ollama embeddings provider (uses /api/embeddings endpoint).
pub struct OllamaEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedding {
    pub fn new(model: &str, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "http://127.0.0.1:11434".into(),
            model: model.to_string(),
            dims,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for text in texts {
            let body = serde_json::json!({
                "model": &self.model,
                "prompt": text,
            });

            let resp = self
                .client
                .post(format!("{}/api/embeddings", self.base_url))
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_error("ollama embedding", e))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(http_error("ollama embedding", status, &text));
            }

            let data: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| MnemoError::Provider(format!("ollama embedding parse error: {}", e)))?;

            match parse_vector(&data["embedding"]) {
                Some(embedding) if !embedding.is_empty() => results.push(embedding),
                _ => {
                    return Err(MnemoError::Provider(
                        "ollama embedding: response carried no vector".into(),
                    ));
                }
            }
        }

        Ok(results)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_classification() {
        let auth = http_error("x", reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(matches!(auth, MnemoError::Auth(_)));
        let limited = http_error("x", reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(limited, MnemoError::RateLimited { .. }));
        let other = http_error("x", reqwest::StatusCode::BAD_GATEWAY, "upstream");
        assert!(matches!(other, MnemoError::Provider(ref m) if m.contains("upstream")));
        assert!(other.is_transient());
    }

    #[test]
    fn test_parse_vector() {
        let v = serde_json::json!([0.5, -1.0, 2]);
        assert_eq!(parse_vector(&v), Some(vec![0.5, -1.0, 2.0]));
        assert_eq!(parse_vector(&serde_json::json!("nope")), None);
    }
}
