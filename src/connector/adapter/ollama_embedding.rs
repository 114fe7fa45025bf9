use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::EmbeddingProvider;
use crate::domain::CoreError;

const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
const DEFAULT_DIMENSION: usize = 768;
const DEFAULT_DEADLINE_SECS: u64 = 120;

#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Embedding provider backed by an Ollama-compatible `/api/embeddings`
/// endpoint.
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    deadline: Duration,
}

impl OllamaEmbeddingProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        let base: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_string(),
            model: model.into(),
            dimension,
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
        }
    }

    pub fn from_env() -> Self {
        let base = std::env::var("OLLAMA_BASE_URL")
            .unwrap_or_else(|_| super::ollama_llm::DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OLLAMA_EMBED_MODEL")
            .unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string());
        Self::new(base, model, DEFAULT_DIMENSION)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = EmbedRequest {
            model: &self.model,
            prompt: text,
        };

        let response = tokio::time::timeout(self.deadline, self.client.post(&url).json(&body).send())
            .await
            .map_err(|_| {
                CoreError::provider_timeout(format!(
                    "Embedding call exceeded the {}s deadline",
                    self.deadline.as_secs()
                ))
            })?
            .map_err(|e| {
                if e.is_connect() {
                    CoreError::connection_unavailable(format!(
                        "Ollama server not reachable at {}: {}. Start it with `ollama serve`.",
                        self.base_url, e
                    ))
                } else if e.is_timeout() {
                    CoreError::provider_timeout(format!("Embedding request timed out: {}", e))
                } else {
                    CoreError::storage(format!("Embedding request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => CoreError::rate_limited(format!("Ollama returned 429: {}", text)),
                503 => CoreError::server_overloaded(format!("Ollama returned 503: {}", text)),
                404 => CoreError::model_not_found(format!(
                    "embedding model '{}' is not available at {}. Run `ollama pull {}`.",
                    self.model, self.base_url, self.model
                )),
                _ => CoreError::storage(format!("Ollama returned {}: {}", status, text)),
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| CoreError::storage(format!("Failed to parse embedding response: {}", e)))?;

        if parsed.embedding.len() != self.dimension {
            return Err(CoreError::storage(format!(
                "Embedding model '{}' returned dimension {}, expected {}",
                self.model,
                parsed.embedding.len(),
                self.dimension
            )));
        }
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn name(&self) -> &str {
        "ollama-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_one(text).await?);
        }
        Ok(vectors)
    }
}
