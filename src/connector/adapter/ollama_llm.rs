use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::application::{GenerateRequest, LlmProvider};
use crate::domain::CoreError;

/// Default target: Ollama running locally on its standard port.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1";
const DEFAULT_DEADLINE_SECS: u64 = 120;
/// How many available models to list in a ModelNotFound message.
const MAX_LISTED_MODELS: usize = 5;

#[derive(serde::Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: ApiOptions,
}

#[derive(serde::Serialize)]
struct ApiOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

/// HTTP client for an Ollama-compatible server.
///
/// The first `generate` runs a health check (`GET /api/tags`) verifying
/// both connectivity and model presence; later calls skip it. Transient
/// HTTP statuses map onto the retryable error kinds so the retry policy
/// can re-attempt them.
pub struct OllamaLlmProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_concurrency: usize,
    deadline: Duration,
    health_checked: AtomicBool,
}

impl OllamaLlmProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let base: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_string(),
            model: model.into(),
            max_concurrency: 2,
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            health_checked: AtomicBool::new(false),
        }
    }

    /// Construct from `OLLAMA_BASE_URL` / `OLLAMA_MODEL` with local-first
    /// defaults.
    pub fn from_env() -> Self {
        let base =
            std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(base, model)
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    fn map_request_error(&self, error: reqwest::Error) -> CoreError {
        if error.is_connect() {
            CoreError::connection_unavailable(format!(
                "Ollama server not reachable at {}: {}. Start it with `ollama serve` \
                 or point OLLAMA_BASE_URL at a running instance.",
                self.base_url, error
            ))
        } else if error.is_timeout() {
            CoreError::provider_timeout(format!("Request to {} timed out: {}", self.base_url, error))
        } else {
            CoreError::storage(format!("Request to {} failed: {}", self.base_url, error))
        }
    }

    fn map_status(&self, status: reqwest::StatusCode, body: &str) -> CoreError {
        match status.as_u16() {
            429 => CoreError::rate_limited(format!("Ollama returned 429: {}", body)),
            503 => CoreError::server_overloaded(format!("Ollama returned 503: {}", body)),
            404 => CoreError::model_not_found(format!(
                "model '{}' was not accepted by {}: {}. Run `ollama pull {}`.",
                self.model, self.base_url, body, self.model
            )),
            _ => CoreError::storage(format!("Ollama returned {}: {}", status, body)),
        }
    }

    async fn ensure_healthy(&self) -> Result<(), CoreError> {
        if self.health_checked.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.check_health().await?;
        self.health_checked.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn build_request<'a>(&'a self, request: &'a GenerateRequest, stream: bool) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.model,
            prompt: request.prompt(),
            system: request.system(),
            stream,
            options: ApiOptions {
                num_predict: request.max_tokens(),
                temperature: request.temperature(),
            },
        }
    }

    async fn send(
        &self,
        request: &GenerateRequest,
        stream: bool,
    ) -> Result<reqwest::Response, CoreError> {
        self.ensure_healthy().await?;

        let url = format!("{}/api/generate", self.base_url);
        let body = self.build_request(request, stream);

        let response = tokio::time::timeout(
            self.deadline,
            self.client.post(&url).json(&body).send(),
        )
        .await
        .map_err(|_| {
            CoreError::provider_timeout(format!(
                "Generate call exceeded the {}s deadline",
                self.deadline.as_secs()
            ))
        })?
        .map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(self.map_status(status, &text));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OllamaLlmProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    async fn check_health(&self) -> Result<(), CoreError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(self.map_status(status, &text));
        }

        let tags: TagsResponse = response.json().await.map_err(|e| {
            CoreError::storage(format!("Failed to parse model list from {}: {}", self.base_url, e))
        })?;

        let available: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
        let model_present = available
            .iter()
            .any(|name| *name == self.model || name.split(':').next() == Some(&self.model));
        if !model_present {
            let shown: Vec<&str> = available.iter().copied().take(MAX_LISTED_MODELS).collect();
            return Err(CoreError::model_not_found(format!(
                "model '{}' is not available at {} (showing {} of {} models: {:?}). \
                 Run `ollama pull {}`.",
                self.model,
                self.base_url,
                shown.len(),
                available.len(),
                shown,
                self.model
            )));
        }

        debug!("Ollama health check passed for model '{}'", self.model);
        Ok(())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, CoreError> {
        let response = self.send(request, false).await?;
        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| CoreError::storage(format!("Failed to parse generate response: {}", e)))?;
        Ok(api_response.response)
    }

    async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<String, CoreError>>, CoreError> {
        let response = self.send(request, true).await?;

        // Ollama streams newline-delimited JSON objects; carry a line
        // buffer across byte batches and stop at the `done` marker.
        let bytes = response.bytes_stream();
        let stream = futures_util::stream::unfold(
            (bytes, String::new(), false),
            |(mut bytes, mut buffer, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    if let Some(newline) = buffer.find('\n') {
                        let line: String = buffer.drain(..=newline).collect();
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<StreamDelta>(line) {
                            Ok(delta) => {
                                let done = delta.done;
                                return Some((Ok(delta.response), (bytes, buffer, done)));
                            }
                            Err(e) => {
                                return Some((
                                    Err(CoreError::storage(format!(
                                        "Malformed stream line: {}",
                                        e
                                    ))),
                                    (bytes, buffer, true),
                                ));
                            }
                        }
                    }
                    match bytes.next().await {
                        Some(Ok(batch)) => {
                            buffer.push_str(&String::from_utf8_lossy(&batch));
                        }
                        Some(Err(e)) => {
                            return Some((
                                Err(CoreError::storage(format!("Stream read failed: {}", e))),
                                (bytes, buffer, true),
                            ));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(stream.boxed())
    }
}
