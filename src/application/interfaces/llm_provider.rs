use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::domain::CoreError;

/// One generation request. Builder-style so call sites read like prose.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    prompt: String,
    system: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }
}

/// Text-generation provider boundary.
///
/// `check_health` must succeed once before the first `generate`;
/// implementations cache the result so later calls skip the probe.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// How many generations the provider can usefully run concurrently.
    /// Orchestrators cap their fan-out at this value.
    fn max_concurrency(&self) -> usize {
        4
    }

    async fn check_health(&self) -> Result<(), CoreError>;

    async fn generate(&self, request: &GenerateRequest) -> Result<String, CoreError>;

    /// Finite stream of text deltas; completes when the provider closes
    /// the stream.
    async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<String, CoreError>>, CoreError>;
}

/// Embedding provider boundary.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fixed output dimension; every returned vector has this length.
    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;
}
