use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;

use crate::application::{GenerateRequest, LlmProvider};
use crate::domain::CoreError;

/// Scripted LLM used by the test suites.
///
/// Responses are consumed front-to-back; once the script runs dry every
/// call returns the fallback text. Errors can be interleaved with
/// responses to exercise retry and containment paths.
pub struct MockLlmProvider {
    script: Mutex<VecDeque<Result<String, CoreError>>>,
    fallback: String,
    calls: AtomicU32,
    health_failures: Mutex<VecDeque<CoreError>>,
    health_checks: AtomicU32,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: "mock response".to_string(),
            calls: AtomicU32::new(0),
            health_failures: Mutex::new(VecDeque::new()),
            health_checks: AtomicU32::new(0),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(Ok(response.into()));
    }

    pub fn push_error(&self, error: CoreError) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(Err(error));
    }

    pub fn push_health_failure(&self, error: CoreError) {
        self.health_failures
            .lock()
            .expect("health lock poisoned")
            .push_back(error);
    }

    /// Number of `generate` / `generate_stream` invocations so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn health_check_count(&self) -> u32 {
        self.health_checks.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Result<String, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock-llm"
    }

    fn max_concurrency(&self) -> usize {
        4
    }

    async fn check_health(&self) -> Result<(), CoreError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        match self
            .health_failures
            .lock()
            .expect("health lock poisoned")
            .pop_front()
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn generate(&self, _request: &GenerateRequest) -> Result<String, CoreError> {
        self.next_response()
    }

    async fn generate_stream(
        &self,
        _request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<String, CoreError>>, CoreError> {
        let response = self.next_response()?;
        // Split on whitespace to mimic token-by-token delivery.
        let deltas: Vec<Result<String, CoreError>> = response
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        Ok(stream::iter(deltas).boxed())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let provider = MockLlmProvider::new();
        provider.push_response("first");
        provider.push_response("second");

        let request = GenerateRequest::new("prompt");
        assert_eq!(provider.generate(&request).await.unwrap(), "first");
        assert_eq!(provider.generate(&request).await.unwrap(), "second");
        assert_eq!(provider.generate(&request).await.unwrap(), "mock response");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_error_surfaces() {
        let provider = MockLlmProvider::new();
        provider.push_error(CoreError::rate_limited("slow down"));

        let result = provider.generate(&GenerateRequest::new("prompt")).await;
        assert!(matches!(result, Err(CoreError::RateLimited(_))));
    }

    #[tokio::test]
    async fn test_stream_reassembles_response() {
        let provider = MockLlmProvider::new();
        provider.push_response("hello streaming world");

        let mut stream = provider
            .generate_stream(&GenerateRequest::new("prompt"))
            .await
            .unwrap();
        let mut assembled = String::new();
        while let Some(delta) = stream.next().await {
            assembled.push_str(&delta.unwrap());
        }
        assert_eq!(assembled, "hello streaming world");
    }
}
