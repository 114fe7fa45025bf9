use thiserror::Error;

use crate::domain::ResearchStep;

/// Error kinds for the whole core. Variants map one-to-one onto the
/// retry / containment policy: see [`CoreError::is_retryable`].
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("Provider timed out: {0}")]
    ProviderTimeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server overloaded: {0}")]
    ServerOverloaded(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Research cancelled at {step}")]
    ResearchCancelled { step: ResearchStep },

    #[error("LLM call budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn connection_unavailable(msg: impl Into<String>) -> Self {
        Self::ConnectionUnavailable(msg.into())
    }

    pub fn provider_timeout(msg: impl Into<String>) -> Self {
        Self::ProviderTimeout(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    pub fn server_overloaded(msg: impl Into<String>) -> Self {
        Self::ServerOverloaded(msg.into())
    }

    pub fn model_not_found(msg: impl Into<String>) -> Self {
        Self::ModelNotFound(msg.into())
    }

    pub fn corrupt_state(msg: impl Into<String>) -> Self {
        Self::CorruptState(msg.into())
    }

    pub fn budget_exceeded(msg: impl Into<String>) -> Self {
        Self::BudgetExceeded(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Transient failures the retry policy is allowed to re-attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable(_)
                | Self::ProviderTimeout(_)
                | Self::RateLimited(_)
                | Self::ServerOverloaded(_)
                | Self::Io(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::ResearchCancelled { .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}
