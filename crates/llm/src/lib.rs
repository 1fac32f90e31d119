//! LLM integration
//!
//! Chat-style completion behind the [`LlmBackend`] trait:
//! - OpenAI-compatible HTTP backend with retry and SSE streaming
//! - Request-scoped token accounting via [`UsageMeter`]
//! - Scripted backend for tests

pub mod backend;
pub mod prompt;
pub mod testing;
pub mod usage;

pub use backend::{
    FinishReason, GenerateOptions, GenerationResult, LlmBackend, OpenAiBackend, OpenAiConfig,
};
pub use prompt::{Message, Role};
pub use usage::{UsageMeter, UsageSnapshot};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Generation cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for sodam_core::Error {
    fn from(err: LlmError) -> Self {
        sodam_core::Error::BackendUnavailable(err.to_string())
    }
}
