//! Shared error type
//!
//! Each crate defines its own `thiserror` enum; this is the top-level error
//! that crate errors convert into at the pipeline boundary.

use thiserror::Error;

/// Top-level pipeline error
#[derive(Error, Debug)]
pub enum Error {
    /// Request failed input sanitisation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A capability backend (LLM, embedder, reranker, vector store) is down
    /// and no local mitigation remained
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A stage or stream exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Retrieval failed with nothing usable after all retries
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Generation failed and no candidate answer exists
    #[error("Generation error: {0}")]
    Generation(String),

    /// Configuration error surfaced at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A hard internal invariant was broken; maps to 5xx at the HTTP layer
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias using the shared error
pub type Result<T> = std::result::Result<T, Error>;
