//! Domain agents and answer synthesis
//!
//! Everything between retrieval and the final response:
//! - Domain classification (LLM, keyword, and centroid-vector paths)
//! - Multi-domain question decomposition
//! - Per-domain agents: system prompts and declarative action rules
//! - Answer generation with sandwich context and streaming
//! - Five-criterion LLM answer evaluation and optional RAGAS metrics
//! - Response cache

pub mod cache;
pub mod classifier;
pub mod decomposer;
pub mod domains;
pub mod evaluator;
pub mod generator;
pub mod keywords;
pub mod ragas;

pub use cache::ResponseCache;
pub use classifier::{ClassifierConfig, DomainClassifier};
pub use decomposer::QuestionDecomposer;
pub use domains::{agent_for, ActionRule, DomainAgent};
pub use evaluator::AnswerEvaluator;
pub use generator::{GeneratedAnswer, ResponseGenerator};
pub use keywords::DomainVocabulary;
pub use ragas::RagasEvaluator;

use thiserror::Error;

/// Agent-layer errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Stream timed out: {0}")]
    StreamTimeout(String),
}

impl From<AgentError> for sodam_core::Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::StreamTimeout(msg) => sodam_core::Error::Timeout(msg),
            other => sodam_core::Error::Generation(other.to_string()),
        }
    }
}
