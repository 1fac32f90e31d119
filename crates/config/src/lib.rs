//! Configuration for the sodam advisory pipeline
//!
//! `Settings` carries the whole recognised option surface; `constants`
//! centralises the defaults so file, env, and code agree on one value.

pub mod constants;
pub mod settings;

pub use settings::{
    BackendConfig, CacheConfig, ClassificationConfig, EvaluationConfig, EvaluationWeights,
    FusionConfig, GenerationConfig, QualityConfig, QueryAnalysisThresholds, RetrievalConfig,
    RuntimeEnvironment, Settings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
