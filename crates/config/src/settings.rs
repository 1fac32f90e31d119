//! Main settings module
//!
//! Layered loading: `config/default.toml` (optional) → an explicit file →
//! `SODAM_*` environment overrides. Every recognised option has a serde
//! default routed through `constants`, so an empty file is a valid config.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::constants::{
    cache, classification, endpoints, evaluation, fusion, generation, quality, query_analysis,
    retrieval,
};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Relaxed validation, warnings only
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Retrieval budget and retry options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
    #[serde(default = "default_max_retrieval_docs")]
    pub max_retrieval_docs: usize,
    #[serde(default = "default_min_domain_k")]
    pub min_domain_k: usize,
    #[serde(default = "default_dynamic_k_min")]
    pub dynamic_k_min: usize,
    #[serde(default = "default_dynamic_k_max")]
    pub dynamic_k_max: usize,
    #[serde(default = "default_fetch_k_multiplier")]
    pub fetch_k_multiplier: usize,
    #[serde(default = "default_true")]
    pub enable_hybrid_search: bool,
    #[serde(default = "default_true")]
    pub enable_reranking: bool,
    #[serde(default = "default_true")]
    pub enable_adaptive_search: bool,
    /// Bounded multi-domain budget mode
    #[serde(default = "default_true")]
    pub enable_fixed_doc_limit: bool,
    #[serde(default = "default_true")]
    pub enable_cross_domain_rerank: bool,
    #[serde(default = "default_cross_domain_rerank_ratio")]
    pub cross_domain_rerank_ratio: f32,
    #[serde(default = "default_true")]
    pub enable_multi_query: bool,
    #[serde(default = "default_multi_query_count")]
    pub multi_query_count: usize,
    #[serde(default = "default_true")]
    pub enable_legal_supplement: bool,
    #[serde(default = "default_legal_supplement_k")]
    pub legal_supplement_k: usize,
    #[serde(default = "default_true")]
    pub enable_graduated_retry: bool,
    #[serde(default = "default_max_retry_level")]
    pub max_retry_level: u8,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieval_k: default_retrieval_k(),
            max_retrieval_docs: default_max_retrieval_docs(),
            min_domain_k: default_min_domain_k(),
            dynamic_k_min: default_dynamic_k_min(),
            dynamic_k_max: default_dynamic_k_max(),
            fetch_k_multiplier: default_fetch_k_multiplier(),
            enable_hybrid_search: true,
            enable_reranking: true,
            enable_adaptive_search: true,
            enable_fixed_doc_limit: true,
            enable_cross_domain_rerank: true,
            cross_domain_rerank_ratio: default_cross_domain_rerank_ratio(),
            enable_multi_query: true,
            multi_query_count: default_multi_query_count(),
            enable_legal_supplement: true,
            legal_supplement_k: default_legal_supplement_k(),
            enable_graduated_retry: true,
            max_retry_level: default_max_retry_level(),
        }
    }
}

/// Fusion knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_vector_search_weight")]
    pub vector_search_weight: f32,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
    #[serde(default = "default_mmr_lambda_mult")]
    pub mmr_lambda_mult: f32,
    #[serde(default = "default_mmr_fetch_k_multiplier")]
    pub mmr_fetch_k_multiplier: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            vector_search_weight: default_vector_search_weight(),
            rrf_k: default_rrf_k(),
            mmr_lambda_mult: default_mmr_lambda_mult(),
            mmr_fetch_k_multiplier: default_mmr_fetch_k_multiplier(),
        }
    }
}

/// Retrieval quality floors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_min_retrieval_doc_count")]
    pub min_retrieval_doc_count: usize,
    #[serde(default = "default_min_keyword_match_ratio")]
    pub min_keyword_match_ratio: f32,
    #[serde(default = "default_min_avg_similarity_score")]
    pub min_avg_similarity_score: f32,
    #[serde(default = "default_min_doc_embedding_similarity")]
    pub min_doc_embedding_similarity: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_retrieval_doc_count: default_min_retrieval_doc_count(),
            min_keyword_match_ratio: default_min_keyword_match_ratio(),
            min_avg_similarity_score: default_min_avg_similarity_score(),
            min_doc_embedding_similarity: default_min_doc_embedding_similarity(),
        }
    }
}

/// Query analysis thresholds for adaptive search-mode selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysisThresholds {
    #[serde(default = "default_long_query_chars")]
    pub long_query_chars: usize,
    #[serde(default = "default_complex_word_count")]
    pub complex_word_count: usize,
    #[serde(default = "default_high_keyword_density")]
    pub high_keyword_density: f32,
    #[serde(default = "default_ambiguous_word_count")]
    pub ambiguous_word_count: usize,
}

impl Default for QueryAnalysisThresholds {
    fn default() -> Self {
        Self {
            long_query_chars: default_long_query_chars(),
            complex_word_count: default_complex_word_count(),
            high_keyword_density: default_high_keyword_density(),
            ambiguous_word_count: default_ambiguous_word_count(),
        }
    }
}

/// Classification options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default = "default_true")]
    pub enable_domain_rejection: bool,
    #[serde(default = "default_domain_classification_threshold")]
    pub domain_classification_threshold: f32,
    #[serde(default = "default_multi_domain_gap_threshold")]
    pub multi_domain_gap_threshold: f32,
    #[serde(default)]
    pub enable_llm_domain_classification: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            enable_domain_rejection: true,
            domain_classification_threshold: default_domain_classification_threshold(),
            multi_domain_gap_threshold: default_multi_domain_gap_threshold(),
            enable_llm_domain_classification: false,
        }
    }
}

/// Per-criterion evaluation weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationWeights {
    #[serde(default = "default_criterion_weight")]
    pub accuracy: f32,
    #[serde(default = "default_criterion_weight")]
    pub completeness: f32,
    #[serde(default = "default_criterion_weight")]
    pub relevance: f32,
    #[serde(default = "default_criterion_weight")]
    pub citation: f32,
    #[serde(default = "default_criterion_weight")]
    pub retrieval_quality: f32,
}

impl Default for EvaluationWeights {
    fn default() -> Self {
        Self {
            accuracy: 1.0,
            completeness: 1.0,
            relevance: 1.0,
            citation: 1.0,
            retrieval_quality: 1.0,
        }
    }
}

impl EvaluationWeights {
    pub fn sum(&self) -> f32 {
        self.accuracy + self.completeness + self.relevance + self.citation + self.retrieval_quality
    }
}

/// Answer evaluation and bounded retry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_true")]
    pub enable_llm_evaluation: bool,
    #[serde(default = "default_evaluation_threshold")]
    pub evaluation_threshold: f32,
    #[serde(default)]
    pub evaluation_weights: EvaluationWeights,
    /// Per-domain threshold overrides keyed by collection name
    /// (law/finance stricter, startup looser)
    #[serde(default = "default_domain_evaluation_thresholds")]
    pub domain_evaluation_thresholds: HashMap<String, f32>,
    #[serde(default)]
    pub enable_ragas_evaluation: bool,
    #[serde(default = "default_true")]
    pub enable_post_eval_retry: bool,
    #[serde(default = "default_post_eval_alt_query_count")]
    pub post_eval_alt_query_count: usize,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enable_llm_evaluation: true,
            evaluation_threshold: default_evaluation_threshold(),
            evaluation_weights: EvaluationWeights::default(),
            domain_evaluation_thresholds: default_domain_evaluation_thresholds(),
            enable_ragas_evaluation: false,
            enable_post_eval_retry: true,
            post_eval_alt_query_count: default_post_eval_alt_query_count(),
            max_retry_count: default_max_retry_count(),
        }
    }
}

/// Generation options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_format_context_length")]
    pub format_context_length: usize,
    #[serde(default = "default_evaluator_context_length")]
    pub evaluator_context_length: usize,
    #[serde(default = "default_generation_max_tokens")]
    pub generation_max_tokens: usize,
    #[serde(default = "default_openai_temperature")]
    pub openai_temperature: f32,
    /// Per-domain temperature overrides keyed by collection name
    #[serde(default = "default_domain_temperatures")]
    pub domain_temperatures: HashMap<String, f32>,
    /// Hard wall-clock cap on a streamed generation, seconds
    #[serde(default = "default_stream_hard_timeout")]
    pub stream_hard_timeout: u64,
    /// Per-chunk inactivity timeout for streams, seconds
    #[serde(default = "default_stream_chunk_timeout")]
    pub stream_chunk_timeout: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            format_context_length: default_format_context_length(),
            evaluator_context_length: default_evaluator_context_length(),
            generation_max_tokens: default_generation_max_tokens(),
            openai_temperature: default_openai_temperature(),
            domain_temperatures: default_domain_temperatures(),
            stream_hard_timeout: default_stream_hard_timeout(),
            stream_chunk_timeout: default_stream_chunk_timeout(),
        }
    }
}

impl GenerationConfig {
    /// Temperature for a domain, falling back to the global default
    pub fn temperature_for(&self, collection: &str) -> f32 {
        self.domain_temperatures
            .get(collection)
            .copied()
            .unwrap_or(self.openai_temperature)
    }
}

/// Response cache options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enable_response_cache: bool,
    /// Default TTL, seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    /// Per-primary-domain TTL overrides, seconds
    #[serde(default = "default_cache_ttl_by_domain")]
    pub cache_ttl_by_domain: HashMap<String, u64>,
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_response_cache: true,
            cache_ttl: default_cache_ttl(),
            cache_ttl_by_domain: default_cache_ttl_by_domain(),
            cache_max_size: default_cache_max_size(),
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, collection: &str) -> u64 {
        self.cache_ttl_by_domain
            .get(collection)
            .copied()
            .unwrap_or(self.cache_ttl)
    }
}

/// Capability backend endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_llm_endpoint")]
    pub llm_endpoint: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_qdrant_endpoint")]
    pub qdrant_endpoint: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
    #[serde(default = "default_embedding_endpoint")]
    pub embedding_endpoint: String,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default)]
    pub reranker_endpoint: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            llm_endpoint: default_llm_endpoint(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            qdrant_endpoint: default_qdrant_endpoint(),
            qdrant_api_key: None,
            embedding_endpoint: default_embedding_endpoint(),
            embedding_dim: default_embedding_dim(),
            reranker_endpoint: None,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub query_analysis_thresholds: QueryAnalysisThresholds,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub backends: BackendConfig,
}

impl Settings {
    /// Layered load: optional default file, optional explicit file, then
    /// `SODAM_*` env overrides (`SODAM_RETRIEVAL__RETRIEVAL_K=8`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::with_name("config/default").required(false));

        if let Some(path) = path {
            let path_str = path
                .to_str()
                .ok_or_else(|| ConfigError::Invalid("non-utf8 config path".to_string()))?;
            builder = builder.add_source(File::with_name(path_str));
        }

        let config = builder
            .add_source(Environment::with_prefix("SODAM").separator("__"))
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Coherence checks. Strict environments fail; development logs warnings
    /// and proceeds with the configured values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems: Vec<String> = Vec::new();

        let r = &self.retrieval;
        if r.min_domain_k > r.max_retrieval_docs {
            problems.push(format!(
                "min_domain_k ({}) exceeds max_retrieval_docs ({})",
                r.min_domain_k, r.max_retrieval_docs
            ));
        }
        if r.dynamic_k_min > r.dynamic_k_max {
            problems.push(format!(
                "dynamic_k_min ({}) exceeds dynamic_k_max ({})",
                r.dynamic_k_min, r.dynamic_k_max
            ));
        }
        if !(0.0..=1.0).contains(&r.cross_domain_rerank_ratio) {
            problems.push("cross_domain_rerank_ratio must be in [0,1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.fusion.vector_search_weight) {
            problems.push("vector_search_weight must be in [0,1]".to_string());
        }
        if self.evaluation.evaluation_weights.sum() <= 0.0 {
            problems.push("evaluation_weights must sum to a positive value".to_string());
        }
        if !(0.0..=100.0).contains(&self.evaluation.evaluation_threshold) {
            problems.push("evaluation_threshold must be in [0,100]".to_string());
        }
        if !(0.0..=1.0).contains(&self.classification.domain_classification_threshold) {
            problems.push("domain_classification_threshold must be in [0,1]".to_string());
        }

        if problems.is_empty() {
            return Ok(());
        }
        if self.environment.is_strict() {
            return Err(ConfigError::Invalid(problems.join("; ")));
        }
        for p in &problems {
            tracing::warn!(problem = %p, "configuration problem (development mode, continuing)");
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_retrieval_k() -> usize {
    retrieval::RETRIEVAL_K
}
fn default_max_retrieval_docs() -> usize {
    retrieval::MAX_RETRIEVAL_DOCS
}
fn default_min_domain_k() -> usize {
    retrieval::MIN_DOMAIN_K
}
fn default_dynamic_k_min() -> usize {
    retrieval::DYNAMIC_K_MIN
}
fn default_dynamic_k_max() -> usize {
    retrieval::DYNAMIC_K_MAX
}
fn default_fetch_k_multiplier() -> usize {
    retrieval::FETCH_K_MULTIPLIER
}
fn default_cross_domain_rerank_ratio() -> f32 {
    retrieval::CROSS_DOMAIN_RERANK_RATIO
}
fn default_multi_query_count() -> usize {
    retrieval::MULTI_QUERY_COUNT
}
fn default_legal_supplement_k() -> usize {
    retrieval::LEGAL_SUPPLEMENT_K
}
fn default_max_retry_level() -> u8 {
    retrieval::MAX_RETRY_LEVEL
}

fn default_vector_search_weight() -> f32 {
    fusion::VECTOR_SEARCH_WEIGHT
}
fn default_rrf_k() -> f32 {
    fusion::RRF_K
}
fn default_mmr_lambda_mult() -> f32 {
    fusion::MMR_LAMBDA
}
fn default_mmr_fetch_k_multiplier() -> usize {
    fusion::MMR_FETCH_K_MULTIPLIER
}

fn default_min_retrieval_doc_count() -> usize {
    quality::MIN_RETRIEVAL_DOC_COUNT
}
fn default_min_keyword_match_ratio() -> f32 {
    quality::MIN_KEYWORD_MATCH_RATIO
}
fn default_min_avg_similarity_score() -> f32 {
    quality::MIN_AVG_SIMILARITY_SCORE
}
fn default_min_doc_embedding_similarity() -> f32 {
    quality::MIN_DOC_EMBEDDING_SIMILARITY
}

fn default_long_query_chars() -> usize {
    query_analysis::LONG_QUERY_CHARS
}
fn default_complex_word_count() -> usize {
    query_analysis::COMPLEX_WORD_COUNT
}
fn default_high_keyword_density() -> f32 {
    query_analysis::HIGH_KEYWORD_DENSITY
}
fn default_ambiguous_word_count() -> usize {
    query_analysis::AMBIGUOUS_WORD_COUNT
}

fn default_domain_classification_threshold() -> f32 {
    classification::DOMAIN_CLASSIFICATION_THRESHOLD
}
fn default_multi_domain_gap_threshold() -> f32 {
    classification::MULTI_DOMAIN_GAP_THRESHOLD
}

fn default_criterion_weight() -> f32 {
    evaluation::CRITERION_WEIGHT
}
fn default_evaluation_threshold() -> f32 {
    evaluation::EVALUATION_THRESHOLD
}
fn default_post_eval_alt_query_count() -> usize {
    evaluation::POST_EVAL_ALT_QUERY_COUNT
}
fn default_max_retry_count() -> u32 {
    evaluation::MAX_RETRY_COUNT
}

fn default_domain_evaluation_thresholds() -> HashMap<String, f32> {
    let mut m = HashMap::new();
    m.insert("law_common".to_string(), 75.0);
    m.insert("finance_tax".to_string(), 75.0);
    m.insert("hr_labor".to_string(), 70.0);
    m.insert("startup_funding".to_string(), 65.0);
    m
}

fn default_format_context_length() -> usize {
    generation::FORMAT_CONTEXT_LENGTH
}
fn default_evaluator_context_length() -> usize {
    generation::EVALUATOR_CONTEXT_LENGTH
}
fn default_generation_max_tokens() -> usize {
    generation::GENERATION_MAX_TOKENS
}
fn default_openai_temperature() -> f32 {
    generation::OPENAI_TEMPERATURE
}
fn default_stream_hard_timeout() -> u64 {
    generation::STREAM_HARD_TIMEOUT_SECS
}
fn default_stream_chunk_timeout() -> u64 {
    generation::STREAM_CHUNK_TIMEOUT_SECS
}

fn default_domain_temperatures() -> HashMap<String, f32> {
    let mut m = HashMap::new();
    m.insert("law_common".to_string(), 0.0);
    m.insert("finance_tax".to_string(), 0.0);
    m.insert("hr_labor".to_string(), 0.05);
    m.insert("startup_funding".to_string(), 0.15);
    m
}

fn default_cache_ttl() -> u64 {
    cache::CACHE_TTL_SECS
}
fn default_cache_max_size() -> usize {
    cache::CACHE_MAX_SIZE
}

fn default_cache_ttl_by_domain() -> HashMap<String, u64> {
    // Funding programmes churn; statutes do not
    let mut m = HashMap::new();
    m.insert("startup_funding".to_string(), 300);
    m.insert("law_common".to_string(), 3600);
    m
}

fn default_llm_endpoint() -> String {
    endpoints::LLM_DEFAULT.to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.to_string()
}
fn default_embedding_endpoint() -> String {
    endpoints::EMBEDDING_DEFAULT.to_string()
}
fn default_embedding_dim() -> usize {
    endpoints::EMBEDDING_DIM
}
