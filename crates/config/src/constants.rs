//! Centralised defaults
//!
//! Single source of truth for every tunable the pipeline reads. The
//! `Settings` serde defaults all route through here so file, env, and
//! hardcoded values cannot drift apart.

/// Retrieval budget defaults
pub mod retrieval {
    /// Per-domain k when nothing dynamic applies
    pub const RETRIEVAL_K: usize = 5;
    /// Global document budget across all domains
    pub const MAX_RETRIEVAL_DOCS: usize = 12;
    /// Floor any domain's allocation never goes below
    pub const MIN_DOMAIN_K: usize = 2;
    /// Adaptive k range
    pub const DYNAMIC_K_MIN: usize = 3;
    pub const DYNAMIC_K_MAX: usize = 8;
    /// Candidate multiplier before fusion/rerank
    pub const FETCH_K_MULTIPLIER: usize = 3;
    /// Graduated retry depth (L1..=level)
    pub const MAX_RETRY_LEVEL: u8 = 2;
    /// Extra docs pulled from law_common on legal supplementation
    pub const LEGAL_SUPPLEMENT_K: usize = 3;
    /// Share of the merged set kept by cross-domain rerank
    pub const CROSS_DOMAIN_RERANK_RATIO: f32 = 0.7;
    /// LLM paraphrase count for multi-query expansion
    pub const MULTI_QUERY_COUNT: usize = 3;
}

/// Fusion and search-mode defaults
pub mod fusion {
    /// Vector-side weight in RRF for plain hybrid mode
    pub const VECTOR_SEARCH_WEIGHT: f32 = 0.7;
    /// RRF rank constant
    pub const RRF_K: f32 = 30.0;
    /// MMR relevance/novelty trade-off
    pub const MMR_LAMBDA: f32 = 0.7;
    /// Candidate multiplier for MMR selection
    pub const MMR_FETCH_K_MULTIPLIER: usize = 3;
}

/// Retrieval quality floors
pub mod quality {
    pub const MIN_RETRIEVAL_DOC_COUNT: usize = 2;
    pub const MIN_KEYWORD_MATCH_RATIO: f32 = 0.3;
    pub const MIN_AVG_SIMILARITY_SCORE: f32 = 0.5;
    /// Per-document embedding-similarity noise floor
    pub const MIN_DOC_EMBEDDING_SIMILARITY: f32 = 0.2;
    /// L1 RELAX_PARAMS lowers the floors to these
    pub const RELAXED_KEYWORD_MATCH_RATIO: f32 = 0.15;
    pub const RELAXED_AVG_SIMILARITY_SCORE: f32 = 0.35;
    /// L1 RELAX_PARAMS widens k by this much
    pub const RELAX_K_DELTA: usize = 3;
}

/// Classification defaults
pub mod classification {
    pub const DOMAIN_CLASSIFICATION_THRESHOLD: f32 = 0.6;
    pub const MULTI_DOMAIN_GAP_THRESHOLD: f32 = 0.1;
    /// Keyword hit ratio above which the vector score is boosted
    pub const KEYWORD_BOOST_TRIGGER_RATIO: f32 = 0.3;
    /// Boost added to the vector similarity on keyword agreement
    pub const KEYWORD_BOOST_DELTA: f32 = 0.1;
}

/// Answer evaluation defaults
pub mod evaluation {
    pub const EVALUATION_THRESHOLD: f32 = 70.0;
    pub const POST_EVAL_ALT_QUERY_COUNT: usize = 2;
    pub const MAX_RETRY_COUNT: u32 = 1;
    /// Default per-criterion weights (equal)
    pub const CRITERION_WEIGHT: f32 = 1.0;
}

/// Generation defaults
pub mod generation {
    /// Per-document truncation when formatting context
    pub const FORMAT_CONTEXT_LENGTH: usize = 3500;
    /// Per-document truncation when formatting evaluator context
    pub const EVALUATOR_CONTEXT_LENGTH: usize = 1500;
    pub const GENERATION_MAX_TOKENS: usize = 1024;
    pub const OPENAI_TEMPERATURE: f32 = 0.1;
    /// Hard wall-clock cap on a streamed generation (seconds)
    pub const STREAM_HARD_TIMEOUT_SECS: u64 = 90;
    /// Per-chunk inactivity timeout for streams (seconds)
    pub const STREAM_CHUNK_TIMEOUT_SECS: u64 = 20;
}

/// Cache defaults
pub mod cache {
    pub const CACHE_TTL_SECS: u64 = 600;
    pub const CACHE_MAX_SIZE: usize = 512;
}

/// Query analysis thresholds for adaptive search-mode selection
pub mod query_analysis {
    /// Queries longer than this count as long-form
    pub const LONG_QUERY_CHARS: usize = 60;
    /// Word count at or above which a query counts as complex
    pub const COMPLEX_WORD_COUNT: usize = 12;
    /// Keyword density above which BM25 is favoured
    pub const HIGH_KEYWORD_DENSITY: f32 = 0.6;
    /// Word count at or below which a query counts as ambiguous
    pub const AMBIGUOUS_WORD_COUNT: usize = 2;
}

/// Backend endpoints
pub mod endpoints {
    pub const QDRANT_DEFAULT: &str = "http://localhost:6334";
    pub const LLM_DEFAULT: &str = "https://api.openai.com/v1";
    pub const EMBEDDING_DEFAULT: &str = "http://localhost:8080/embed";
    pub const EMBEDDING_DIM: usize = 768;
}
