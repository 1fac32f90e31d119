//! Retrieval core with hybrid search
//!
//! Features:
//! - Dense vector search via Qdrant behind a store trait
//! - Sparse BM25 search via Tantivy with lazy per-collection warming
//! - Hybrid fusion with mode-weighted RRF, MMR diversification, and
//!   exact statute-citation boosting
//! - LLM multi-query expansion with request-spanning cache
//! - Adaptive strategy selection and per-domain document budgeting
//! - Rule-based retrieval evaluation feeding graduated retry
//! - Legal supplementation from the shared law collection
//! - Cross-domain merge with rerank and one-shot loosening

pub mod budget;
pub mod embeddings;
pub mod evaluator;
pub mod expansion;
pub mod legal;
pub mod orchestrator;
pub mod reranker;
pub mod searcher;
pub mod sparse_search;
pub mod strategy;
pub mod vector_store;

pub use budget::{DocumentBudgetCalculator, RetrievalBudget};
pub use embeddings::{cosine_similarity, l2_normalize, Embedder, HashEmbedder, HttpEmbedder};
pub use evaluator::{QualityFloors, RetrievalEvaluation, RetrievalEvaluator, RetrievalStatus};
pub use expansion::{MultiQueryExpander, MultiQueryConfig};
pub use legal::LegalTrigger;
pub use orchestrator::{
    MergedRetrieval, OrchestratorConfig, RetrievalOrchestrator, RetrievalResult, RetryLevel,
};
pub use reranker::{HttpReranker, LexicalReranker, Reranker};
pub use searcher::{HybridSearcher, SearcherConfig};
pub use sparse_search::{CorpusLoader, SparseIndex, SparseRegistry, StaticCorpus};
pub use strategy::{QueryCharacteristics, SearchMode, SearchStrategySelector};
pub use vector_store::{MemoryVectorStore, QdrantStore, ScoredDocument, VectorSearch};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Reranker error: {0}")]
    Reranker(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl From<RagError> for sodam_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::BackendUnavailable(msg) => sodam_core::Error::BackendUnavailable(msg),
            other => sodam_core::Error::Retrieval(other.to_string()),
        }
    }
}
