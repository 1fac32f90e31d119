//! Hybrid searcher
//!
//! Dense and sparse retrieval fused with mode-weighted Reciprocal Rank
//! Fusion. MMR_DIVERSE replaces the rerank stage with maximum-marginal-
//! relevance selection; EXACT_PLUS_VECTOR promotes exact statute-token
//! matches ahead of fusion. Output is deduplicated by content hash and
//! never exceeds k.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use sodam_core::korean;
use sodam_core::Document;

use crate::embeddings::Embedder;
use crate::reranker::Reranker;
use crate::sparse_search::{SparseHit, SparseRegistry};
use crate::strategy::{SearchMode, SearchStrategySelector};
use crate::vector_store::{ScoredDocument, VectorSearch};
use crate::RagError;

/// Searcher configuration
#[derive(Debug, Clone)]
pub struct SearcherConfig {
    /// Candidate multiplier before fusion and rerank
    pub fetch_k_multiplier: usize,
    /// Vector-side RRF weight in plain hybrid mode
    pub vector_weight: f32,
    /// RRF rank constant
    pub rrf_k: f32,
    /// MMR relevance/novelty trade-off
    pub mmr_lambda: f32,
    /// Candidate multiplier for MMR selection
    pub mmr_fetch_multiplier: usize,
    pub enable_hybrid: bool,
    pub enable_reranking: bool,
}

impl Default for SearcherConfig {
    fn default() -> Self {
        use sodam_config::constants::{fusion, retrieval};
        Self {
            fetch_k_multiplier: retrieval::FETCH_K_MULTIPLIER,
            vector_weight: fusion::VECTOR_SEARCH_WEIGHT,
            rrf_k: fusion::RRF_K,
            mmr_lambda: fusion::MMR_LAMBDA,
            mmr_fetch_multiplier: fusion::MMR_FETCH_K_MULTIPLIER,
            enable_hybrid: true,
            enable_reranking: true,
        }
    }
}

impl SearcherConfig {
    pub fn from_settings(settings: &sodam_config::Settings) -> Self {
        Self {
            fetch_k_multiplier: settings.retrieval.fetch_k_multiplier,
            vector_weight: settings.fusion.vector_search_weight,
            rrf_k: settings.fusion.rrf_k,
            mmr_lambda: settings.fusion.mmr_lambda_mult,
            mmr_fetch_multiplier: settings.fusion.mmr_fetch_k_multiplier,
            enable_hybrid: settings.retrieval.enable_hybrid_search,
            enable_reranking: settings.retrieval.enable_reranking,
        }
    }
}

/// Fusion candidate keyed by content hash
#[derive(Debug, Clone)]
struct Candidate {
    document: Document,
    vec_sim: Option<f32>,
    bm25_norm: Option<f32>,
    rrf: f32,
}

impl Candidate {
    /// Best normalised relevance across paths
    fn relevance(&self) -> f32 {
        self.vec_sim
            .unwrap_or(0.0)
            .max(self.bm25_norm.unwrap_or(0.0))
    }

    fn into_scored(self) -> ScoredDocument {
        ScoredDocument {
            score: self.relevance(),
            embedding_similarity: self.vec_sim,
            document: self.document,
        }
    }
}

/// Hybrid dense+sparse searcher
pub struct HybridSearcher {
    vector: Arc<dyn VectorSearch>,
    embedder: Arc<dyn Embedder>,
    sparse: Arc<SparseRegistry>,
    reranker: Option<Arc<dyn Reranker>>,
    config: SearcherConfig,
}

impl HybridSearcher {
    pub fn new(
        vector: Arc<dyn VectorSearch>,
        embedder: Arc<dyn Embedder>,
        sparse: Arc<SparseRegistry>,
        reranker: Option<Arc<dyn Reranker>>,
        config: SearcherConfig,
    ) -> Self {
        Self {
            vector,
            embedder,
            sparse,
            reranker,
            config,
        }
    }

    /// Search one collection. Output length ≤ k, deduplicated by content
    /// hash of the first 500 characters.
    pub async fn search(
        &self,
        query: &str,
        collection: &str,
        k: usize,
        mode: SearchMode,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let fetch_k = k * self.config.fetch_k_multiplier.max(1);

        // Sparse side first: a missing index warms in the background and
        // this call degrades to vector-only
        let sparse_hits = if self.config.enable_hybrid {
            match self.sparse.get(collection) {
                Some(index) => {
                    let query_owned = query.to_string();
                    tokio::task::spawn_blocking(move || index.search(&query_owned, fetch_k))
                        .await
                        .map_err(|e| RagError::Search(format!("sparse task failed: {}", e)))?
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, collection, "sparse search failed, continuing dense-only");
                            Vec::new()
                        })
                }
                None => {
                    tracing::debug!(collection, "BM25 index cold, warming in background");
                    self.sparse.warm_background(collection);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        // Dense side; a dead embedding backend is tolerable only when the
        // sparse side produced something
        let dense_hits = match self.dense_search(query, collection, fetch_k).await {
            Ok(hits) => hits,
            Err(e) if !sparse_hits.is_empty() => {
                tracing::warn!(error = %e, collection, "dense search failed, continuing sparse-only");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut candidates = self.fuse(query, mode, dense_hits, sparse_hits);

        // Order by fused score; ties broken by relevance then content hash
        candidates.sort_by(|a, b| {
            b.rrf
                .partial_cmp(&a.rrf)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.relevance()
                        .partial_cmp(&a.relevance())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.document.content_hash().cmp(&b.document.content_hash()))
        });

        if mode == SearchMode::MmrDiverse {
            let pool_size = k * self.config.mmr_fetch_multiplier.max(1);
            candidates.truncate(pool_size);
            let selected = self.mmr_select(candidates, k);
            return Ok(selected.into_iter().map(Candidate::into_scored).collect());
        }

        let mut results: Vec<ScoredDocument> =
            candidates.into_iter().map(Candidate::into_scored).collect();

        if self.config.enable_reranking {
            if let Some(ref reranker) = self.reranker {
                match reranker.rerank(query, results.clone(), k).await {
                    Ok(reranked) => results = reranked,
                    Err(e) => {
                        tracing::warn!(error = %e, "reranker failed, keeping fusion order");
                    }
                }
            }
        }

        results.truncate(k);
        Ok(results)
    }

    async fn dense_search(
        &self,
        query: &str,
        collection: &str,
        fetch_k: usize,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        let query_vector = self.embedder.embed(query).await?;
        self.vector.search(collection, &query_vector, fetch_k).await
    }

    /// RRF fusion over both ranked lists, deduplicated by content hash.
    /// EXACT_PLUS_VECTOR promotes exact article-token matches to the head
    /// of each list before ranks are assigned.
    fn fuse(
        &self,
        query: &str,
        mode: SearchMode,
        mut dense: Vec<ScoredDocument>,
        mut sparse: Vec<SparseHit>,
    ) -> Vec<Candidate> {
        if mode == SearchMode::ExactPlusVector {
            if let Some(article) = SearchStrategySelector::cited_article(query) {
                promote_exact(&mut dense, |d| d.document.content.contains(&article));
                promote_exact(&mut sparse, |h| h.document.content.contains(&article));
            }
        }

        let vector_weight = mode.vector_weight(self.config.vector_weight);
        let sparse_weight = 1.0 - vector_weight;
        let rrf_k = self.config.rrf_k;

        // BM25 scores are unbounded; min-max them into [0,1]
        let (bm25_min, bm25_max) = sparse
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), h| {
                (lo.min(h.score), hi.max(h.score))
            });
        let bm25_range = (bm25_max - bm25_min).max(f32::EPSILON);

        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        for (rank, hit) in dense.into_iter().enumerate() {
            let rrf = vector_weight / (rank as f32 + 1.0 + rrf_k);
            let key = hit.document.content_hash();
            let entry = candidates.entry(key).or_insert(Candidate {
                document: hit.document,
                vec_sim: None,
                bm25_norm: None,
                rrf: 0.0,
            });
            entry.vec_sim = Some(entry.vec_sim.unwrap_or(0.0).max(hit.score));
            entry.rrf += rrf;
        }

        for (rank, hit) in sparse.into_iter().enumerate() {
            let rrf = sparse_weight / (rank as f32 + 1.0 + rrf_k);
            let norm = if bm25_range <= f32::EPSILON {
                1.0
            } else {
                (hit.score - bm25_min) / bm25_range
            };
            let key = hit.document.content_hash();
            let entry = candidates.entry(key).or_insert(Candidate {
                document: hit.document,
                vec_sim: None,
                bm25_norm: None,
                rrf: 0.0,
            });
            entry.bm25_norm = Some(entry.bm25_norm.unwrap_or(0.0).max(norm));
            entry.rrf += rrf;
        }

        candidates.into_values().collect()
    }

    /// Greedy MMR selection: relevance traded against novelty versus the
    /// already-selected set. Lexical overlap stands in for document-pair
    /// similarity since result vectors are not returned by the store.
    fn mmr_select(&self, pool: Vec<Candidate>, k: usize) -> Vec<Candidate> {
        let lambda = self.config.mmr_lambda;
        let mut remaining = pool;
        let mut selected: Vec<Candidate> = Vec::with_capacity(k);
        let mut selected_tokens: Vec<HashSet<String>> = Vec::with_capacity(k);

        while selected.len() < k && !remaining.is_empty() {
            let mut best_idx = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (i, candidate) in remaining.iter().enumerate() {
                let tokens = lemma_set(&candidate.document.content);
                let redundancy = selected_tokens
                    .iter()
                    .map(|s| jaccard(&tokens, s))
                    .fold(0.0f32, f32::max);
                let score = lambda * candidate.relevance() - (1.0 - lambda) * redundancy;
                if score > best_score {
                    best_score = score;
                    best_idx = i;
                }
            }
            let chosen = remaining.remove(best_idx);
            selected_tokens.push(lemma_set(&chosen.document.content));
            selected.push(chosen);
        }
        selected
    }
}

/// Stable partition: items matching the predicate move to the front,
/// relative order preserved on both sides
fn promote_exact<T>(items: &mut Vec<T>, matches: impl Fn(&T) -> bool) {
    let (mut front, back): (Vec<T>, Vec<T>) = items.drain(..).partition(|item| matches(item));
    front.extend(back);
    *items = front;
}

fn lemma_set(content: &str) -> HashSet<String> {
    korean::extract_lemmas(content).into_iter().collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = (a.len() + b.len()) as f32 - intersection;
    intersection / union
}
