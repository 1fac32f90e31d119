//! Retrieval orchestration
//!
//! Runs every sub-query under the global document budget: strategy
//! selection, concurrent per-domain retrieval with multi-query expansion,
//! rule evaluation with graduated retry, legal supplementation, and the
//! cross-domain merge with one-shot rerank loosening.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sodam_core::{DomainLabel, SubQuery};

use crate::budget::{DocumentBudgetCalculator, RetrievalBudget};
use crate::evaluator::{QualityFloors, RetrievalEvaluation, RetrievalEvaluator, RetrievalStatus};
use crate::expansion::MultiQueryExpander;
use crate::legal::LegalTrigger;
use crate::reranker::Reranker;
use crate::searcher::HybridSearcher;
use crate::strategy::{SearchMode, SearchStrategySelector};
use crate::vector_store::ScoredDocument;
use crate::RagError;

/// Graduated retry levels, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryLevel {
    /// Wider k, lowered quality floors; no LLM cost
    RelaxParams,
    /// Re-run with cached or fresh multi-query expansions
    MultiQueryStrong,
    /// Search adjacent domains from the static map
    CrossDomain,
    /// Accept what we have, flag NEEDS_RETRY downstream
    PartialAnswer,
}

impl RetryLevel {
    fn for_level(level: u8) -> RetryLevel {
        match level {
            1 => RetryLevel::RelaxParams,
            2 => RetryLevel::MultiQueryStrong,
            3 => RetryLevel::CrossDomain,
            _ => RetryLevel::PartialAnswer,
        }
    }
}

/// One domain's retrieval outcome
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub domain: DomainLabel,
    pub query: String,
    pub documents: Vec<ScoredDocument>,
    pub evaluation: RetrievalEvaluation,
    pub used_multi_query: bool,
    pub retry_levels: Vec<RetryLevel>,
    pub retrieve_time_ms: u64,
}

/// Merged cross-domain retrieval
#[derive(Debug, Clone)]
pub struct MergedRetrieval {
    /// Final ordered, deduplicated document set
    pub documents: Vec<ScoredDocument>,
    /// Per-domain results in priority order (legal supplement last, when it ran)
    pub per_domain: Vec<RetrievalResult>,
    /// Evaluation of the merged set
    pub evaluation: RetrievalEvaluation,
    pub legal_supplemented: bool,
    pub mode: SearchMode,
    pub recommended_k: usize,
}

/// Orchestrator knobs, lifted from `Settings`
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub retrieval_k: usize,
    pub max_retrieval_docs: usize,
    pub enable_adaptive_search: bool,
    pub enable_multi_query: bool,
    pub enable_graduated_retry: bool,
    pub max_retry_level: u8,
    pub enable_legal_supplement: bool,
    pub legal_supplement_k: usize,
    pub enable_cross_domain_rerank: bool,
    pub cross_domain_rerank_ratio: f32,
    pub min_doc_embedding_similarity: f32,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &sodam_config::Settings) -> Self {
        let r = &settings.retrieval;
        Self {
            retrieval_k: r.retrieval_k,
            max_retrieval_docs: r.max_retrieval_docs,
            enable_adaptive_search: r.enable_adaptive_search,
            enable_multi_query: r.enable_multi_query,
            enable_graduated_retry: r.enable_graduated_retry,
            max_retry_level: r.max_retry_level,
            enable_legal_supplement: r.enable_legal_supplement,
            legal_supplement_k: r.legal_supplement_k,
            enable_cross_domain_rerank: r.enable_cross_domain_rerank,
            cross_domain_rerank_ratio: r.cross_domain_rerank_ratio,
            min_doc_embedding_similarity: settings.quality.min_doc_embedding_similarity,
        }
    }
}

/// The retrieval orchestrator
pub struct RetrievalOrchestrator {
    searcher: Arc<HybridSearcher>,
    expander: Arc<MultiQueryExpander>,
    reranker: Option<Arc<dyn Reranker>>,
    selector: SearchStrategySelector,
    budget: DocumentBudgetCalculator,
    floors: QualityFloors,
    config: OrchestratorConfig,
}

impl RetrievalOrchestrator {
    pub fn new(
        searcher: Arc<HybridSearcher>,
        expander: Arc<MultiQueryExpander>,
        reranker: Option<Arc<dyn Reranker>>,
        selector: SearchStrategySelector,
        budget: DocumentBudgetCalculator,
        floors: QualityFloors,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            searcher,
            expander,
            reranker,
            selector,
            budget,
            floors,
            config,
        }
    }

    /// Retrieve for every sub-query and merge.
    ///
    /// Backend failures in one domain degrade that domain to an empty result;
    /// the call errors only when every domain failed with nothing usable.
    pub async fn retrieve(
        &self,
        original_query: &str,
        sub_queries: &[SubQuery],
    ) -> Result<MergedRetrieval, RagError> {
        let (mode, recommended_k) = if self.config.enable_adaptive_search {
            let chars = self.selector.analyze(original_query);
            (self.selector.select_mode(&chars), self.selector.recommended_k(&chars))
        } else {
            (SearchMode::Hybrid, self.config.retrieval_k)
        };

        let domains: Vec<DomainLabel> = sub_queries.iter().map(|sq| sq.domain).collect();
        let budgets = self.budget.allocate(&domains, recommended_k);

        tracing::debug!(
            ?mode,
            recommended_k,
            domains = ?domains,
            "retrieval fan-out starting"
        );

        // Per-domain fan-out; each task writes its own result slot
        let tasks = sub_queries
            .iter()
            .zip(budgets.iter())
            .map(|(sq, budget)| self.retrieve_domain(sq, budget, mode));
        let mut per_domain: Vec<RetrievalResult> = join_all(tasks).await;

        let any_documents = per_domain.iter().any(|r| !r.documents.is_empty());
        let all_failed = per_domain
            .iter()
            .all(|r| r.evaluation.reason.contains("backend unavailable"));
        if !any_documents && all_failed {
            return Err(RagError::BackendUnavailable(
                "every domain retrieval failed".to_string(),
            ));
        }

        // Legal supplementation
        let legal_supplemented = if self.should_supplement(original_query, &domains) {
            match self.legal_supplement(original_query, &per_domain, mode).await {
                Some(result) => {
                    per_domain.push(result);
                    true
                }
                None => false,
            }
        } else {
            false
        };

        let (documents, evaluation) = self
            .merge(original_query, &per_domain, legal_supplemented)
            .await;

        Ok(MergedRetrieval {
            documents,
            per_domain,
            evaluation,
            legal_supplemented,
            mode,
            recommended_k,
        })
    }

    /// One domain's retrieval with graduated retry
    async fn retrieve_domain(
        &self,
        sub_query: &SubQuery,
        budget: &RetrievalBudget,
        mode: SearchMode,
    ) -> RetrievalResult {
        let start = Instant::now();
        let collection = sub_query.domain.as_collection();
        let mut k = budget.allocated_k;
        let mut floors = self.floors;
        let mut retry_levels = Vec::new();
        let mut backend_down = false;

        // Expansion runs on the first attempt too; the TTL cache makes the
        // level-2 reuse free
        let variants = if self.config.enable_multi_query {
            self.expander.expand(&sub_query.query).await
        } else {
            vec![sub_query.query.clone()]
        };
        let used_multi_query = variants.len() > 1;

        let mut documents = self
            .search_variants(&variants, collection, k, mode, &mut backend_down)
            .await;
        self.apply_noise_floor(&mut documents);
        let mut evaluation = RetrievalEvaluator::evaluate_with(&sub_query.query, &documents, &floors);

        if self.config.enable_graduated_retry {
            let mut level: u8 = 1;
            while evaluation.status != RetrievalStatus::Pass && level <= self.config.max_retry_level
            {
                let strategy = RetryLevel::for_level(level);
                tracing::debug!(
                    domain = %sub_query.domain,
                    level,
                    ?strategy,
                    reason = %evaluation.reason,
                    "graduated retry"
                );

                match strategy {
                    RetryLevel::RelaxParams => {
                        k += sodam_config::constants::quality::RELAX_K_DELTA;
                        floors = floors.relaxed();
                        let widened = self
                            .search_variants(&variants, collection, k, mode, &mut backend_down)
                            .await;
                        documents = union_best(documents, widened, k);
                    }
                    RetryLevel::MultiQueryStrong if self.config.enable_multi_query => {
                        // Cache hit from the first attempt, so this level
                        // re-searches without new LLM spend
                        let strong_variants = self.expander.expand(&sub_query.query).await;
                        let expanded = self
                            .search_variants(&strong_variants, collection, k, mode, &mut backend_down)
                            .await;
                        documents = union_best(documents, expanded, k);
                    }
                    RetryLevel::MultiQueryStrong => {}
                    RetryLevel::CrossDomain => {
                        for adjacent in sub_query.domain.adjacent() {
                            let neighbour = self
                                .search_variants(
                                    std::slice::from_ref(&sub_query.query),
                                    adjacent.as_collection(),
                                    k,
                                    mode,
                                    &mut backend_down,
                                )
                                .await;
                            documents = union_best(documents, neighbour, k);
                        }
                    }
                    RetryLevel::PartialAnswer => {}
                }

                self.apply_noise_floor(&mut documents);
                evaluation =
                    RetrievalEvaluator::evaluate_with(&sub_query.query, &documents, &floors);
                retry_levels.push(strategy);
                level += 1;
            }

            if evaluation.status != RetrievalStatus::Pass {
                // Accept the partial set; downstream sees NEEDS_RETRY
                retry_levels.push(RetryLevel::PartialAnswer);
            }
        }

        if backend_down && documents.is_empty() {
            evaluation.reason = format!("backend unavailable; {}", evaluation.reason);
        }

        // Stamp the source domain on documents that lack it (cross-domain
        // hits keep their own collection's label)
        for doc in &mut documents {
            if doc.document.domain().is_none() {
                doc.document.set_domain(sub_query.domain);
            }
        }

        RetrievalResult {
            domain: sub_query.domain,
            query: sub_query.query.clone(),
            documents,
            evaluation,
            used_multi_query,
            retry_levels,
            retrieve_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Search every query variant, union by content hash keeping the best
    /// score, truncate to k
    async fn search_variants(
        &self,
        variants: &[String],
        collection: &str,
        k: usize,
        mode: SearchMode,
        backend_down: &mut bool,
    ) -> Vec<ScoredDocument> {
        let mut merged: Vec<ScoredDocument> = Vec::new();
        for variant in variants {
            match self.searcher.search(variant, collection, k, mode).await {
                Ok(results) => {
                    merged = union_best(merged, results, usize::MAX);
                }
                Err(e) => {
                    *backend_down = true;
                    tracing::warn!(error = %e, collection, variant, "variant search failed");
                }
            }
        }
        sort_by_score(&mut merged);
        merged.truncate(k);
        merged
    }

    fn apply_noise_floor(&self, documents: &mut Vec<ScoredDocument>) {
        let floor = self.config.min_doc_embedding_similarity;
        documents.retain(|d| d.embedding_similarity.map_or(true, |s| s >= floor));
    }

    fn should_supplement(&self, original_query: &str, domains: &[DomainLabel]) -> bool {
        self.config.enable_legal_supplement
            && !domains.contains(&DomainLabel::LawCommon)
            && LegalTrigger::is_triggered(original_query)
    }

    /// Extra retrieval from the shared law collection, deduplicated against
    /// everything already retrieved
    async fn legal_supplement(
        &self,
        original_query: &str,
        per_domain: &[RetrievalResult],
        mode: SearchMode,
    ) -> Option<RetrievalResult> {
        let start = Instant::now();
        let collection = DomainLabel::LawCommon.as_collection();
        let mut documents = match self
            .searcher
            .search(original_query, collection, self.config.legal_supplement_k, mode)
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(error = %e, "legal supplementation failed, skipping");
                return None;
            }
        };

        let seen: std::collections::HashSet<String> = per_domain
            .iter()
            .flat_map(|r| r.documents.iter().map(|d| d.document.content_hash()))
            .collect();
        documents.retain(|d| !seen.contains(&d.document.content_hash()));

        if documents.is_empty() {
            return None;
        }
        for doc in &mut documents {
            if doc.document.domain().is_none() {
                doc.document.set_domain(DomainLabel::LawCommon);
            }
        }

        tracing::info!(count = documents.len(), "legal supplement attached");
        let evaluation =
            RetrievalEvaluator::evaluate_with(original_query, &documents, &self.floors);
        Some(RetrievalResult {
            domain: DomainLabel::LawCommon,
            query: original_query.to_string(),
            documents,
            evaluation,
            used_multi_query: false,
            retry_levels: Vec::new(),
            retrieve_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Cross-domain merge: per-domain min-max normalisation, content-hash
    /// dedup, priority/score interleave, optional rerank with one loosening
    /// pass when the merged set misses the floors.
    async fn merge(
        &self,
        original_query: &str,
        per_domain: &[RetrievalResult],
        legal_supplemented: bool,
    ) -> (Vec<ScoredDocument>, RetrievalEvaluation) {
        // Normalise scores within each domain; raw ranges are incomparable
        // across heterogeneous collections
        let mut pool: Vec<(usize, ScoredDocument)> = Vec::new();
        for (priority, result) in per_domain.iter().enumerate() {
            let (lo, hi) = result
                .documents
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), d| {
                    (lo.min(d.score), hi.max(d.score))
                });
            let range = hi - lo;
            for doc in &result.documents {
                let mut normalised = doc.clone();
                normalised.score = if range <= f32::EPSILON {
                    1.0
                } else {
                    (doc.score - lo) / range
                };
                pool.push((priority, normalised));
            }
        }

        // Dedup by content hash: best normalised score wins, priority breaks ties
        let mut best: HashMap<String, (usize, ScoredDocument)> = HashMap::new();
        for (priority, doc) in pool {
            let key = doc.document.content_hash();
            match best.get(&key) {
                Some((held_priority, held)) => {
                    let replace = doc.score > held.score
                        || (doc.score == held.score && priority < *held_priority);
                    if replace {
                        best.insert(key, (priority, doc));
                    }
                }
                None => {
                    best.insert(key, (priority, doc));
                }
            }
        }

        let mut merged: Vec<(usize, ScoredDocument)> = best.into_values().collect();
        // Deterministic order: score desc, then primary before secondary,
        // then stable content-hash key
        merged.sort_by(|(pa, a), (pb, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| pa.cmp(pb))
                .then_with(|| a.document.content_hash().cmp(&b.document.content_hash()))
        });
        let merged: Vec<ScoredDocument> = merged.into_iter().map(|(_, d)| d).collect();

        let cap = self.config.max_retrieval_docs
            + if legal_supplemented {
                self.config.legal_supplement_k
            } else {
                0
            };

        let multi_domain = per_domain.len() > 1;
        let mut final_docs =
            self.rerank_merged(original_query, &merged, self.config.cross_domain_rerank_ratio, multi_domain)
                .await;
        final_docs.truncate(cap);

        let mut evaluation =
            RetrievalEvaluator::evaluate_with(original_query, &final_docs, &self.floors);

        // One loosening pass only: widen the rerank ratio and re-merge
        if evaluation.status != RetrievalStatus::Pass
            && multi_domain
            && self.config.enable_cross_domain_rerank
        {
            let loosened = (self.config.cross_domain_rerank_ratio + 0.1).min(1.0);
            tracing::debug!(ratio = loosened, "merged set below floors, loosening rerank ratio");
            final_docs = self
                .rerank_merged(original_query, &merged, loosened, multi_domain)
                .await;
            final_docs.truncate(cap);
            evaluation =
                RetrievalEvaluator::evaluate_with(original_query, &final_docs, &self.floors);
        }

        if final_docs.is_empty() {
            evaluation.status = RetrievalStatus::Fail;
        }

        (final_docs, evaluation)
    }

    async fn rerank_merged(
        &self,
        original_query: &str,
        merged: &[ScoredDocument],
        ratio: f32,
        multi_domain: bool,
    ) -> Vec<ScoredDocument> {
        if !multi_domain || !self.config.enable_cross_domain_rerank || merged.len() <= 1 {
            return merged.to_vec();
        }
        let Some(reranker) = self.reranker.as_ref() else {
            return merged.to_vec();
        };

        let keep = ((merged.len() as f32) * ratio).ceil() as usize;
        match reranker.rerank(original_query, merged.to_vec(), keep.max(1)).await {
            Ok(reranked) => reranked,
            Err(e) => {
                tracing::warn!(error = %e, "cross-domain rerank failed, keeping interleaved order");
                merged.to_vec()
            }
        }
    }
}

/// Union two result sets by content hash keeping the best score per
/// document, ordered by score, truncated to `cap`
fn union_best(
    mut base: Vec<ScoredDocument>,
    additions: Vec<ScoredDocument>,
    cap: usize,
) -> Vec<ScoredDocument> {
    let mut index: HashMap<String, usize> = base
        .iter()
        .enumerate()
        .map(|(i, d)| (d.document.content_hash(), i))
        .collect();

    for addition in additions {
        let key = addition.document.content_hash();
        match index.get(&key) {
            Some(&i) => {
                if addition.score > base[i].score {
                    base[i].score = addition.score;
                }
                if let (Some(new), existing) =
                    (addition.embedding_similarity, &mut base[i].embedding_similarity)
                {
                    *existing = Some(existing.map_or(new, |old| old.max(new)));
                }
            }
            None => {
                index.insert(key, base.len());
                base.push(addition);
            }
        }
    }

    sort_by_score(&mut base);
    base.truncate(cap);
    base
}

fn sort_by_score(documents: &mut [ScoredDocument]) {
    documents.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document.content_hash().cmp(&b.document.content_hash()))
    });
}
