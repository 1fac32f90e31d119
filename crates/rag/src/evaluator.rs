//! Rule-based retrieval evaluation
//!
//! Cheap quality judgement over a retrieved set: document count, query-lemma
//! coverage, and mean normalised similarity against configured floors. The
//! verdict drives graduated retry; FAIL is reserved for an empty set after
//! all retries.

use serde::{Deserialize, Serialize};

use sodam_core::korean;

use crate::vector_store::ScoredDocument;

/// Evaluation verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetrievalStatus {
    Pass,
    NeedsRetry,
    Fail,
}

/// Evaluation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalEvaluation {
    pub status: RetrievalStatus,
    pub doc_count: usize,
    pub keyword_match_ratio: f32,
    pub avg_similarity: f32,
    pub reason: String,
}

/// Quality floors in force for one evaluation
#[derive(Debug, Clone, Copy)]
pub struct QualityFloors {
    pub min_doc_count: usize,
    pub min_keyword_match_ratio: f32,
    pub min_avg_similarity: f32,
}

impl QualityFloors {
    pub fn from_settings(quality: &sodam_config::QualityConfig) -> Self {
        Self {
            min_doc_count: quality.min_retrieval_doc_count,
            min_keyword_match_ratio: quality.min_keyword_match_ratio,
            min_avg_similarity: quality.min_avg_similarity_score,
        }
    }

    /// The lowered floors used at the RELAX_PARAMS retry level
    pub fn relaxed(&self) -> Self {
        use sodam_config::constants::quality;
        Self {
            min_doc_count: self.min_doc_count.min(1),
            min_keyword_match_ratio: quality::RELAXED_KEYWORD_MATCH_RATIO,
            min_avg_similarity: quality::RELAXED_AVG_SIMILARITY_SCORE,
        }
    }
}

/// Rule-based evaluator
#[derive(Debug, Clone)]
pub struct RetrievalEvaluator {
    floors: QualityFloors,
}

impl RetrievalEvaluator {
    pub fn new(floors: QualityFloors) -> Self {
        Self { floors }
    }

    pub fn floors(&self) -> QualityFloors {
        self.floors
    }

    /// Evaluate a retrieved set against the given floors
    pub fn evaluate_with(
        query: &str,
        documents: &[ScoredDocument],
        floors: &QualityFloors,
    ) -> RetrievalEvaluation {
        let doc_count = documents.len();

        if doc_count == 0 {
            return RetrievalEvaluation {
                status: RetrievalStatus::NeedsRetry,
                doc_count: 0,
                keyword_match_ratio: 0.0,
                avg_similarity: 0.0,
                reason: "no documents retrieved".to_string(),
            };
        }

        let lemmas = korean::extract_lemmas(query);
        let keyword_match_ratio = if lemmas.is_empty() {
            1.0
        } else {
            let hits = lemmas
                .iter()
                .filter(|lemma| {
                    documents
                        .iter()
                        .any(|d| d.document.content.contains(lemma.as_str()))
                })
                .count();
            hits as f32 / lemmas.len() as f32
        };

        let avg_similarity =
            documents.iter().map(|d| d.score).sum::<f32>() / doc_count as f32;

        let count_ok = doc_count >= floors.min_doc_count;
        let keywords_ok = keyword_match_ratio >= floors.min_keyword_match_ratio;
        let similarity_ok = avg_similarity >= floors.min_avg_similarity;

        let (status, reason) = if count_ok && keywords_ok && similarity_ok {
            (RetrievalStatus::Pass, "quality floors met".to_string())
        } else {
            let mut reasons = Vec::new();
            if !count_ok {
                reasons.push(format!("doc_count {} < {}", doc_count, floors.min_doc_count));
            }
            if !keywords_ok {
                reasons.push(format!(
                    "keyword_match_ratio {:.2} < {:.2}",
                    keyword_match_ratio, floors.min_keyword_match_ratio
                ));
            }
            if !similarity_ok {
                reasons.push(format!(
                    "avg_similarity {:.2} < {:.2}",
                    avg_similarity, floors.min_avg_similarity
                ));
            }
            (RetrievalStatus::NeedsRetry, reasons.join("; "))
        };

        RetrievalEvaluation {
            status,
            doc_count,
            keyword_match_ratio,
            avg_similarity,
            reason,
        }
    }

    pub fn evaluate(&self, query: &str, documents: &[ScoredDocument]) -> RetrievalEvaluation {
        Self::evaluate_with(query, documents, &self.floors)
    }
}
