//! Adaptive search strategy selection
//!
//! Derives [`QueryCharacteristics`] from the query text alone (no LLM) and
//! maps them to a [`SearchMode`] plus a recommended per-domain k.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use sodam_config::QueryAnalysisThresholds;
use sodam_core::korean;

/// Matches statute citations like `제26조`, `제 55 조`
static ARTICLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"제\s*(\d+)\s*조").expect("article regex"));

/// Factual-question markers: deadlines, amounts, dates, counts
const FACTUAL_MARKERS: &[&str] = &[
    "언제", "기한", "얼마", "몇", "며칠", "날짜", "금액", "비용", "이자율", "세율", "어디서",
];

/// Search execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
    /// Balanced dense + sparse fusion
    Hybrid,
    /// Dense-dominant fusion for vague or conversational queries
    VectorHeavy,
    /// Sparse-dominant fusion for keyword-dense queries
    Bm25Heavy,
    /// Diversified selection for broad multi-facet questions
    MmrDiverse,
    /// Exact statute-token boost ahead of dense search
    ExactPlusVector,
}

impl SearchMode {
    /// Vector-side fusion weight; `base` is the configured hybrid weight
    pub fn vector_weight(&self, base: f32) -> f32 {
        match self {
            SearchMode::Hybrid | SearchMode::MmrDiverse | SearchMode::ExactPlusVector => base,
            SearchMode::VectorHeavy => 0.9,
            SearchMode::Bm25Heavy => 0.3,
        }
    }
}

/// Cheap text-derived features of a query
#[derive(Debug, Clone)]
pub struct QueryCharacteristics {
    pub length_chars: usize,
    pub word_count: usize,
    /// Content-lemma fraction of the word count
    pub keyword_density: f32,
    /// Normalised cited article token (`제26조`), when present
    pub cites_article: Option<String>,
    pub is_factual: bool,
    pub is_complex: bool,
    pub is_ambiguous: bool,
}

/// Computes characteristics and picks a mode and k
pub struct SearchStrategySelector {
    thresholds: QueryAnalysisThresholds,
    dynamic_k_min: usize,
    dynamic_k_max: usize,
}

impl SearchStrategySelector {
    pub fn new(
        thresholds: QueryAnalysisThresholds,
        dynamic_k_min: usize,
        dynamic_k_max: usize,
    ) -> Self {
        Self {
            thresholds,
            dynamic_k_min,
            dynamic_k_max,
        }
    }

    /// Extract the first cited article as a normalised token
    pub fn cited_article(query: &str) -> Option<String> {
        ARTICLE_RE
            .captures(query)
            .map(|caps| format!("제{}조", &caps[1]))
    }

    pub fn analyze(&self, query: &str) -> QueryCharacteristics {
        let length_chars = query.chars().count();
        let words = korean::tokenize(query);
        let word_count = words.len();
        let lemmas = korean::extract_lemmas(query);
        let keyword_density = if word_count == 0 {
            0.0
        } else {
            lemmas.len() as f32 / word_count as f32
        };

        let cites_article = Self::cited_article(query);
        let is_factual = FACTUAL_MARKERS.iter().any(|m| query.contains(m));

        // Conjoined noun phrases ("방법과 초기 세무 처리") signal multi-part
        // questions well before raw length does
        let has_conjunction = query.contains("그리고")
            || query.contains("및")
            || query.contains(',')
            || words
                .iter()
                .any(|w| w.chars().count() > 2 && (w.ends_with('과') || w.ends_with('와')));
        let is_complex = word_count >= self.thresholds.complex_word_count
            || length_chars >= self.thresholds.long_query_chars
            || has_conjunction;

        let is_ambiguous = word_count <= self.thresholds.ambiguous_word_count;

        QueryCharacteristics {
            length_chars,
            word_count,
            keyword_density,
            cites_article,
            is_factual,
            is_complex,
            is_ambiguous,
        }
    }

    /// Pick the search mode for a set of characteristics
    pub fn select_mode(&self, chars: &QueryCharacteristics) -> SearchMode {
        if chars.cites_article.is_some() {
            return SearchMode::ExactPlusVector;
        }
        if chars.is_complex && !chars.is_ambiguous {
            return SearchMode::MmrDiverse;
        }
        if chars.keyword_density >= self.thresholds.high_keyword_density && !chars.is_ambiguous {
            return SearchMode::Bm25Heavy;
        }
        if chars.is_ambiguous {
            return SearchMode::VectorHeavy;
        }
        SearchMode::Hybrid
    }

    /// Recommended per-domain k within [dynamic_k_min, dynamic_k_max]
    pub fn recommended_k(&self, chars: &QueryCharacteristics) -> usize {
        let mid = (self.dynamic_k_min + self.dynamic_k_max) / 2;
        let k = if chars.is_complex {
            self.dynamic_k_max
        } else if chars.is_factual {
            // Narrow factual lookups need few, precise documents
            self.dynamic_k_min
        } else if chars.is_ambiguous {
            self.dynamic_k_min + 1
        } else {
            mid
        };
        k.clamp(self.dynamic_k_min, self.dynamic_k_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> SearchStrategySelector {
        SearchStrategySelector::new(QueryAnalysisThresholds::default(), 3, 8)
    }

    #[test]
    fn test_article_citation_detection() {
        assert_eq!(
            SearchStrategySelector::cited_article("근로기준법 제 26 조의 해고 예고"),
            Some("제26조".to_string())
        );
        assert_eq!(SearchStrategySelector::cited_article("해고 예고 기간"), None);
    }

    #[test]
    fn test_cited_article_forces_exact_mode() {
        let s = selector();
        let chars = s.analyze("근로기준법 제26조 내용이 뭔가요?");
        assert_eq!(s.select_mode(&chars), SearchMode::ExactPlusVector);
    }

    #[test]
    fn test_conjoined_question_is_complex() {
        let s = selector();
        let chars = s.analyze("창업하려는데 사업자등록 방법과 초기 세무 처리 알려주세요");
        assert!(chars.is_complex);
        assert_eq!(s.select_mode(&chars), SearchMode::MmrDiverse);
        assert_eq!(s.recommended_k(&chars), 8);
    }

    #[test]
    fn test_short_vague_query_goes_vector_heavy() {
        let s = selector();
        let chars = s.analyze("창업 지원");
        assert!(chars.is_ambiguous);
        assert_eq!(s.select_mode(&chars), SearchMode::VectorHeavy);
    }

    #[test]
    fn test_factual_query_narrows_k() {
        let s = selector();
        let chars = s.analyze("부가세 신고 기한이 언제인가요?");
        assert!(chars.is_factual);
        assert!(!chars.is_complex);
        assert_eq!(s.recommended_k(&chars), 3);
    }

    #[test]
    fn test_mode_vector_weights() {
        assert_eq!(SearchMode::Hybrid.vector_weight(0.7), 0.7);
        assert_eq!(SearchMode::VectorHeavy.vector_weight(0.7), 0.9);
        assert_eq!(SearchMode::Bm25Heavy.vector_weight(0.7), 0.3);
    }

    #[test]
    fn test_single_char_query_does_not_crash() {
        let s = selector();
        let chars = s.analyze("세");
        assert_eq!(chars.word_count, 1);
        assert!(chars.is_ambiguous);
        let _ = s.select_mode(&chars);
        let _ = s.recommended_k(&chars);
    }
}
