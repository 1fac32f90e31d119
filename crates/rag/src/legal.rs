//! Legal supplementation trigger
//!
//! Detects statute-adjacent questions: a statute-name suffix (`~법`) or a
//! curated legal keyword. The orchestrator then pulls extra documents from
//! the shared law collection.

use once_cell::sync::Lazy;
use regex::Regex;

use sodam_core::korean;

/// A statute name: Hangul syllables ending in 법, checked per lemma so
/// particle-attached forms (`상법에`, `근로기준법상`) still match
static STATUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[가-힣]{1,15}법$").expect("statute regex"));

/// Curated keywords that signal a legal angle without naming a statute
const LEGAL_KEYWORDS: &[&str] = &[
    "소송", "판례", "법적 절차", "법적절차", "법률", "변호사", "법원", "고소", "고발",
    "손해배상", "계약 위반", "법적 책임", "과태료", "벌금", "처벌",
];

/// Matches queries that warrant supplementation from the law collection
#[derive(Debug, Clone, Default)]
pub struct LegalTrigger;

impl LegalTrigger {
    /// Terms that fired, empty when the query has no legal signal
    pub fn matches(query: &str) -> Vec<String> {
        let mut matched = Vec::new();

        for lemma in korean::extract_lemmas(query) {
            // 방법/해법 and friends end in 법 without naming a statute
            if STATUTE_RE.is_match(&lemma)
                && !matches!(lemma.as_str(), "방법" | "해법" | "기법" | "요법" | "편법")
            {
                matched.push(lemma);
            }
        }

        for keyword in LEGAL_KEYWORDS {
            if query.contains(keyword) {
                matched.push((*keyword).to_string());
            }
        }

        matched
    }

    pub fn is_triggered(query: &str) -> bool {
        !Self::matches(query).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statute_suffix_triggers() {
        assert!(LegalTrigger::is_triggered("근로기준법 위반인가요"));
        assert!(LegalTrigger::is_triggered("상법에 따른 이사 책임"));
    }

    #[test]
    fn test_method_words_do_not_trigger() {
        assert!(!LegalTrigger::is_triggered("부가세 신고 방법 알려주세요"));
        assert!(!LegalTrigger::is_triggered("절세 기법 문의"));
    }

    #[test]
    fn test_curated_keywords_trigger() {
        let matched = LegalTrigger::matches("직원 해고 시 법적 절차와 퇴직금 계산");
        assert!(matched.iter().any(|m| m == "법적 절차"));
    }

    #[test]
    fn test_plain_business_question_does_not_trigger() {
        assert!(!LegalTrigger::is_triggered("창업 지원금 신청 일정"));
    }
}
