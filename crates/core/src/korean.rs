//! Korean text utilities
//!
//! Lightweight lemma extraction used by keyword classification, query
//! analysis, and retrieval quality scoring. Particles and frequent verbal
//! endings are stripped by longest-suffix match; this approximates
//! morphological analysis well enough for keyword matching and keeps the
//! pipeline free of an analyser dependency. Swap point: `extract_lemmas`.

use std::collections::HashSet;

use once_cell::sync::Lazy;

/// Josa and auxiliary particles stripped from word ends, longest first
const PARTICLES: &[&str] = &[
    "에서는", "에게서", "으로는", "으로서", "으로써", "이라도", "까지는", "부터는", "하고는",
    "에서", "에게", "께서", "으로", "이나", "이면", "라도", "부터", "까지", "처럼", "보다",
    "마다", "조차", "밖에", "은", "는", "이", "가", "을", "를", "에", "의", "도", "만", "와",
    "과", "로", "나", "요",
];

/// Frequent verbal/adjectival endings on advisory-style questions
const ENDINGS: &[&str] = &[
    "하려고 하는데", "하려고 합니다", "해야 하나요", "하는 방법", "하려는데", "했는데요",
    "인가요", "일까요", "할까요", "했나요", "하나요", "합니다", "입니다", "하세요", "해주세요",
    "하는지", "인지", "하기", "하는", "해야", "하면", "했던", "하다",
];

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "그리고", "그래서", "하지만", "그런데", "또한", "및", "등", "좀", "어떤", "어떻게",
        "무엇", "뭐", "저희", "우리", "제가", "저는", "경우", "관련", "대해", "대한", "있는",
        "없는", "같은", "이런", "저런", "그런", "모든", "아주", "매우", "너무",
    ]
    .into_iter()
    .collect()
});

/// Split on whitespace and trim surrounding punctuation
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| {
                c.is_ascii_punctuation() || matches!(c, '?' | '!' | '。' | '、' | '·')
            })
            .to_string()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Strip one particle or ending suffix when enough stem remains
fn strip_suffix(word: &str) -> String {
    let char_count = word.chars().count();
    for suffix in ENDINGS.iter().chain(PARTICLES.iter()) {
        let suffix_chars = suffix.chars().count();
        if char_count > suffix_chars + 1 {
            if let Some(stem) = word.strip_suffix(suffix) {
                return stem.to_string();
            }
        }
    }
    word.to_string()
}

/// Lemma-ish content tokens: tokenized, suffix-stripped, stopword-filtered,
/// minimum two characters. Order preserved, duplicates removed.
pub fn extract_lemmas(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut lemmas = Vec::new();
    for token in tokenize(text) {
        let stem = strip_suffix(&token);
        if stem.chars().count() < 2 || STOPWORDS.contains(stem.as_str()) {
            continue;
        }
        if seen.insert(stem.clone()) {
            lemmas.push(stem);
        }
    }
    lemmas
}

/// Canonical form used for cache fingerprints: trimmed, whitespace
/// collapsed, Latin letters lowercased.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_particle_stripping() {
        let lemmas = extract_lemmas("부가세는 언제까지 신고해야 하나요?");
        assert!(lemmas.contains(&"부가세".to_string()));
        assert!(lemmas.contains(&"신고".to_string()));
    }

    #[test]
    fn test_short_words_survive_when_no_stem_left() {
        // 해고 ends in 고, not a particle; must not be mangled
        let lemmas = extract_lemmas("직원 해고 절차");
        assert_eq!(lemmas, vec!["직원", "해고", "절차"]);
    }

    #[test]
    fn test_stopwords_dropped() {
        let lemmas = extract_lemmas("그리고 퇴직금 및 연차수당");
        assert!(!lemmas.iter().any(|l| l == "그리고"));
        assert!(lemmas.contains(&"퇴직금".to_string()));
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  VAT   신고  기한 "), "vat 신고 기한");
    }
}
