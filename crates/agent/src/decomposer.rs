//! Question decomposition
//!
//! Multi-domain questions are split into one self-contained sub-question per
//! domain, with pronouns resolved against recent history. Output is strictly
//! validated; anything malformed falls back to per-domain copies of the
//! original question. Results are LRU-cached.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

use sodam_core::korean;
use sodam_core::{ChatTurn, DomainLabel, SubQuery};
use sodam_llm::{GenerateOptions, LlmBackend, Message};

/// Sub-questions longer than this are considered malformed
const MAX_SUBQUERY_CHARS: usize = 300;
/// History turns included in the decomposition prompt
const HISTORY_WINDOW: usize = 4;
const CACHE_CAPACITY: usize = 256;

/// LLM-backed question decomposer
pub struct QuestionDecomposer {
    llm: Arc<dyn LlmBackend>,
    cache: Mutex<LruCache<u64, Vec<SubQuery>>>,
}

impl QuestionDecomposer {
    pub fn new(llm: Arc<dyn LlmBackend>) -> Self {
        Self {
            llm,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero cache capacity"),
            )),
        }
    }

    /// Decompose a query over its classified domains. Single-domain requests
    /// return exactly one SubQuery equal to the original.
    pub async fn decompose(
        &self,
        query: &str,
        domains: &[DomainLabel],
        history: &[ChatTurn],
    ) -> Vec<SubQuery> {
        if domains.len() <= 1 {
            let domain = domains.first().copied().unwrap_or(DomainLabel::StartupFunding);
            return vec![SubQuery::new(domain, query)];
        }

        let key = cache_key(query, domains, history);
        if let Some(cached) = self.cache.lock().get(&key) {
            tracing::debug!(query, "decomposition cache hit");
            return cached.clone();
        }

        let sub_queries = match self.decompose_llm(query, domains, history).await {
            Some(sub_queries) => sub_queries,
            None => {
                tracing::warn!(query, "decomposition failed validation, using per-domain copies");
                domains
                    .iter()
                    .map(|&d| SubQuery::new(d, query))
                    .collect()
            }
        };

        self.cache.lock().put(key, sub_queries.clone());
        sub_queries
    }

    async fn decompose_llm(
        &self,
        query: &str,
        domains: &[DomainLabel],
        history: &[ChatTurn],
    ) -> Option<Vec<SubQuery>> {
        let domain_list = domains
            .iter()
            .map(|d| format!("{} ({})", d.as_collection(), d.display_ko()))
            .collect::<Vec<_>>()
            .join(", ");

        let mut prompt = String::new();
        if !history.is_empty() {
            prompt.push_str("최근 대화:\n");
            for turn in history.iter().rev().take(HISTORY_WINDOW).rev() {
                let role = match turn.role {
                    sodam_core::ChatRole::User => "사용자",
                    sodam_core::ChatRole::Assistant => "상담사",
                };
                prompt.push_str(&format!("{}: {}\n", role, turn.content));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "질문: {}\n분야: {}\n\n분야마다 그 분야에 해당하는 부분만 담은 \
             독립적인 질문 하나를 만드세요. 대명사와 생략된 주어는 대화 내용으로 \
             복원하세요. JSON만 출력: {{\"분야키\": \"질문\"}}",
            query, domain_list
        ));

        let messages = [
            Message::system(
                "당신은 복합 상담 질문을 분야별 하위 질문으로 분해합니다. \
                 각 하위 질문은 맥락 없이 읽어도 완전해야 합니다.",
            ),
            Message::user(prompt),
        ];

        let result = self
            .llm
            .generate(
                &messages,
                GenerateOptions {
                    temperature: Some(0.0),
                    max_tokens: Some(400),
                },
            )
            .await
            .ok()?;

        parse_decomposition(&result.text, domains)
    }
}

/// Validate the LLM output: exactly one non-empty, bounded entry per domain
fn parse_decomposition(text: &str, domains: &[DomainLabel]) -> Option<Vec<SubQuery>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let map: std::collections::HashMap<String, String> =
        serde_json::from_str(&text[start..=end]).ok()?;

    let mut sub_queries = Vec::with_capacity(domains.len());
    for &domain in domains {
        let sub = map.get(domain.as_collection())?;
        let trimmed = sub.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_SUBQUERY_CHARS {
            return None;
        }
        sub_queries.push(SubQuery::new(domain, trimmed));
    }
    Some(sub_queries)
}

fn cache_key(query: &str, domains: &[DomainLabel], history: &[ChatTurn]) -> u64 {
    let mut hasher = DefaultHasher::new();
    korean::normalize_query(query).hash(&mut hasher);
    let mut sorted: Vec<&str> = domains.iter().map(|d| d.as_collection()).collect();
    sorted.sort_unstable();
    sorted.hash(&mut hasher);
    for turn in history.iter().rev().take(HISTORY_WINDOW) {
        turn.content.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sodam_core::ChatRole;
    use sodam_llm::testing::ScriptedLlm;
    use sodam_llm::LlmError;

    const TWO_DOMAINS: [DomainLabel; 2] = [DomainLabel::StartupFunding, DomainLabel::FinanceTax];

    #[tokio::test]
    async fn test_single_domain_is_identity() {
        let decomposer = QuestionDecomposer::new(Arc::new(ScriptedLlm::new("ignored")));
        let subs = decomposer
            .decompose("부가세 신고", &[DomainLabel::FinanceTax], &[])
            .await;
        assert_eq!(
            subs,
            vec![SubQuery::new(DomainLabel::FinanceTax, "부가세 신고")]
        );
    }

    #[tokio::test]
    async fn test_multi_domain_decomposition() {
        let llm = ScriptedLlm::new(
            "{\"startup_funding\": \"사업자등록 절차가 어떻게 되나요?\", \
             \"finance_tax\": \"창업 초기 세무 처리는 어떻게 하나요?\"}",
        );
        let decomposer = QuestionDecomposer::new(Arc::new(llm));
        let subs = decomposer
            .decompose(
                "창업하려는데 사업자등록 방법과 초기 세무 처리 알려주세요",
                &TWO_DOMAINS,
                &[],
            )
            .await;
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].domain, DomainLabel::StartupFunding);
        assert!(subs[0].query.contains("사업자등록"));
        assert_eq!(subs[1].domain, DomainLabel::FinanceTax);
        assert!(subs[1].query.contains("세무"));
    }

    #[tokio::test]
    async fn test_missing_domain_falls_back_to_copies() {
        // Response covers only one of two domains
        let llm = ScriptedLlm::new("{\"startup_funding\": \"질문\"}");
        let decomposer = QuestionDecomposer::new(Arc::new(llm));
        let subs = decomposer.decompose("복합 질문", &TWO_DOMAINS, &[]).await;
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.query == "복합 질문"));
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_copies() {
        let llm = ScriptedLlm::new("unused").with_failure(LlmError::Timeout);
        let decomposer = QuestionDecomposer::new(Arc::new(llm));
        let subs = decomposer.decompose("복합 질문", &TWO_DOMAINS, &[]).await;
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.query == "복합 질문"));
    }

    #[tokio::test]
    async fn test_decomposition_is_cached() {
        let llm = ScriptedLlm::new(
            "{\"startup_funding\": \"하위 질문 A\", \"finance_tax\": \"하위 질문 B\"}",
        );
        let decomposer = QuestionDecomposer::new(Arc::new(llm));
        let first = decomposer.decompose("복합 질문", &TWO_DOMAINS, &[]).await;
        let second = decomposer.decompose("복합 질문", &TWO_DOMAINS, &[]).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_history_changes_cache_key() {
        let history = vec![ChatTurn {
            role: ChatRole::User,
            content: "저는 카페를 운영합니다".to_string(),
        }];
        let a = cache_key("그건 어떻게 하나요", &TWO_DOMAINS, &[]);
        let b = cache_key("그건 어떻게 하나요", &TWO_DOMAINS, &history);
        assert_ne!(a, b);
    }
}
