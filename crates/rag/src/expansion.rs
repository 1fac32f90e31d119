//! Multi-query expansion
//!
//! LLM-generated paraphrases widen recall for sparse corners of the corpus.
//! Expansions are cached by query hash with a TTL so graduated-retry levels
//! within one request (and repeat questions across requests) never pay for
//! the same expansion twice. LLM failure degrades to the original query.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sodam_core::korean;
use sodam_llm::{GenerateOptions, LlmBackend, Message};

/// Expansion configuration
#[derive(Debug, Clone)]
pub struct MultiQueryConfig {
    /// Paraphrases requested per expansion
    pub count: usize,
    /// Cache entry lifetime
    pub ttl: Duration,
}

impl Default for MultiQueryConfig {
    fn default() -> Self {
        Self {
            count: sodam_config::constants::retrieval::MULTI_QUERY_COUNT,
            ttl: Duration::from_secs(600),
        }
    }
}

struct CacheEntry {
    created: Instant,
    variants: Vec<String>,
}

/// LLM-backed query expander with a TTL cache
pub struct MultiQueryExpander {
    llm: Arc<dyn LlmBackend>,
    config: MultiQueryConfig,
    cache: Mutex<HashMap<u64, CacheEntry>>,
}

impl MultiQueryExpander {
    pub fn new(llm: Arc<dyn LlmBackend>, config: MultiQueryConfig) -> Self {
        Self {
            llm,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(query: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        korean::normalize_query(query).hash(&mut hasher);
        hasher.finish()
    }

    fn expansion_prompt(&self, query: &str) -> Vec<Message> {
        let system = "당신은 한국 소상공인 상담 검색 시스템의 질의 확장기입니다. \
                      사용자 질문을 검색 관점이 다른 질문으로 바꿔 쓰세요. \
                      세 가지 전략을 모두 사용하세요: \
                      (1) 핵심 키워드를 동의어나 실무 용어로 치환, \
                      (2) 질문 범위를 넓히거나 좁히기, \
                      (3) 관련된 구체적인 법령명이나 제도명으로 연결. \
                      각 질문은 한 줄에 하나씩, 번호를 붙여 출력하세요. 설명은 쓰지 마세요.";
        let user = format!(
            "원래 질문: {}\n\n서로 다른 검색 질문 {}개를 생성하세요.",
            query, self.config.count
        );
        vec![Message::system(system), Message::user(user)]
    }

    fn parse_variants(&self, query: &str, text: &str) -> Vec<String> {
        let normalized_original = korean::normalize_query(query);
        let mut variants = Vec::new();
        for line in text.lines() {
            let cleaned = line
                .trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '-')
                .trim();
            if cleaned.is_empty() {
                continue;
            }
            if korean::normalize_query(cleaned) == normalized_original {
                continue;
            }
            if variants.iter().any(|v: &String| v == cleaned) {
                continue;
            }
            variants.push(cleaned.to_string());
            if variants.len() >= self.config.count {
                break;
            }
        }
        variants
    }

    /// Expand a query. Returns the original first, then up to `count`
    /// paraphrases; on any LLM failure just the original.
    pub async fn expand(&self, query: &str) -> Vec<String> {
        let key = Self::cache_key(query);

        if let Some(cached) = self.cached_variants(key) {
            tracing::debug!(query, "multi-query expansion cache hit");
            return std::iter::once(query.to_string()).chain(cached).collect();
        }

        let messages = self.expansion_prompt(query);
        let variants = match self
            .llm
            .generate(&messages, GenerateOptions { temperature: Some(0.7), max_tokens: Some(300) })
            .await
        {
            Ok(result) => self.parse_variants(query, &result.text),
            Err(e) => {
                tracing::warn!(error = %e, "query expansion failed, using original query only");
                Vec::new()
            }
        };

        if !variants.is_empty() {
            self.cache.lock().insert(
                key,
                CacheEntry {
                    created: Instant::now(),
                    variants: variants.clone(),
                },
            );
        }

        std::iter::once(query.to_string()).chain(variants).collect()
    }

    /// Cached paraphrases for a query, if fresh
    pub fn cached(&self, query: &str) -> Option<Vec<String>> {
        self.cached_variants(Self::cache_key(query))
    }

    fn cached_variants(&self, key: u64) -> Option<Vec<String>> {
        let mut cache = self.cache.lock();
        match cache.get(&key) {
            Some(entry) if entry.created.elapsed() < self.config.ttl => {
                Some(entry.variants.clone())
            }
            Some(_) => {
                cache.remove(&key);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sodam_llm::testing::ScriptedLlm;
    use sodam_llm::LlmError;

    fn expander(llm: ScriptedLlm) -> MultiQueryExpander {
        MultiQueryExpander::new(Arc::new(llm), MultiQueryConfig::default())
    }

    #[tokio::test]
    async fn test_expansion_includes_original_first() {
        let llm = ScriptedLlm::new("1. 부가세 신고 방법\n2. 부가가치세법 신고 납부 기한\n3. 세금 신고 일정");
        let expander = expander(llm);
        let variants = expander.expand("부가세 신고 기한이 언제인가요?").await;
        assert_eq!(variants[0], "부가세 신고 기한이 언제인가요?");
        assert_eq!(variants.len(), 4);
    }

    #[tokio::test]
    async fn test_expansion_caches_by_query() {
        let llm = ScriptedLlm::new("1. 변형 하나\n2. 변형 둘\n3. 변형 셋");
        let expander = expander(llm);
        let first = expander.expand("질문").await;
        let second = expander.expand("질문").await;
        assert_eq!(first, second);
        assert!(expander.cached("질문").is_some());
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_original() {
        let llm = ScriptedLlm::new("unused").with_failure(LlmError::Timeout);
        let expander = expander(llm);
        let variants = expander.expand("해고 절차").await;
        assert_eq!(variants, vec!["해고 절차".to_string()]);
        // A failure is not cached
        assert!(expander.cached("해고 절차").is_none());
    }

    #[tokio::test]
    async fn test_parse_skips_echoes_of_original() {
        let llm = ScriptedLlm::new("1. 퇴직금 계산\n2. 퇴직금 산정 기준");
        let expander = expander(llm);
        let variants = expander.expand("퇴직금 계산").await;
        // The echoed original is dropped from variants
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[1], "퇴직금 산정 기준");
    }
}
