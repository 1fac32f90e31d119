//! Response cache
//!
//! LRU with per-entry TTL. Keys are sha256 over the engaged domains, the
//! normalised query, and the user-context fingerprint. TTL varies by
//! primary domain: funding answers expire fast, statutes slowly. Streamed
//! responses are never cached.

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use sodam_config::CacheConfig;
use sodam_core::korean;
use sodam_core::{DomainLabel, QueryResponse, UserContext};

struct Entry {
    response: QueryResponse,
    expires_at: Instant,
}

/// Synchronised LRU+TTL response cache
pub struct ResponseCache {
    entries: Mutex<LruCache<String, Entry>>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_max_size.max(1)).expect("nonzero capacity");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            config,
        }
    }

    /// Cache key over the answer-shaping inputs
    pub fn key(
        domains: &[DomainLabel],
        query: &str,
        user_context: Option<&UserContext>,
    ) -> String {
        let mut hasher = Sha256::new();
        for domain in domains {
            hasher.update(domain.as_collection().as_bytes());
            hasher.update(b"|");
        }
        hasher.update(korean::normalize_query(query).as_bytes());
        hasher.update(b"|");
        if let Some(ctx) = user_context {
            hasher.update(ctx.fingerprint().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<QueryResponse> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.response.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Insert a response. TTL comes from the primary domain's override or
    /// the default.
    pub fn put(&self, key: String, response: QueryResponse, primary: Option<DomainLabel>) {
        let ttl_secs = primary
            .map(|d| self.config.ttl_for(d.as_collection()))
            .unwrap_or(self.config.cache_ttl);
        let entry = Entry {
            response,
            expires_at: Instant::now() + Duration::from_secs(ttl_secs),
        };
        self.entries.lock().put(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str) -> QueryResponse {
        let mut r = QueryResponse::empty(&[DomainLabel::FinanceTax]);
        r.content = content.to_string();
        r
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = ResponseCache::new(CacheConfig::default());
        let key = ResponseCache::key(&[DomainLabel::FinanceTax], "부가세 신고 기한", None);
        cache.put(key.clone(), response("1월 25일"), Some(DomainLabel::FinanceTax));
        assert_eq!(cache.get(&key).unwrap().content, "1월 25일");
    }

    #[test]
    fn test_key_depends_on_domains_query_and_context() {
        let base = ResponseCache::key(&[DomainLabel::FinanceTax], "부가세 신고", None);

        let other_domain = ResponseCache::key(&[DomainLabel::HrLabor], "부가세 신고", None);
        assert_ne!(base, other_domain);

        let other_query = ResponseCache::key(&[DomainLabel::FinanceTax], "법인세 신고", None);
        assert_ne!(base, other_query);

        let ctx = UserContext {
            user_id: None,
            user_type: Some(sodam_core::UserType::SmeOwner),
            company: None,
        };
        let with_ctx = ResponseCache::key(&[DomainLabel::FinanceTax], "부가세 신고", Some(&ctx));
        assert_ne!(base, with_ctx);

        // Whitespace-normalised queries collide on purpose
        let spaced = ResponseCache::key(&[DomainLabel::FinanceTax], "  부가세   신고 ", None);
        assert_eq!(base, spaced);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let config = CacheConfig {
            cache_ttl: 0,
            cache_ttl_by_domain: Default::default(),
            ..CacheConfig::default()
        };
        let cache = ResponseCache::new(config);
        let key = ResponseCache::key(&[DomainLabel::FinanceTax], "질문", None);
        cache.put(key.clone(), response("답"), None);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let config = CacheConfig {
            cache_max_size: 2,
            ..CacheConfig::default()
        };
        let cache = ResponseCache::new(config);
        for i in 0..3 {
            cache.put(format!("k{}", i), response(&format!("v{}", i)), None);
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k2").is_some());
    }
}
