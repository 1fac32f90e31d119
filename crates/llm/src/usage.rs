//! Request-scoped token accounting
//!
//! A `UsageMeter` is created per request by the pipeline router and a clone
//! handed to every stage that talks to the LLM. Counters are atomic; there
//! is no process-wide accumulator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::GenerationResult;

#[derive(Debug, Default)]
struct Inner {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    llm_calls: AtomicU64,
}

/// Cloneable handle to one request's token counters
#[derive(Debug, Clone, Default)]
pub struct UsageMeter {
    inner: Arc<Inner>,
}

/// Point-in-time usage reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct UsageSnapshot {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub llm_calls: u64,
}

impl UsageSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one generation's reported usage
    pub fn record(&self, result: &GenerationResult) {
        self.inner
            .prompt_tokens
            .fetch_add(result.prompt_tokens as u64, Ordering::Relaxed);
        self.inner
            .completion_tokens
            .fetch_add(result.completion_tokens as u64, Ordering::Relaxed);
        self.inner.llm_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            prompt_tokens: self.inner.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.inner.completion_tokens.load(Ordering::Relaxed),
            llm_calls: self.inner.llm_calls.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FinishReason;

    fn result(prompt: usize, completion: usize) -> GenerationResult {
        GenerationResult {
            text: String::new(),
            prompt_tokens: prompt,
            completion_tokens: completion,
            time_to_first_token_ms: 0,
            total_time_ms: 0,
            finish_reason: FinishReason::Stop,
        }
    }

    #[test]
    fn test_meter_accumulates_across_clones() {
        let meter = UsageMeter::new();
        let clone = meter.clone();
        meter.record(&result(100, 40));
        clone.record(&result(50, 10));

        let snap = meter.snapshot();
        assert_eq!(snap.prompt_tokens, 150);
        assert_eq!(snap.completion_tokens, 50);
        assert_eq!(snap.llm_calls, 2);
        assert_eq!(snap.total_tokens(), 200);
    }

    #[test]
    fn test_meters_are_independent_per_request() {
        let a = UsageMeter::new();
        let b = UsageMeter::new();
        a.record(&result(10, 10));
        assert_eq!(b.snapshot().llm_calls, 0);
    }
}
