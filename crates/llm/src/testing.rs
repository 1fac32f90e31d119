//! Scripted LLM backend for tests
//!
//! Deterministic stand-in used across the workspace's test suites. Responses
//! are matched by substring of the last user message, with an optional
//! failure budget to exercise retry paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::mpsc;

use crate::backend::{FinishReason, GenerateOptions, GenerationResult, LlmBackend};
use crate::prompt::{Message, Role};
use crate::LlmError;

/// Scripted backend: substring rules plus a default response.
pub struct ScriptedLlm {
    rules: Vec<(String, String)>,
    default_response: String,
    /// Errors served before any success, front first
    failures: Mutex<VecDeque<LlmError>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(default_response: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_response: default_response.into(),
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Respond with `response` when the last user message contains `needle`
    pub fn with_rule(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((needle.into(), response.into()));
        self
    }

    /// Queue an error to be returned before any successful response
    pub fn with_failure(self, error: LlmError) -> Self {
        self.failures.lock().push_back(error);
        self
    }

    /// Prompts seen so far (last user message per call)
    pub fn seen_prompts(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn respond(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.calls.lock().push(last_user.clone());

        for (needle, response) in &self.rules {
            if last_user.contains(needle.as_str()) {
                return Ok(response.clone());
            }
        }
        Ok(self.default_response.clone())
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn generate(
        &self,
        messages: &[Message],
        _opts: GenerateOptions,
    ) -> Result<GenerationResult, LlmError> {
        let text = self.respond(messages)?;
        let completion_tokens = self.estimate_tokens(&text);
        Ok(GenerationResult {
            text,
            prompt_tokens: messages.iter().map(|m| self.estimate_tokens(&m.content)).sum(),
            completion_tokens,
            time_to_first_token_ms: 1,
            total_time_ms: 2,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        opts: GenerateOptions,
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let result = self.generate(messages, opts).await?;
        for chunk in result.text.split_inclusive(' ') {
            if tx.send(chunk.to_string()).await.is_err() {
                break;
            }
        }
        Ok(result)
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rule_matching() {
        let llm = ScriptedLlm::new("기본 응답").with_rule("세금", "세무 응답");
        let out = llm
            .generate(&[Message::user("세금 문의")], GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(out.text, "세무 응답");

        let out = llm
            .generate(&[Message::user("다른 질문")], GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(out.text, "기본 응답");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_queued_failures_come_first() {
        let llm = ScriptedLlm::new("ok")
            .with_failure(LlmError::Network("down".into()))
            .with_failure(LlmError::Timeout);
        assert!(llm
            .generate(&[Message::user("a")], GenerateOptions::default())
            .await
            .is_err());
        assert!(llm
            .generate(&[Message::user("b")], GenerateOptions::default())
            .await
            .is_err());
        assert!(llm
            .generate(&[Message::user("c")], GenerateOptions::default())
            .await
            .is_ok());
    }
}
