//! LLM backend implementations
//!
//! One trait, one production adapter: an OpenAI-compatible chat-completions
//! backend over HTTP. Transient failures retry with exponential backoff;
//! per-call options carry the domain-dependent temperature and token cap.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::prompt::{Message, Role};
use crate::LlmError;

/// OpenAI-compatible backend configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API endpoint base, e.g. `https://api.openai.com/v1`
    pub endpoint: String,
    /// API key; optional for localhost endpoints
    pub api_key: Option<String>,
    /// Model name
    pub model: String,
    /// Default maximum tokens to generate
    pub max_tokens: usize,
    /// Default sampling temperature
    pub temperature: f32,
    /// Request timeout
    pub timeout: Duration,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
    /// Initial backoff duration, doubles each retry
    pub initial_backoff: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            temperature: 0.1,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl OpenAiConfig {
    pub fn from_settings(backends: &sodam_config::BackendConfig) -> Self {
        Self {
            endpoint: backends.llm_endpoint.clone(),
            api_key: backends.llm_api_key.clone(),
            model: backends.llm_model.clone(),
            ..Self::default()
        }
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

/// LLM generation result
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Generated text
    pub text: String,
    /// Prompt tokens reported by the backend (0 when unreported)
    pub prompt_tokens: usize,
    /// Completion tokens
    pub completion_tokens: usize,
    /// Time to first token (ms); equals total for non-streaming calls
    pub time_to_first_token_ms: u64,
    /// Total generation time (ms)
    pub total_time_ms: u64,
    /// Finish reason
    pub finish_reason: FinishReason,
}

/// Finish reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Cancelled,
}

/// LLM backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a response with per-call options
    async fn generate(
        &self,
        messages: &[Message],
        opts: GenerateOptions,
    ) -> Result<GenerationResult, LlmError>;

    /// Generate with streaming; tokens are sent to `tx` in arrival order
    async fn generate_stream(
        &self,
        messages: &[Message],
        opts: GenerateOptions,
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError>;

    /// Cheap availability probe
    async fn is_available(&self) -> bool;

    /// Model name
    fn model_name(&self) -> &str;

    /// Estimate tokens for budgeting before a backend reports real usage.
    /// Hangul runs ~2 characters per token, Latin ~4.
    fn estimate_tokens(&self, text: &str) -> usize {
        use unicode_segmentation::UnicodeSegmentation;

        let grapheme_count = text.graphemes(true).count();
        let hangul_count = text
            .chars()
            .filter(|c| ('\u{AC00}'..='\u{D7A3}').contains(c) || ('\u{1100}'..='\u{11FF}').contains(c))
            .count();

        if hangul_count > grapheme_count / 3 {
            grapheme_count.max(1) / 2
        } else {
            grapheme_count.max(1) / 4
        }
    }
}

/// OpenAI-compatible backend
///
/// Works with OpenAI, Azure-style gateways, vLLM, and local servers exposing
/// the chat-completions API.
pub struct OpenAiBackend {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.api_key.is_none() && !config.endpoint.starts_with("http://localhost") {
            tracing::warn!(endpoint = %config.endpoint, "no API key configured for remote LLM endpoint");
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    fn build_request(
        &self,
        messages: &[Message],
        opts: GenerateOptions,
        stream: bool,
    ) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            max_tokens: Some(opts.max_tokens.unwrap_or(self.config.max_tokens)),
            temperature: Some(opts.temperature.unwrap_or(self.config.temperature)),
            stream: Some(stream),
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key {
            Some(ref key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn execute(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let response = self
            .apply_auth(self.client.post(self.chat_url()))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            // 5xx is transient, 4xx is not
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {}: {}", status, error)));
            }
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error)));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::Timeout)
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn generate(
        &self,
        messages: &[Message],
        opts: GenerateOptions,
    ) -> Result<GenerationResult, LlmError> {
        let start = std::time::Instant::now();
        let request = self.build_request(messages, opts, false);

        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    max = self.config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "LLM request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute(&request).await {
                Ok(response) => {
                    let choice = response.choices.into_iter().next().ok_or_else(|| {
                        LlmError::InvalidResponse("no choices in response".to_string())
                    })?;
                    let total_time_ms = start.elapsed().as_millis() as u64;
                    let usage = response.usage.unwrap_or_default();

                    return Ok(GenerationResult {
                        text: choice.message.content,
                        prompt_tokens: usage.prompt_tokens,
                        completion_tokens: usage.completion_tokens,
                        time_to_first_token_ms: total_time_ms,
                        total_time_ms,
                        finish_reason: match choice.finish_reason.as_deref() {
                            Some("length") => FinishReason::Length,
                            _ => FinishReason::Stop,
                        },
                    });
                }
                Err(e) if Self::is_retryable(&e) => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("max retries exceeded".to_string())))
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        opts: GenerateOptions,
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        use futures::StreamExt;

        let start = std::time::Instant::now();
        let request = self.build_request(messages, opts, true);

        let response = self
            .apply_auth(self.client.post(self.chat_url()))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error)));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();
        let mut token_count = 0usize;
        let mut first_token_ms: Option<u64> = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process complete SSE lines
            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }

                if let Some(json_str) = line.strip_prefix("data: ") {
                    if let Ok(chunk) = serde_json::from_str::<StreamChunk>(json_str) {
                        if let Some(choice) = chunk.choices.first() {
                            if let Some(ref content) =
                                choice.delta.as_ref().and_then(|d| d.content.clone())
                            {
                                if first_token_ms.is_none() {
                                    first_token_ms = Some(start.elapsed().as_millis() as u64);
                                }
                                full_text.push_str(content);
                                token_count += 1;
                                if tx.send(content.clone()).await.is_err() {
                                    // Receiver dropped; generation cancelled
                                    return Ok(GenerationResult {
                                        text: full_text,
                                        prompt_tokens: 0,
                                        completion_tokens: token_count,
                                        time_to_first_token_ms: first_token_ms.unwrap_or(0),
                                        total_time_ms: start.elapsed().as_millis() as u64,
                                        finish_reason: FinishReason::Cancelled,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }

        let total_time_ms = start.elapsed().as_millis() as u64;
        Ok(GenerationResult {
            text: full_text,
            prompt_tokens: 0,
            completion_tokens: token_count,
            time_to_first_token_ms: first_token_ms.unwrap_or(total_time_ms),
            total_time_ms,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        self.apply_auth(self.client.get(&url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: match msg.role {
                Role::System => "system".to_string(),
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
            },
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = OpenAiConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.model, "gpt-4o-mini");
    }

    #[test]
    fn test_chat_url() {
        let backend = OpenAiBackend::new(OpenAiConfig {
            endpoint: "http://localhost:8000/v1/".to_string(),
            ..OpenAiConfig::default()
        })
        .unwrap();
        assert_eq!(backend.chat_url(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_request_serialization() {
        let backend = OpenAiBackend::new(OpenAiConfig::default()).unwrap();
        let request = backend.build_request(
            &[Message::user("부가세 신고 기한 알려주세요")],
            GenerateOptions {
                temperature: Some(0.0),
                max_tokens: Some(256),
            },
            false,
        );
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"temperature\":0.0"));
        assert!(json.contains("\"max_tokens\":256"));
        assert!(json.contains("부가세"));
    }

    #[test]
    fn test_estimate_tokens_hangul_vs_latin() {
        let backend = OpenAiBackend::new(OpenAiConfig::default()).unwrap();
        let korean = "사업자등록을 하려면 어떤 서류가 필요한가요";
        let english = "what documents are required to register a business entity";
        // Korean text yields proportionally more tokens per grapheme
        assert!(backend.estimate_tokens(korean) * 2 >= korean.chars().count() / 2);
        assert!(backend.estimate_tokens(english) <= english.chars().count() / 3);
    }
}
