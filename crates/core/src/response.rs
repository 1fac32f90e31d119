//! Query response wire model and streaming events

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::document::MetaValue;
use crate::domain::DomainLabel;

/// A cited source in the response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub content: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, MetaValue>,
}

/// Closed set of suggested follow-up actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    DocumentGeneration,
    FundingSearch,
    ExternalLink,
    TaxCalendar,
    LegalConsultation,
}

/// A suggested action. Value type: every emitted instance is a fresh copy,
/// params are never shared between instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSuggestion {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ActionSuggestion {
    pub fn new(action_type: ActionType, label: impl Into<String>) -> Self {
        Self {
            action_type,
            label: label.into(),
            description: None,
            params: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Five-criterion sub-scores, each 0-20
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub accuracy: f32,
    pub completeness: f32,
    pub relevance: f32,
    pub citation: f32,
    pub retrieval_quality: f32,
}

/// Answer evaluation report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub scores: EvaluationScores,
    /// Weighted total, 0-100
    pub total_score: f32,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// RAGAS metrics, logged only; never drives retry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagasMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faithfulness: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_relevancy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_precision: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_recall: Option<f32>,
}

/// Per-stage wall-clock timings in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingMetrics {
    pub classify: u64,
    pub decompose: u64,
    pub retrieve: u64,
    pub generate: u64,
    pub evaluate: u64,
    pub total: u64,
    /// Per-domain retrieval timings keyed by collection name
    #[serde(default)]
    pub per_agent: HashMap<String, u64>,
}

/// The assembled advisory answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub content: String,
    /// Primary domain
    pub domain: String,
    /// All engaged domains, primary first
    pub domains: Vec<String>,
    pub sources: Vec<SourceRef>,
    pub actions: Vec<ActionSuggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ragas_metrics: Option<RagasMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing_metrics: Option<TimingMetrics>,
    /// Persistable evaluation digest (classification method, retry levels,
    /// thresholds in force) for offline analysis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_data: Option<serde_json::Value>,
}

impl QueryResponse {
    /// An empty answer shell for a domain set, primary first
    pub fn empty(domains: &[DomainLabel]) -> Self {
        Self {
            content: String::new(),
            domain: domains
                .first()
                .map(|d| d.as_collection().to_string())
                .unwrap_or_default(),
            domains: domains.iter().map(|d| d.as_collection().to_string()).collect(),
            sources: Vec::new(),
            actions: Vec::new(),
            evaluation: None,
            session_id: None,
            retry_count: 0,
            ragas_metrics: None,
            timing_metrics: None,
            evaluation_data: None,
        }
    }
}

/// Streaming event, adapted to SSE framing by the transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// One generated token (or token group)
    Token(String),
    /// A cited source, emitted before tokens
    Source(SourceRef),
    /// A suggested action
    Action(ActionSuggestion),
    /// Response metadata (domains, retry count, timings)
    Metadata(serde_json::Value),
    /// Terminal event
    Done,
}
