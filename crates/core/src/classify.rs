//! Classification and decomposition types

use serde::{Deserialize, Serialize};

use crate::domain::DomainLabel;

/// How the classification was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationMethod {
    #[serde(rename = "llm")]
    Llm,
    #[serde(rename = "keyword")]
    Keyword,
    #[serde(rename = "vector")]
    Vector,
    #[serde(rename = "keyword+vector")]
    KeywordVector,
    #[serde(rename = "fallback_rejected")]
    FallbackRejected,
    /// The LLM classifier failed twice; the pipeline answers with an
    /// advisory message instead of classifying
    #[serde(rename = "llm_retry_failed")]
    LlmRetryFailed,
}

/// Result of domain classification
///
/// Invariants: `is_relevant == false` implies `domains` is empty;
/// `is_relevant == true` implies at least one domain, primary first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainClassification {
    pub domains: Vec<DomainLabel>,
    pub confidence: f32,
    pub is_relevant: bool,
    pub method: ClassificationMethod,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_keywords: Vec<String>,
}

impl DomainClassification {
    pub fn relevant(
        domains: Vec<DomainLabel>,
        confidence: f32,
        method: ClassificationMethod,
    ) -> Self {
        debug_assert!(!domains.is_empty());
        Self {
            domains,
            confidence,
            is_relevant: true,
            method,
            matched_keywords: Vec::new(),
        }
    }

    pub fn rejected() -> Self {
        Self {
            domains: Vec::new(),
            confidence: 0.0,
            is_relevant: false,
            method: ClassificationMethod::FallbackRejected,
            matched_keywords: Vec::new(),
        }
    }

    /// Double LLM-classifier failure; yields an advisory answer, not an error
    pub fn llm_retry_failed() -> Self {
        Self {
            domains: Vec::new(),
            confidence: 0.0,
            is_relevant: false,
            method: ClassificationMethod::LlmRetryFailed,
            matched_keywords: Vec::new(),
        }
    }

    pub fn primary(&self) -> Option<DomainLabel> {
        self.domains.first().copied()
    }

    pub fn is_multi_domain(&self) -> bool {
        self.domains.len() > 1
    }
}

/// A self-contained, domain-labelled question produced by decomposition.
/// For single-domain requests there is exactly one SubQuery equal to the
/// original question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    pub domain: DomainLabel,
    pub query: String,
}

impl SubQuery {
    pub fn new(domain: DomainLabel, query: impl Into<String>) -> Self {
        Self {
            domain,
            query: query.into(),
        }
    }
}
