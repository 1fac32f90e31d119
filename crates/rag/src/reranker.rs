//! Rerankers
//!
//! Cross-encoder quality reordering behind the [`Reranker`] trait. The
//! remote HTTP adapter talks to a reranker service; the lexical scorer is
//! the always-available fallback. Callers treat reranking as best-effort:
//! errors are logged and the pre-rerank order kept.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use sodam_core::korean;

use crate::vector_store::ScoredDocument;
use crate::RagError;

/// Reranking capability
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorder by query relevance and truncate to `top_k`
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<ScoredDocument>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, RagError>;
}

/// Token-overlap scorer
///
/// Blends the incoming score with the lemma-overlap ratio so fusion
/// evidence is kept while lexical agreement reorders the head.
pub struct LexicalReranker;

impl LexicalReranker {
    pub fn score(query: &str, content: &str) -> f32 {
        let lemmas = korean::extract_lemmas(query);
        if lemmas.is_empty() {
            return 0.0;
        }
        let hits = lemmas.iter().filter(|l| content.contains(l.as_str())).count();
        hits as f32 / lemmas.len() as f32
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<ScoredDocument>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        let mut rescored: Vec<ScoredDocument> = documents
            .into_iter()
            .map(|mut d| {
                let lexical = Self::score(query, &d.document.content);
                d.score = d.score * 0.3 + lexical * 0.7;
                d
            })
            .collect();

        rescored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.content_hash().cmp(&b.document.content_hash()))
        });
        rescored.truncate(top_k);
        Ok(rescored)
    }
}

/// Remote reranker service
///
/// POST `{ query, documents, top_k }` → `{ results: [{ index, score }] }`
pub struct HttpReranker {
    client: Client,
    endpoint: String,
}

impl HttpReranker {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RagError::Reranker(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: Vec<&'a str>,
    top_k: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankEntry>,
}

#[derive(Deserialize)]
struct RerankEntry {
    index: usize,
    score: f32,
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<ScoredDocument>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        if documents.is_empty() {
            return Ok(documents);
        }

        let request = RerankRequest {
            query,
            documents: documents.iter().map(|d| d.document.content.as_str()).collect(),
            top_k,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::BackendUnavailable(format!("reranker: {}", e)))?;

        if !response.status().is_success() {
            return Err(RagError::Reranker(format!(
                "reranker returned {}",
                response.status()
            )));
        }

        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| RagError::Reranker(e.to_string()))?;

        let mut out = Vec::with_capacity(top_k.min(body.results.len()));
        for entry in body.results.into_iter().take(top_k) {
            if let Some(doc) = documents.get(entry.index) {
                let mut doc = doc.clone();
                doc.score = entry.score.clamp(0.0, 1.0);
                out.push(doc);
            }
        }
        Ok(out)
    }
}
