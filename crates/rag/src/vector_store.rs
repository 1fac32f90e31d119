//! Vector store adapters
//!
//! Dense similarity search behind the [`VectorSearch`] trait: a Qdrant
//! adapter for production and a brute-force in-memory store for tests and
//! small corpora. Scores are similarities in [0,1] (1 − cosine distance).

use async_trait::async_trait;
use dashmap::DashMap;
use qdrant_client::qdrant::{value::Kind, SearchPointsBuilder};
use qdrant_client::Qdrant;
use std::collections::HashMap;

use sodam_core::{Document, MetaValue};

use crate::embeddings::cosine_similarity;
use crate::RagError;

/// One retrieved document with its relevance
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: Document,
    /// Normalised relevance in [0,1]. After hybrid fusion this is the best
    /// of the document's normalised dense/sparse scores.
    pub score: f32,
    /// Raw embedding similarity when the document came through the dense
    /// path; used for the per-document noise floor.
    pub embedding_similarity: Option<f32>,
}

impl ScoredDocument {
    pub fn dense(document: Document, similarity: f32) -> Self {
        Self {
            document,
            score: similarity,
            embedding_similarity: Some(similarity),
        }
    }

    pub fn sparse(document: Document, score: f32) -> Self {
        Self {
            document,
            score,
            embedding_similarity: None,
        }
    }
}

/// Dense similarity search per collection
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Top-k most similar documents; scores are similarities in [0,1]
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>, RagError>;
}

/// Qdrant-backed store
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    pub fn new(endpoint: &str, api_key: Option<&str>) -> Result<Self, RagError> {
        let mut builder = Qdrant::from_url(endpoint);
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| RagError::BackendUnavailable(format!("qdrant: {}", e)))?;
        Ok(Self { client })
    }

    fn payload_to_document(payload: HashMap<String, qdrant_client::qdrant::Value>) -> Document {
        let mut content = String::new();
        let mut metadata = HashMap::new();

        for (key, value) in payload {
            match value.kind {
                Some(Kind::StringValue(s)) => {
                    if key == "content" {
                        content = s;
                    } else {
                        metadata.insert(key, MetaValue::Str(s));
                    }
                }
                Some(Kind::IntegerValue(i)) => {
                    metadata.insert(key, MetaValue::Int(i));
                }
                Some(Kind::DoubleValue(d)) => {
                    metadata.insert(key, MetaValue::Float(d));
                }
                Some(Kind::BoolValue(b)) => {
                    metadata.insert(key, MetaValue::Bool(b));
                }
                _ => {}
            }
        }

        Document { content, metadata }
    }
}

#[async_trait]
impl VectorSearch for QdrantStore {
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, query_vector.to_vec(), k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| RagError::BackendUnavailable(format!("qdrant search: {}", e)))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                // Cosine scores from Qdrant are similarities already;
                // clamp negatives from opposed vectors to the [0,1] range
                let similarity = point.score.clamp(0.0, 1.0);
                let document = Self::payload_to_document(point.payload);
                ScoredDocument::dense(document, similarity)
            })
            .collect())
    }
}

/// Brute-force in-memory store
///
/// Exact cosine search over everything in a collection. Fine for tests and
/// corpora up to a few thousand documents.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: DashMap<String, Vec<(Document, Vec<f32>)>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, collection: &str, document: Document, vector: Vec<f32>) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push((document, vector));
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl VectorSearch for MemoryVectorStore {
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>, RagError> {
        let entries = match self.collections.get(collection) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };

        let mut scored: Vec<ScoredDocument> = entries
            .iter()
            .map(|(doc, vec)| {
                let similarity = cosine_similarity(query_vector, vec).clamp(0.0, 1.0);
                ScoredDocument::dense(doc.clone(), similarity)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.content_hash().cmp(&b.document.content_hash()))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{Embedder, HashEmbedder};

    #[tokio::test]
    async fn test_memory_store_ranks_by_similarity() {
        let store = MemoryVectorStore::new();
        let embedder = HashEmbedder::default();

        for (id, text) in [
            ("1", "부가가치세 신고 기한은 분기 종료 후 25일 이내"),
            ("2", "근로계약서에는 임금과 근로시간을 명시해야 한다"),
            ("3", "부가가치세 조기환급 신청 방법"),
        ] {
            let vector = embedder.embed(text).await.unwrap();
            store.add(
                "finance_tax",
                Document::new(text).with_meta("id", id),
                vector,
            );
        }

        let query = embedder.embed("부가가치세 신고").await.unwrap();
        let results = store.search("finance_tax", &query, 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        assert!(results
            .iter()
            .all(|r| r.document.content.contains("부가가치세")));
    }

    #[tokio::test]
    async fn test_unknown_collection_is_empty_not_error() {
        let store = MemoryVectorStore::new();
        let results = store.search("missing", &[0.1, 0.2], 5).await.unwrap();
        assert!(results.is_empty());
    }
}
