//! Embedding backends
//!
//! The pipeline consumes embeddings through the [`Embedder`] trait. Two
//! adapters ship: a remote HTTP batch endpoint and a deterministic hashing
//! embedder used in tests and as the degraded-mode fallback when the remote
//! backend is down. All outputs are L2-normalised.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::RagError;

/// Embedding capability
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// Embed a batch; order matches input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;

    /// Output dimension
    fn dim(&self) -> usize;
}

/// L2-normalise in place; zero vectors are left untouched
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity of two same-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    dot / (na * nb)
}

/// Remote batch embedding endpoint
///
/// POST `{ "texts": [...] }` → `{ "embeddings": [[f32; dim]] }`
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    dim: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, dim: usize) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| RagError::Embedding(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            dim,
        })
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let batch = [text.to_string()];
        let mut vectors = self.embed_batch(&batch).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { texts })
            .send()
            .await
            .map_err(|e| RagError::BackendUnavailable(format!("embedding endpoint: {}", e)))?;

        if !response.status().is_success() {
            return Err(RagError::BackendUnavailable(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        if body.embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }

        let mut vectors = body.embeddings;
        for v in &mut vectors {
            if v.len() != self.dim {
                return Err(RagError::Embedding(format!(
                    "expected dimension {}, got {}",
                    self.dim,
                    v.len()
                )));
            }
            l2_normalize(v);
        }
        Ok(vectors)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Deterministic character-trigram hashing embedder
///
/// No model quality, but stable: identical texts embed identically and
/// lexically close texts land close. Used in tests and degraded mode.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn bucket(&self, trigram: &[char]) -> usize {
        // FNV-1a over the trigram's code points
        let mut hash: u64 = 0xcbf29ce484222325;
        for c in trigram {
            hash ^= *c as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dim as u64) as usize
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let chars: Vec<char> = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let mut vector = vec![0.0f32; self.dim];
        if chars.is_empty() {
            return Ok(vector);
        }
        if chars.len() < 3 {
            vector[self.bucket(&chars)] += 1.0;
        } else {
            for window in chars.windows(3) {
                vector[self.bucket(window)] += 1.0;
            }
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("부가가치세 신고 기한").await.unwrap();
        let b = embedder.embed("부가가치세 신고 기한").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity_ordering() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed("부가가치세 신고 기한").await.unwrap();
        let near = embedder.embed("부가가치세 신고 방법 안내").await.unwrap();
        let far = embedder.embed("근로계약서 작성 요령").await.unwrap();
        assert!(cosine_similarity(&query, &near) > cosine_similarity(&query, &far));
    }

    #[tokio::test]
    async fn test_normalized_output() {
        let embedder = HashEmbedder::default();
        let v = embedder.embed("세금 계산").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
