//! Indexed documents
//!
//! A document is an immutable text unit in the vector store. `content` is
//! the sole target of retrieval scoring; `title` and `source_*` fields are
//! display-only metadata.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::domain::DomainLabel;

/// Primitive metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Str(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}

impl From<f64> for MetaValue {
    fn from(f: f64) -> Self {
        MetaValue::Float(f)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

/// Content hash over the first 500 characters, the dedup key across the
/// whole retrieval path.
pub fn content_hash(content: &str) -> String {
    let prefix: String = content.chars().take(500).collect();
    let digest = Sha256::digest(prefix.as_bytes());
    format!("{:x}", digest)
}

/// An indexed text unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// The embedded and returned text
    pub content: String,
    /// At minimum: id, type, domain, title, source_name, source_url,
    /// collected_at. Chunked docs add chunk_index and original_id.
    /// Per-type fields are prefixed `meta_`.
    #[serde(default)]
    pub metadata: HashMap<String, MetaValue>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Document id from metadata, empty if unset
    pub fn id(&self) -> &str {
        self.metadata
            .get("id")
            .and_then(MetaValue::as_str)
            .unwrap_or("")
    }

    /// Display title from metadata
    pub fn title(&self) -> &str {
        self.metadata
            .get("title")
            .and_then(MetaValue::as_str)
            .unwrap_or("")
    }

    /// Source domain recorded in metadata
    pub fn domain(&self) -> Option<DomainLabel> {
        self.metadata
            .get("domain")
            .and_then(MetaValue::as_str)
            .and_then(DomainLabel::from_external)
    }

    /// Stamp the source domain into metadata
    pub fn set_domain(&mut self, domain: DomainLabel) {
        self.metadata
            .insert("domain".to_string(), domain.as_collection().into());
    }

    /// Dedup key: sha256 over the first 500 chars of content
    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_prefix_only() {
        let base = "가".repeat(500);
        let a = format!("{}{}", base, "tail one");
        let b = format!("{}{}", base, "different tail");
        // Only the first 500 chars participate
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash("unrelated"));
    }

    #[test]
    fn test_domain_roundtrip() {
        let mut doc = Document::new("부가가치세 신고 안내").with_meta("id", "doc-1");
        doc.set_domain(DomainLabel::FinanceTax);
        assert_eq!(doc.domain(), Some(DomainLabel::FinanceTax));
        assert_eq!(doc.id(), "doc-1");
    }

    #[test]
    fn test_meta_value_untagged_serde() {
        let doc = Document::new("text")
            .with_meta("chunk_index", 3i64)
            .with_meta("title", "제목");
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.metadata.get("chunk_index").and_then(MetaValue::as_int),
            Some(3)
        );
        assert_eq!(back.title(), "제목");
    }
}
