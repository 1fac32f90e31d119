//! Sparse search using Tantivy (BM25)
//!
//! One index per collection, built lazily from a [`CorpusLoader`] and held
//! in a process-wide registry. A missing index never fails a query: the
//! registry kicks off a background warm and the caller falls back to
//! vector-only for that call.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument,
};

use async_trait::async_trait;
use sodam_core::{Document, MetaValue};

use crate::RagError;

/// Supplies the documents of a collection for index building
#[async_trait]
pub trait CorpusLoader: Send + Sync {
    async fn load(&self, collection: &str) -> Result<Vec<Document>, RagError>;
}

/// Fixed in-memory corpus, used in tests and for small deployments
#[derive(Default)]
pub struct StaticCorpus {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl StaticCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, documents: Vec<Document>) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }
}

#[async_trait]
impl CorpusLoader for StaticCorpus {
    async fn load(&self, collection: &str) -> Result<Vec<Document>, RagError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }
}

/// Sparse search result with the raw BM25 score
#[derive(Debug, Clone)]
pub struct SparseHit {
    pub document: Document,
    pub score: f32,
}

/// BM25 index over one collection
pub struct SparseIndex {
    index: Index,
    reader: IndexReader,
    writer: RwLock<Option<IndexWriter>>,
    id_field: Field,
    content_field: Field,
    title_field: Field,
    metadata_field: Field,
}

impl SparseIndex {
    /// Create an empty in-RAM index
    pub fn new() -> Result<Self, RagError> {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("ko_simple")
                    .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", text_options.clone());
        let title_field = schema_builder.add_text_field("title", text_options);
        // Stored verbatim so sparse hits round-trip full metadata
        let metadata_field = schema_builder.add_text_field("metadata", STORED);

        let schema = schema_builder.build();
        let index = Index::create_in_ram(schema);

        // SimpleTokenizer splits on non-alphanumeric boundaries and handles
        // Hangul; no stemmer exists for Korean in Tantivy
        let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(60))
            .filter(LowerCaser)
            .build();
        index.tokenizers().register("ko_simple", tokenizer);

        let reader = index.reader().map_err(|e| RagError::Index(e.to_string()))?;
        let writer = index
            .writer(50_000_000)
            .map_err(|e| RagError::Index(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: RwLock::new(Some(writer)),
            id_field,
            content_field,
            title_field,
            metadata_field,
        })
    }

    /// Index documents and commit
    pub fn index_documents(&self, documents: &[Document]) -> Result<(), RagError> {
        let mut writer = self.writer.write();
        let writer = writer
            .as_mut()
            .ok_or_else(|| RagError::Index("writer not available".to_string()))?;

        for doc in documents {
            let mut tantivy_doc = TantivyDocument::default();
            tantivy_doc.add_text(self.id_field, doc.id());
            tantivy_doc.add_text(self.content_field, &doc.content);
            tantivy_doc.add_text(self.title_field, doc.title());
            let metadata_json =
                serde_json::to_string(&doc.metadata).map_err(|e| RagError::Index(e.to_string()))?;
            tantivy_doc.add_text(self.metadata_field, &metadata_json);

            writer
                .add_document(tantivy_doc)
                .map_err(|e| RagError::Index(e.to_string()))?;
        }

        writer.commit().map_err(|e| RagError::Index(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| RagError::Index(e.to_string()))?;
        Ok(())
    }

    /// BM25 search; lenient parsing so raw user text never errors
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SparseHit>, RagError> {
        let searcher = self.reader.searcher();
        let query_parser =
            QueryParser::for_index(&self.index, vec![self.content_field, self.title_field]);

        let (parsed, _errors) = query_parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(top_k.max(1)))
            .map_err(|e| RagError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| RagError::Search(e.to_string()))?;

            let content = doc
                .get_first(self.content_field)
                .and_then(|v| match v {
                    OwnedValue::Str(s) => Some(s.as_str()),
                    _ => None,
                })
                .unwrap_or("")
                .to_string();

            let metadata: HashMap<String, MetaValue> = doc
                .get_first(self.metadata_field)
                .and_then(|v| match v {
                    OwnedValue::Str(s) => serde_json::from_str(s).ok(),
                    _ => None,
                })
                .unwrap_or_default();

            results.push(SparseHit {
                document: Document { content, metadata },
                score,
            });
        }
        Ok(results)
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

/// Process-wide per-collection index registry with lazy warming
pub struct SparseRegistry {
    indices: DashMap<String, Arc<SparseIndex>>,
    warming: Arc<DashMap<String, ()>>,
    loader: Arc<dyn CorpusLoader>,
}

impl SparseRegistry {
    pub fn new(loader: Arc<dyn CorpusLoader>) -> Arc<Self> {
        Arc::new(Self {
            indices: DashMap::new(),
            warming: Arc::new(DashMap::new()),
            loader,
        })
    }

    /// The index for a collection if already warm
    pub fn get(&self, collection: &str) -> Option<Arc<SparseIndex>> {
        self.indices.get(collection).map(|e| e.clone())
    }

    /// Warm a collection in the background. Idempotent while a warm is in
    /// flight. The current call sees no index and falls back to vector-only.
    pub fn warm_background(self: &Arc<Self>, collection: &str) {
        if self.indices.contains_key(collection) {
            return;
        }
        if self
            .warming
            .insert(collection.to_string(), ())
            .is_some()
        {
            return; // already warming
        }

        let registry = Arc::clone(self);
        let collection = collection.to_string();
        tokio::spawn(async move {
            match registry.build(&collection).await {
                Ok(index) => {
                    tracing::info!(collection = %collection, docs = index.doc_count(), "BM25 index warmed");
                    registry.indices.insert(collection.clone(), index);
                }
                Err(e) => {
                    tracing::warn!(collection = %collection, error = %e, "BM25 warm failed; will retry on next miss");
                }
            }
            registry.warming.remove(&collection);
        });
    }

    /// Warm synchronously; used at startup and in tests
    pub async fn warm(&self, collection: &str) -> Result<(), RagError> {
        if self.indices.contains_key(collection) {
            return Ok(());
        }
        let index = self.build(collection).await?;
        self.indices.insert(collection.to_string(), index);
        Ok(())
    }

    async fn build(&self, collection: &str) -> Result<Arc<SparseIndex>, RagError> {
        let documents = self.loader.load(collection).await?;
        let index = SparseIndex::new()?;
        // Tantivy indexing is CPU work; keep it off the async executor
        let index = tokio::task::spawn_blocking(move || {
            index.index_documents(&documents)?;
            Ok::<_, RagError>(index)
        })
        .await
        .map_err(|e| RagError::Index(format!("index build task failed: {}", e)))??;
        Ok(Arc::new(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sodam_core::DomainLabel;

    fn doc(id: &str, content: &str) -> Document {
        let mut d = Document::new(content).with_meta("id", id).with_meta("title", id);
        d.set_domain(DomainLabel::FinanceTax);
        d
    }

    #[test]
    fn test_index_and_search() {
        let index = SparseIndex::new().unwrap();
        index
            .index_documents(&[
                doc("1", "부가가치세 신고 기한은 1월 25일"),
                doc("2", "법인세 중간예납 안내"),
            ])
            .unwrap();
        assert_eq!(index.doc_count(), 2);

        let hits = index.search("부가가치세 신고", 5).unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].document.content.contains("부가가치세"));
        assert_eq!(hits[0].document.domain(), Some(DomainLabel::FinanceTax));
    }

    #[test]
    fn test_lenient_parse_of_raw_user_text() {
        let index = SparseIndex::new().unwrap();
        index
            .index_documents(&[doc("1", "근로기준법 제26조 해고 예고")])
            .unwrap();
        // Punctuation and statute citations must not break the parser
        let hits = index.search("해고 예고는? (제26조)", 5).unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn test_registry_warm_and_get() {
        let corpus = Arc::new(StaticCorpus::new());
        corpus.insert("finance_tax", vec![doc("1", "부가세 예정신고")]);
        let registry = SparseRegistry::new(corpus);

        assert!(registry.get("finance_tax").is_none());
        registry.warm("finance_tax").await.unwrap();
        let index = registry.get("finance_tax").unwrap();
        assert_eq!(index.doc_count(), 1);
    }

    #[tokio::test]
    async fn test_background_warm_is_nonblocking() {
        let corpus = Arc::new(StaticCorpus::new());
        corpus.insert("hr_labor", vec![doc("1", "연차휴가 산정")]);
        let registry = SparseRegistry::new(corpus);

        registry.warm_background("hr_labor");
        // Current call sees a miss and falls back to vector-only
        // (the warm lands eventually)
        for _ in 0..50 {
            if registry.get("hr_labor").is_some() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("background warm did not complete");
    }
}
