//! Hybrid lexical/vector document index.
//!
//! A standalone BM25-over-tokens lexical ranker is fused with embedding
//! cosine similarity from `store`'s `vector_search`, merging the two ranked
//! lists by a blended score.

use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

use crate::context::Embedder;
use crate::store::rows::IndexEntryRow;
use crate::store::Store;
use crate::types::ErrorKind;

#[derive(Debug, Error, Clone)]
pub enum IndexError {
    #[error("store error: {0}")]
    Store(String),
    #[error("embedding error: {0}")]
    Embedding(String),
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub doc_id: String,
    pub scope: String,
    pub text: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub text_fragment: String,
    pub score: f32,
}

/// Fuses lexical (BM25) and vector (cosine) retrieval over documents scoped
/// by caller-defined `scope` strings (e.g. a report id or memory namespace).
#[async_trait]
pub trait Index: Send + Sync {
    async fn upsert(&self, doc: IndexedDocument) -> Result<(), IndexError>;
    async fn remove(&self, doc_id: &str) -> Result<(), IndexError>;
    async fn search(&self, query: &str, scope: Option<&str>, k: usize) -> Result<Vec<SearchHit>, IndexError>;
}

struct Bm25Doc {
    doc_id: String,
    scope: String,
    text: String,
    term_freqs: HashMap<String, u32>,
    length: u32,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// In-process BM25 index paired with the configured [`Store`]/[`Embedder`]
/// for the vector half of the fusion. BM25 state lives in memory; the
/// store's `index_entries` table is the durable record, so a restart
/// rebuilds BM25 term statistics from whatever documents are re-upserted.
pub struct HybridIndex {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    docs: parking_lot::RwLock<HashMap<String, Bm25Doc>>,
    avg_doc_len: parking_lot::RwLock<f32>,
}

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

impl HybridIndex {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            docs: parking_lot::RwLock::new(HashMap::new()),
            avg_doc_len: parking_lot::RwLock::new(0.0),
        }
    }

    fn recompute_avg_len(&self) {
        let docs = self.docs.read();
        if docs.is_empty() {
            *self.avg_doc_len.write() = 0.0;
            return;
        }
        let total: u32 = docs.values().map(|d| d.length).sum();
        *self.avg_doc_len.write() = total as f32 / docs.len() as f32;
    }

    fn bm25_scores(&self, query: &str, scope: Option<&str>) -> Vec<(String, f32)> {
        let terms = tokenize(query);
        let docs = self.docs.read();
        let avg_len = *self.avg_doc_len.read();
        let n = docs.len() as f32;
        if n == 0.0 {
            return Vec::new();
        }

        let mut scores: HashMap<String, f32> = HashMap::new();
        for term in &terms {
            let df = docs
                .values()
                .filter(|d| scope.map(|s| d.scope == s).unwrap_or(true))
                .filter(|d| d.term_freqs.contains_key(term))
                .count() as f32;
            if df == 0.0 {
                continue;
            }
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for doc in docs.values() {
                if scope.map(|s| doc.scope != s).unwrap_or(false) {
                    continue;
                }
                let Some(&tf) = doc.term_freqs.get(term) else {
                    continue;
                };
                let tf = tf as f32;
                let len_norm = 1.0 - BM25_B + BM25_B * (doc.length as f32 / avg_len.max(1.0));
                let score = idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * len_norm);
                *scores.entry(doc.doc_id.clone()).or_insert(0.0) += score;
            }
        }
        scores.into_iter().collect()
    }
}

#[async_trait]
impl Index for HybridIndex {
    async fn upsert(&self, doc: IndexedDocument) -> Result<(), IndexError> {
        let term_freqs = tokenize(&doc.text).into_iter().fold(HashMap::new(), |mut acc, t| {
            *acc.entry(t).or_insert(0u32) += 1;
            acc
        });
        let length = term_freqs.values().sum();

        self.docs.write().insert(
            doc.doc_id.clone(),
            Bm25Doc {
                doc_id: doc.doc_id.clone(),
                scope: doc.scope.clone(),
                text: doc.text.clone(),
                term_freqs,
                length,
            },
        );
        self.recompute_avg_len();

        let embedding = self
            .embedder
            .embed(&doc.text)
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        doc.text.hash(&mut hasher);
        let content_hash = format!("{:x}", hasher.finish());

        self.store
            .upsert_index_entry(IndexEntryRow {
                doc_id: doc.doc_id.clone(),
                scope: doc.scope.clone(),
                text_fragment: doc.text.chars().take(280).collect(),
                embedding_json: serde_json::to_string(&embedding).unwrap_or_default(),
                lexical_tokens: tokenize(&doc.text).join(" "),
                content_hash,
                created_at: chrono::Utc::now(),
            })
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, doc_id: &str) -> Result<(), IndexError> {
        self.docs.write().remove(doc_id);
        self.recompute_avg_len();
        self.store
            .delete_index_entry(doc_id)
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;
        Ok(())
    }

    async fn search(&self, query: &str, scope: Option<&str>, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let lexical = self.bm25_scores(query, scope);
        let max_lexical = lexical.iter().map(|(_, s)| *s).fold(0.0f32, f32::max).max(1e-6);

        let query_vec = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        let vector_hits = self
            .store
            .vector_search("index_entries", &query_vec, k.max(20), scope)
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;

        let mut fused: HashMap<String, f32> = HashMap::new();
        for (doc_id, lex_score) in &lexical {
            fused.insert(doc_id.clone(), 0.6 * (lex_score / max_lexical));
        }
        for (doc_id, distance) in &vector_hits {
            let similarity = 1.0 - distance;
            *fused.entry(doc_id.clone()).or_insert(0.0) += 0.4 * similarity;
        }

        let docs = self.docs.read();
        let mut hits: Vec<SearchHit> = fused
            .into_iter()
            .map(|(doc_id, score)| {
                let fragment = docs
                    .get(&doc_id)
                    .map(|d| d.text.chars().take(280).collect())
                    .unwrap_or_default();
                SearchHit {
                    doc_id,
                    text_fragment: fragment,
                    score,
                }
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::embedding::MockEmbedder;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn search_ranks_exact_lexical_match_highest() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(MockEmbedder::new(16));
        let index = HybridIndex::new(store, embedder);

        index
            .upsert(IndexedDocument {
                doc_id: "d1".into(),
                scope: "s".into(),
                text: "rust ownership and borrowing".into(),
            })
            .await
            .unwrap();
        index
            .upsert(IndexedDocument {
                doc_id: "d2".into(),
                scope: "s".into(),
                text: "python list comprehensions".into(),
            })
            .await
            .unwrap();

        let hits = index.search("rust ownership", Some("s"), 5).await.unwrap();
        assert_eq!(hits.first().map(|h| h.doc_id.as_str()), Some("d1"));
    }
}
