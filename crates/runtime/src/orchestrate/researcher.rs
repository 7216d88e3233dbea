//! The Researcher.
//!
//! Answers one sub-question by retrieving from [`crate::index::Index`] and
//! [`crate::memory::Memory`], then asking the model to synthesize a sourced
//! finding.

use async_trait::async_trait;
use thiserror::Error;
use std::sync::Arc;

use crate::context::Embedder;
use crate::index::Index;
use crate::memory::Memory;
use crate::models::client::{ChatMessage, CompletionRequest, ModelClient, Role};
use crate::models::ModelEntry;
use crate::store::cosine_distance;
use crate::types::ErrorKind;

#[derive(Debug, Error, Clone)]
pub enum ResearcherError {
    #[error("model client error: {0}")]
    ModelClient(String),
    #[error("index error: {0}")]
    Index(String),
    #[error("memory error: {0}")]
    Memory(String),
    #[error("embedding error: {0}")]
    Embedding(String),
}

impl ResearcherError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// One ensemble member's answer to a sub-question.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelAnswer {
    pub model: String,
    pub content: String,
    pub sources: Vec<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// The ensemble's answer to one sub-question: every distinct model's
/// result plus how much they agreed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Finding {
    pub sub_query_id: String,
    pub sub_question: String,
    pub results: Vec<ModelAnswer>,
    /// Maximum pairwise cosine similarity across result embeddings; `1.0`
    /// when there is only one ensemble member.
    pub consensus_level: f32,
}

impl Finding {
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.results.iter().flat_map(|r| r.sources.clone()).collect();
        sources.sort();
        sources.dedup();
        sources
    }

    /// The longest answer, used as the representative text handed to the
    /// synthesizer for this sub-question.
    pub fn representative_answer(&self) -> &str {
        self.results
            .iter()
            .max_by_key(|r| r.content.len())
            .map(|r| r.content.as_str())
            .unwrap_or("")
    }
}

#[async_trait]
pub trait Researcher: Send + Sync {
    /// Dispatches `sub_question` to every model in `models` in parallel and
    /// scores their agreement.
    async fn research(
        &self,
        sub_query_id: &str,
        sub_question: &str,
        models: &[ModelEntry],
    ) -> Result<Finding, ResearcherError>;
}

pub struct DefaultResearcher {
    client: Arc<dyn ModelClient>,
    index: Arc<dyn Index>,
    memory: Arc<dyn Memory>,
    embedder: Arc<dyn Embedder>,
}

impl DefaultResearcher {
    pub fn new(
        client: Arc<dyn ModelClient>,
        index: Arc<dyn Index>,
        memory: Arc<dyn Memory>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self { client, index, memory, embedder }
    }
}

const RESEARCHER_SYSTEM_PROMPT: &str = "Answer the sub-question using only the provided context. \
Cite source ids inline as [source_id]. If the context is insufficient, say so plainly.";

#[async_trait]
impl Researcher for DefaultResearcher {
    async fn research(
        &self,
        sub_query_id: &str,
        sub_question: &str,
        models: &[ModelEntry],
    ) -> Result<Finding, ResearcherError> {
        let index_hits = self
            .index
            .search(sub_question, None, 5)
            .await
            .map_err(|e| ResearcherError::Index(e.to_string()))?;
        let memory_hits = self
            .memory
            .query(sub_question, 3)
            .await
            .map_err(|e| ResearcherError::Memory(e.to_string()))?;

        let mut sources: Vec<String> = Vec::new();
        let mut context = String::new();
        for hit in &index_hits {
            context.push_str(&format!("[{}] {}\n", hit.doc_id, hit.text_fragment));
            sources.push(hit.doc_id.clone());
        }
        for node in &memory_hits {
            let id = node.id.to_string();
            context.push_str(&format!("[{}] (confidence {:.2}) {:?}\n", id, node.confidence, node.relations));
            sources.push(id);
        }

        let prompt = format!("Context:\n{context}\n\nSub-question: {sub_question}");

        let calls = models.iter().map(|model| {
            let client = self.client.clone();
            let prompt = prompt.clone();
            let model_id = model.id.clone();
            let sources = sources.clone();
            async move {
                client
                    .complete(CompletionRequest {
                        model_id: model_id.clone(),
                        system_prompt: Some(RESEARCHER_SYSTEM_PROMPT.to_string()),
                        messages: vec![ChatMessage {
                            role: Role::User,
                            content: prompt,
                        }],
                        max_tokens: 1024,
                        temperature: 0.3,
                    })
                    .await
                    .map(|r| ModelAnswer {
                        model: model_id,
                        content: r.content,
                        sources,
                        prompt_tokens: r.prompt_tokens,
                        completion_tokens: r.completion_tokens,
                    })
            }
        });
        let results: Vec<ModelAnswer> = futures::future::join_all(calls)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ResearcherError::ModelClient(e.to_string()))?;

        let mut embeddings = Vec::with_capacity(results.len());
        for r in &results {
            let embedding = self
                .embedder
                .embed(&r.content)
                .await
                .map_err(|e| ResearcherError::Embedding(e.to_string()))?;
            embeddings.push(embedding);
        }
        let consensus_level = if embeddings.len() < 2 {
            1.0
        } else {
            let mut max_similarity = 0.0f32;
            for i in 0..embeddings.len() {
                for j in (i + 1)..embeddings.len() {
                    let similarity = 1.0 - cosine_distance(&embeddings[i], &embeddings[j]);
                    max_similarity = max_similarity.max(similarity);
                }
            }
            max_similarity
        };

        Ok(Finding {
            sub_query_id: sub_query_id.to_string(),
            sub_question: sub_question.to_string(),
            results,
            consensus_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::embedding::MockEmbedder;
    use crate::index::HybridIndex;
    use crate::memory::LivingMemory;
    use crate::models::catalog::Catalog;
    use crate::models::client::MockModelClient;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn research_returns_sources_from_index() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(MockEmbedder::new(8));
        let index: Arc<dyn Index> = Arc::new(HybridIndex::new(store.clone(), embedder.clone()));
        index
            .upsert(crate::index::IndexedDocument {
                doc_id: "doc1".into(),
                scope: "s".into(),
                text: "rust uses ownership to manage memory".into(),
            })
            .await
            .unwrap();
        let memory: Arc<dyn Memory> = Arc::new(LivingMemory::new(store, embedder.clone()));
        let researcher = DefaultResearcher::new(Arc::new(MockModelClient), index, memory, embedder);
        let catalog = Catalog::default_catalog();
        let models = catalog.list();
        let finding = researcher
            .research("0", "how does rust manage memory", &models[..1])
            .await
            .unwrap();
        assert!(!finding.representative_answer().is_empty());
        assert_eq!(finding.consensus_level, 1.0);
    }

    #[tokio::test]
    async fn ensemble_of_distinct_models_scores_consensus() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(MockEmbedder::new(8));
        let index: Arc<dyn Index> = Arc::new(HybridIndex::new(store.clone(), embedder.clone()));
        let memory: Arc<dyn Memory> = Arc::new(LivingMemory::new(store, embedder.clone()));
        let researcher = DefaultResearcher::new(Arc::new(MockModelClient), index, memory, embedder);
        let catalog = Catalog::default_catalog();
        let models = catalog.list();
        let k = models.len().min(2);
        let finding = researcher
            .research("0", "how does rust manage memory", &models[..k])
            .await
            .unwrap();
        assert_eq!(finding.results.len(), k);
        assert!(finding.consensus_level >= 0.0 && finding.consensus_level <= 1.0001);
    }
}
