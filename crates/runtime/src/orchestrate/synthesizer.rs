//! The Synthesizer.
//!
//! Merges a set of sourced [`Finding`]s into one coherent report with a
//! deduplicated source list.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;

use super::researcher::Finding;
use crate::models::client::{ChatMessage, CompletionRequest, ModelClient, Role};
use crate::models::ModelEntry;
use crate::session::SessionBus;
use crate::types::{ErrorKind, SessionId};

#[derive(Debug, Error, Clone)]
pub enum SynthesizerError {
    #[error("model client error: {0}")]
    ModelClient(String),
}

impl SynthesizerError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Synthesis {
    pub content: String,
    pub sources: Vec<String>,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Streams the synthesis from `model`, forwarding `synthesis_token` and
    /// a closing `synthesis_usage`/`synthesis_error` event to `session_bus`.
    async fn synthesize(
        &self,
        query: &str,
        findings: &[Finding],
        model: &ModelEntry,
        session_id: SessionId,
        session_bus: &Arc<dyn SessionBus>,
    ) -> Result<Synthesis, SynthesizerError>;
}

const SYNTHESIZER_SYSTEM_PROMPT: &str = "Combine the following sub-answers into one coherent, \
well-organized report answering the original question. Preserve inline [source_id] citations.";

pub struct ModelBackedSynthesizer {
    client: Arc<dyn ModelClient>,
}

impl ModelBackedSynthesizer {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Synthesizer for ModelBackedSynthesizer {
    async fn synthesize(
        &self,
        query: &str,
        findings: &[Finding],
        model: &ModelEntry,
        session_id: SessionId,
        session_bus: &Arc<dyn SessionBus>,
    ) -> Result<Synthesis, SynthesizerError> {
        let mut body = format!("Original question: {query}\n\n");
        for finding in findings {
            body.push_str(&format!(
                "Sub-question: {}\nAnswer: {}\n\n",
                finding.sub_question,
                finding.representative_answer()
            ));
        }

        let mut stream = self
            .client
            .stream(CompletionRequest {
                model_id: model.id.clone(),
                system_prompt: Some(SYNTHESIZER_SYSTEM_PROMPT.to_string()),
                messages: vec![ChatMessage {
                    role: Role::User,
                    content: body,
                }],
                max_tokens: 2048,
                temperature: 0.3,
            })
            .await
            .map_err(|e| SynthesizerError::ModelClient(e.to_string()))?;

        let mut content = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(c) => {
                    content.push_str(&c.delta);
                    session_bus
                        .append(session_id, "synthesis_token", serde_json::json!({ "delta": c.delta, "done": c.done }))
                        .await
                        .ok();
                }
                Err(e) => {
                    session_bus
                        .append(session_id, "synthesis_error", serde_json::json!({ "error": e.to_string() }))
                        .await
                        .ok();
                    return Err(SynthesizerError::ModelClient(e.to_string()));
                }
            }
        }
        session_bus
            .append(session_id, "synthesis_usage", serde_json::json!({ "contentChars": content.len() }))
            .await
            .ok();

        let mut sources: Vec<String> = findings.iter().flat_map(|f| f.sources()).collect();
        sources.sort();
        sources.dedup();

        Ok(Synthesis { content, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::Catalog;
    use crate::models::client::MockModelClient;
    use crate::orchestrate::researcher::ModelAnswer;
    use crate::session::StoreSessionBus;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn synthesis_dedupes_sources() {
        let synthesizer = ModelBackedSynthesizer::new(Arc::new(MockModelClient));
        let catalog = Catalog::default_catalog();
        let model = catalog.list().into_iter().next().unwrap();
        let findings = vec![
            Finding {
                sub_query_id: "0".into(),
                sub_question: "a".into(),
                results: vec![ModelAnswer {
                    model: model.id.clone(),
                    content: "answer a".into(),
                    sources: vec!["s1".into(), "s2".into()],
                    prompt_tokens: 0,
                    completion_tokens: 0,
                }],
                consensus_level: 1.0,
            },
            Finding {
                sub_query_id: "1".into(),
                sub_question: "b".into(),
                results: vec![ModelAnswer {
                    model: model.id.clone(),
                    content: "answer b".into(),
                    sources: vec!["s2".into(), "s3".into()],
                    prompt_tokens: 0,
                    completion_tokens: 0,
                }],
                consensus_level: 1.0,
            },
        ];
        let session_bus: Arc<dyn SessionBus> = Arc::new(StoreSessionBus::new(Arc::new(InMemoryStore::new())));
        let session_id = session_bus.create(None).await.unwrap();
        let synthesis = synthesizer
            .synthesize("q", &findings, &model, session_id, &session_bus)
            .await
            .unwrap();
        assert_eq!(synthesis.sources, vec!["s1".to_string(), "s2".to_string(), "s3".to_string()]);
        let events = session_bus.history(session_id).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "synthesis_token"));
        assert!(events.iter().any(|e| e.event_type == "synthesis_usage"));
    }
}
