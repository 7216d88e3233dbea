//! The Orchestrator.
//!
//! Drives one research job through IDLE → PLANNING → RESEARCHING →
//! SYNTHESIZING → PERSISTING → COMPLETE (or ERROR), emitting a
//! [`crate::session::SessionEvent`] at every transition, with research
//! sub-questions fanned out through [`super::executor::BoundedExecutor`].

use std::sync::Arc;
use thiserror::Error;

use crate::cache::Cache;
use crate::models::{Catalog, ModelClient};
use crate::policy::{Policy, PolicySelector, RequestSignal};
use crate::session::SessionBus;
use crate::store::rows::ReportRow;
use crate::store::Store;
use crate::types::{Budget, ErrorKind, SessionId};

use super::executor::BoundedExecutor;
use super::planner::Planner;
use super::researcher::Researcher;
use super::synthesizer::Synthesizer;

#[derive(Debug, Error, Clone)]
pub enum OrchestratorError {
    #[error("planner error: {0}")]
    Planner(String),
    #[error("researcher error: {0}")]
    Researcher(String),
    #[error("synthesizer error: {0}")]
    Synthesizer(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("catalog error: {0}")]
    Catalog(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    Planning,
    Researching,
    Synthesizing,
    Persisting,
    Complete,
    Error,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResearchOutcome {
    pub report_id: i64,
    pub content: String,
    pub sources: Vec<String>,
    pub policy: Policy,
    pub from_cache: bool,
}

pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    researcher: Arc<dyn Researcher>,
    synthesizer: Arc<dyn Synthesizer>,
    catalog: Arc<Catalog>,
    #[allow(dead_code)]
    model_client: Arc<dyn ModelClient>,
    policy_selector: Arc<dyn PolicySelector>,
    store: Arc<dyn Store>,
    cache: Arc<Cache>,
    session_bus: Arc<dyn SessionBus>,
    executor: Arc<BoundedExecutor>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: Arc<dyn Planner>,
        researcher: Arc<dyn Researcher>,
        synthesizer: Arc<dyn Synthesizer>,
        catalog: Arc<Catalog>,
        model_client: Arc<dyn ModelClient>,
        policy_selector: Arc<dyn PolicySelector>,
        store: Arc<dyn Store>,
        cache: Arc<Cache>,
        session_bus: Arc<dyn SessionBus>,
        executor: Arc<BoundedExecutor>,
    ) -> Self {
        Self {
            planner,
            researcher,
            synthesizer,
            catalog,
            model_client,
            policy_selector,
            store,
            cache,
            session_bus,
            executor,
        }
    }

    /// Rough complexity/novelty heuristic.
    fn signal(query: &str) -> RequestSignal {
        let words = query.split_whitespace().count() as f64;
        let complexity = (words / 30.0).min(1.0);
        let has_question_words = ["why", "how", "compare", "analyze", "evaluate"]
            .iter()
            .any(|w| query.to_lowercase().contains(w));
        let novelty = if has_question_words { 0.7 } else { 0.3 };
        RequestSignal { complexity, novelty }
    }

    pub async fn run(
        &self,
        session_id: SessionId,
        query: &str,
        params: serde_json::Value,
        budget: Budget,
    ) -> Result<ResearchOutcome, OrchestratorError> {
        let policy = self.policy_selector.select(Self::signal(query), &budget);
        let tier = policy.max_tier();

        self.emit(session_id, "PHASE_CHANGED", Phase::Planning).await?;

        if let Some(cached) = self
            .cache
            .get(query, &params, tier)
            .await
            .map_err(|e| OrchestratorError::Cache(e.to_string()))?
        {
            let outcome: ResearchOutcome =
                serde_json::from_value(cached).map_err(|e| OrchestratorError::Cache(e.to_string()))?;
            self.emit(session_id, "PHASE_CHANGED", Phase::Complete).await?;
            return Ok(ResearchOutcome {
                from_cache: true,
                ..outcome
            });
        }

        let candidates = self.catalog.candidates(tier, None);
        let model = candidates
            .first()
            .cloned()
            .ok_or_else(|| OrchestratorError::Catalog(format!("no model for tier {tier:?}")))?;

        let plan = self
            .planner
            .plan(query, &model)
            .await
            .map_err(|e| OrchestratorError::Planner(e.to_string()))?;
        self.session_bus
            .append(
                session_id,
                "planning_usage",
                serde_json::json!({ "promptTokens": plan.prompt_tokens, "completionTokens": plan.completion_tokens }),
            )
            .await
            .ok();
        self.emit(session_id, "PLAN_READY", Phase::Researching)
            .await?;

        let ensemble_size = self.policy_selector.ensemble_size(policy);
        let models: Vec<_> = candidates.into_iter().take(ensemble_size.max(1)).collect();

        let sub_question_calls = plan.sub_questions.iter().enumerate().map(|(i, sub_question)| {
            let sub_query_id = i.to_string();
            let sub_question = sub_question.clone();
            let models = models.clone();
            async move {
                let _permit = self.executor.acquire().await;
                self.session_bus
                    .append(
                        session_id,
                        "agent_started",
                        serde_json::json!({ "subQueryId": sub_query_id, "subQuestion": sub_question }),
                    )
                    .await
                    .ok();
                let result = self.researcher.research(&sub_query_id, &sub_question, &models).await;
                match &result {
                    Ok(finding) => {
                        self.session_bus
                            .append(
                                session_id,
                                "agent_completed",
                                serde_json::json!({ "subQueryId": sub_query_id, "consensusLevel": finding.consensus_level }),
                            )
                            .await
                            .ok();
                    }
                    Err(e) => {
                        self.session_bus
                            .append(session_id, "agent_error", serde_json::json!({ "subQueryId": sub_query_id, "error": e.to_string() }))
                            .await
                            .ok();
                    }
                }
                result
            }
        });
        let findings: Vec<_> = futures::future::join_all(sub_question_calls)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OrchestratorError::Researcher(e.to_string()))?;
        self.emit(session_id, "RESEARCH_COMPLETE", Phase::Synthesizing)
            .await?;

        let synthesis_model = models
            .first()
            .cloned()
            .ok_or_else(|| OrchestratorError::Catalog(format!("no model for tier {tier:?}")))?;
        let synthesis = self
            .synthesizer
            .synthesize(query, &findings, &synthesis_model, session_id, &self.session_bus)
            .await
            .map_err(|e| OrchestratorError::Synthesizer(e.to_string()))?;
        self.emit(session_id, "SYNTHESIS_COMPLETE", Phase::Persisting)
            .await?;

        let report = self
            .store
            .insert_report(ReportRow {
                id: None,
                query: query.to_string(),
                parameters_json: params.to_string(),
                content: synthesis.content.clone(),
                sources_json: serde_json::to_string(&synthesis.sources).unwrap_or_default(),
                embedding: None,
                rating: None,
                created_at: chrono::Utc::now(),
            })
            .await
            .map_err(|e| OrchestratorError::Store(e.to_string()))?;

        let outcome = ResearchOutcome {
            report_id: report.id.unwrap_or_default(),
            content: synthesis.content,
            sources: synthesis.sources,
            policy,
            from_cache: false,
        };

        self.cache
            .put(
                query,
                &params,
                tier,
                serde_json::to_value(&outcome).map_err(|e| OrchestratorError::Cache(e.to_string()))?,
            )
            .await
            .map_err(|e| OrchestratorError::Cache(e.to_string()))?;

        self.emit(session_id, "PHASE_CHANGED", Phase::Complete).await?;
        Ok(outcome)
    }

    async fn emit(&self, session_id: SessionId, event_type: &str, phase: Phase) -> Result<(), OrchestratorError> {
        self.session_bus
            .append(session_id, event_type, serde_json::json!({ "phase": phase }))
            .await
            .map(|_| ())
            .map_err(|e| OrchestratorError::Session(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::context::embedding::MockEmbedder;
    use crate::index::HybridIndex;
    use crate::memory::LivingMemory;
    use crate::models::client::MockModelClient;
    use crate::orchestrate::planner::ModelBackedPlanner;
    use crate::orchestrate::researcher::DefaultResearcher;
    use crate::orchestrate::synthesizer::ModelBackedSynthesizer;
    use crate::policy::DefaultPolicySelector;
    use crate::session::StoreSessionBus;
    use crate::store::memory::InMemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn full_pipeline_produces_a_report() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(MockEmbedder::new(8));
        let client: Arc<dyn ModelClient> = Arc::new(MockModelClient);
        let index = Arc::new(HybridIndex::new(store.clone(), embedder.clone()));
        let memory = Arc::new(LivingMemory::new(store.clone(), embedder.clone()));
        let session_bus: Arc<dyn SessionBus> = Arc::new(StoreSessionBus::new(store.clone()));
        let cache = Arc::new(Cache::new(embedder.clone(), Duration::from_secs(60), Duration::from_secs(60), 0.85, 100));
        let catalog = Arc::new(crate::models::Catalog::default_catalog());

        let orchestrator = Orchestrator::new(
            Arc::new(ModelBackedPlanner::new(client.clone())),
            Arc::new(DefaultResearcher::new(client.clone(), index, memory, embedder)),
            Arc::new(ModelBackedSynthesizer::new(client.clone())),
            catalog,
            client,
            Arc::new(DefaultPolicySelector::new(PolicyConfig::default())),
            store,
            cache,
            session_bus.clone(),
            Arc::new(BoundedExecutor::new(4, 1, 8)),
        );

        let session = session_bus.create(None).await.unwrap();
        let outcome = orchestrator
            .run(session, "why is rust memory safe", serde_json::json!({}), Budget::default())
            .await
            .unwrap();
        assert!(!outcome.content.is_empty());
        assert!(!outcome.from_cache);
    }
}
