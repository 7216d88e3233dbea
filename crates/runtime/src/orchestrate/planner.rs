//! The Planner.
//!
//! Produces a fixed-shape research plan: a list of sub-questions derived
//! from the original query.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::client::{ChatMessage, CompletionRequest, ModelClient, Role};
use crate::models::ModelEntry;
use crate::types::ErrorKind;

#[derive(Debug, Error, Clone)]
pub enum PlannerError {
    #[error("model client error: {0}")]
    ModelClient(String),
    #[error("planner produced no sub-questions")]
    EmptyPlan,
}

impl PlannerError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResearchPlan {
    pub sub_questions: Vec<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, query: &str, model: &ModelEntry) -> Result<ResearchPlan, PlannerError>;
}

pub struct ModelBackedPlanner {
    client: std::sync::Arc<dyn ModelClient>,
}

impl ModelBackedPlanner {
    pub fn new(client: std::sync::Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

const PLANNER_SYSTEM_PROMPT: &str = "You decompose a research question into 2-5 independent \
sub-questions. Respond with one sub-question per line, no numbering or commentary.";

#[async_trait]
impl Planner for ModelBackedPlanner {
    async fn plan(&self, query: &str, model: &ModelEntry) -> Result<ResearchPlan, PlannerError> {
        let response = self
            .client
            .complete(CompletionRequest {
                model_id: model.id.clone(),
                system_prompt: Some(PLANNER_SYSTEM_PROMPT.to_string()),
                messages: vec![ChatMessage {
                    role: Role::User,
                    content: query.to_string(),
                }],
                max_tokens: 512,
                temperature: 0.2,
            })
            .await
            .map_err(|e| PlannerError::ModelClient(e.to_string()))?;

        let sub_questions: Vec<String> = response
            .content
            .lines()
            .map(|l| l.trim().trim_start_matches(['-', '*']).trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        if sub_questions.is_empty() {
            return Err(PlannerError::EmptyPlan);
        }
        Ok(ResearchPlan {
            sub_questions,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::Catalog;
    use crate::models::client::MockModelClient;

    #[tokio::test]
    async fn plan_splits_on_lines() {
        let planner = ModelBackedPlanner::new(std::sync::Arc::new(MockModelClient));
        let catalog = Catalog::default_catalog();
        let model = catalog.list().into_iter().next().unwrap();
        let plan = planner.plan("what is rust's ownership model", &model).await.unwrap();
        assert!(!plan.sub_questions.is_empty());
    }
}
