//! Model catalog.
//!
//! [`Catalog`] is a read-mostly registry of the models available to the
//! [`super::client::ModelClient`], each tagged with its cost tier, domains,
//! context window, and modality, backing the tier/domain routing
//! [`crate::policy`] needs.

use std::collections::HashMap;
use thiserror::Error;

use crate::types::{CostTier, Modality};

#[derive(Debug, Error, Clone)]
pub enum ModelCatalogError {
    #[error("model not found: {0}")]
    NotFound(String),
    #[error("invalid catalog: {0}")]
    InvalidConfig(String),
}

/// A single entry in the catalog.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub tiers: Vec<CostTier>,
    pub domains: Vec<String>,
    pub context_len: usize,
    pub modality: Vec<Modality>,
    /// Provider key this entry is dispatched to by [`super::client::ModelClient`]
    /// (e.g. `"anthropic"`, `"openai"`, `"openrouter"`).
    pub provider: String,
    /// Approximate cost per 1K tokens in USD, used by the budget guard.
    pub cost_per_1k_tokens_usd: f64,
}

/// Central registry of models available to the orchestrator.
///
/// Invariant: at least one model must be registered for each `CostTier`
/// the deployment's [`crate::config::PolicyConfig`] can select, otherwise
/// [`Catalog::validate`] fails.
#[derive(Debug, Clone)]
pub struct Catalog {
    models: HashMap<String, ModelEntry>,
}

impl Catalog {
    pub fn new(models: Vec<ModelEntry>) -> Result<Self, ModelCatalogError> {
        let map = models.into_iter().map(|m| (m.id.clone(), m)).collect();
        let catalog = Self { models: map };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The built-in default catalog, used when no `MODEL_CATALOG_PATH` is
    /// configured. Mirrors the commonly reachable tiers without depending
    /// on any single provider being configured.
    pub fn default_catalog() -> Self {
        let models = vec![
            ModelEntry {
                id: "claude-haiku".into(),
                tiers: vec![CostTier::VeryLow, CostTier::Low],
                domains: vec!["general".into()],
                context_len: 200_000,
                modality: vec![Modality::Text],
                provider: "anthropic".into(),
                cost_per_1k_tokens_usd: 0.001,
            },
            ModelEntry {
                id: "claude-sonnet".into(),
                tiers: vec![CostTier::Low, CostTier::High],
                domains: vec!["general".into(), "code".into(), "research".into()],
                context_len: 200_000,
                modality: vec![Modality::Text, Modality::Vision],
                provider: "anthropic".into(),
                cost_per_1k_tokens_usd: 0.015,
            },
            ModelEntry {
                id: "gpt-4o-mini".into(),
                tiers: vec![CostTier::VeryLow, CostTier::Low],
                domains: vec!["general".into()],
                context_len: 128_000,
                modality: vec![Modality::Text, Modality::Vision],
                provider: "openai".into(),
                cost_per_1k_tokens_usd: 0.002,
            },
            ModelEntry {
                id: "gpt-4o".into(),
                tiers: vec![CostTier::High],
                domains: vec!["general".into(), "research".into()],
                context_len: 128_000,
                modality: vec![Modality::Text, Modality::Vision],
                provider: "openai".into(),
                cost_per_1k_tokens_usd: 0.03,
            },
        ];
        Self {
            models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelCatalogError> {
        let models: Vec<ModelEntry> =
            serde_json::from_str(raw).map_err(|e| ModelCatalogError::InvalidConfig(e.to_string()))?;
        Self::new(models)
    }

    fn validate(&self) -> Result<(), ModelCatalogError> {
        for tier in [CostTier::VeryLow, CostTier::Low, CostTier::High] {
            if !self.models.values().any(|m| m.tiers.contains(&tier)) {
                return Err(ModelCatalogError::InvalidConfig(format!(
                    "no model registered for tier {tier:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&ModelEntry, ModelCatalogError> {
        self.models.get(id).ok_or_else(|| ModelCatalogError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<ModelEntry> {
        let mut entries: Vec<_> = self.models.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Candidate models matching a tier and, optionally, a domain, ordered
    /// cheapest first. Used by [`crate::policy`] and the planner/researcher
    /// to pick a concrete model for a [`CostTier`] decision.
    pub fn candidates(&self, tier: CostTier, domain: Option<&str>) -> Vec<ModelEntry> {
        let mut entries: Vec<ModelEntry> = self
            .models
            .values()
            .filter(|m| m.tiers.contains(&tier))
            .filter(|m| domain.map(|d| m.domains.iter().any(|md| md == d)).unwrap_or(true))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.cost_per_1k_tokens_usd
                .partial_cmp(&b.cost_per_1k_tokens_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_every_tier() {
        let catalog = Catalog::default_catalog();
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn candidates_are_cheapest_first() {
        let catalog = Catalog::default_catalog();
        let candidates = catalog.candidates(CostTier::Low, None);
        assert!(!candidates.is_empty());
        for pair in candidates.windows(2) {
            assert!(pair[0].cost_per_1k_tokens_usd <= pair[1].cost_per_1k_tokens_usd);
        }
    }
}
