//! Policy selection.
//!
//! A fixed selection matrix over complexity, novelty, and the caller's
//! declared [`Budget`], scoring a request against named research policies.

use crate::config::PolicyConfig;
use crate::types::{Budget, CostTier, PrivacyPreference};

/// One of the fixed research policies. Each implies a [`CostTier`] ceiling
/// and a time budget the orchestrator enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    QuickAnswer,
    StandardResearch,
    DeepResearch,
    Exhaustive,
    LocalOnly,
}

impl Policy {
    pub fn max_tier(self) -> CostTier {
        match self {
            Self::QuickAnswer => CostTier::VeryLow,
            Self::StandardResearch => CostTier::Low,
            Self::DeepResearch | Self::Exhaustive => CostTier::High,
            Self::LocalOnly => CostTier::VeryLow,
        }
    }

    fn config_key(self) -> &'static str {
        match self {
            Self::QuickAnswer => "quick-answer",
            Self::StandardResearch => "standard-research",
            Self::DeepResearch => "deep-research",
            Self::Exhaustive => "exhaustive",
            Self::LocalOnly => "local-only",
        }
    }
}

/// A scored request characterization feeding the selection matrix.
#[derive(Debug, Clone, Copy)]
pub struct RequestSignal {
    pub complexity: f64,
    pub novelty: f64,
}

/// Picks a [`Policy`] for a request given its complexity/novelty signal and
/// the caller's [`Budget`].
pub trait PolicySelector: Send + Sync {
    fn select(&self, signal: RequestSignal, budget: &Budget) -> Policy;

    /// Number of distinct models dispatched in parallel per sub-question
    /// under `policy`.
    fn ensemble_size(&self, policy: Policy) -> usize;
}

pub struct DefaultPolicySelector {
    config: PolicyConfig,
}

impl DefaultPolicySelector {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }
}

impl PolicySelector for DefaultPolicySelector {
    fn select(&self, signal: RequestSignal, budget: &Budget) -> Policy {
        if budget.privacy == PrivacyPreference::LocalFirst {
            return Policy::LocalOnly;
        }

        if signal.complexity < self.config.quick_answer_complexity_max
            && signal.novelty < self.config.quick_answer_novelty_max
        {
            return Policy::QuickAnswer;
        }

        if budget.time_budget_secs < self.config.standard_research_time_budget_secs {
            return Policy::StandardResearch;
        }

        if signal.novelty > self.config.deep_research_novelty_min {
            return if budget.time_budget_secs > self.config.standard_research_time_budget_secs * 4 {
                Policy::Exhaustive
            } else {
                Policy::DeepResearch
            };
        }

        Policy::StandardResearch
    }

    fn ensemble_size(&self, policy: Policy) -> usize {
        self.config
            .ensemble_size
            .get(policy.config_key())
            .copied()
            .unwrap_or(1)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(time_secs: u64, privacy: PrivacyPreference) -> Budget {
        Budget {
            time_budget_secs: time_secs,
            money_ceiling_usd: 1.0,
            privacy,
        }
    }

    #[test]
    fn low_complexity_low_novelty_is_quick_answer() {
        let selector = DefaultPolicySelector::new(PolicyConfig::default());
        let policy = selector.select(
            RequestSignal {
                complexity: 0.1,
                novelty: 0.1,
            },
            &budget(120, PrivacyPreference::Hybrid),
        );
        assert_eq!(policy, Policy::QuickAnswer);
    }

    #[test]
    fn local_first_always_wins() {
        let selector = DefaultPolicySelector::new(PolicyConfig::default());
        let policy = selector.select(
            RequestSignal {
                complexity: 0.9,
                novelty: 0.9,
            },
            &budget(600, PrivacyPreference::LocalFirst),
        );
        assert_eq!(policy, Policy::LocalOnly);
    }

    #[test]
    fn high_novelty_with_large_budget_is_exhaustive() {
        let selector = DefaultPolicySelector::new(PolicyConfig::default());
        let policy = selector.select(
            RequestSignal {
                complexity: 0.8,
                novelty: 0.9,
            },
            &budget(600, PrivacyPreference::Hybrid),
        );
        assert_eq!(policy, Policy::Exhaustive);
    }
}
