//! Cost/latency estimation and provider ranking.
//!
//! Everything here is a pure function of the query text, the mode profile
//! and the static catalog. Provider health is not consulted, so
//! identical inputs always produce identical estimates. The same ranking is
//! used by the router, which then filters by health.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::analyzer::QueryAnalyzer;
use crate::config::{ModeProfile, ModeTable};
use crate::registry::{ProviderCatalog, ProviderProfile};
use crate::state::types::{ExecutionMode, ProviderId, Subtask};

/// Prompt framing added to every call
const PROMPT_OVERHEAD_TOKENS: u32 = 50;

/// Fixed analysis + synthesis time
const PIPELINE_OVERHEAD_SECS: f64 = 0.5;

/// Predicted cost and wall-clock time of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// USD
    pub cost: f64,
    /// Seconds
    #[serde(rename = "eta")]
    pub estimated_seconds: f64,
}

/// Estimates for all three modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeEstimates {
    pub fast: Estimate,
    pub balanced: Estimate,
    pub best_quality: Estimate,
}

impl ModeEstimates {
    pub fn get(&self, mode: ExecutionMode) -> Estimate {
        match mode {
            ExecutionMode::Fast => self.fast,
            ExecutionMode::Balanced => self.balanced,
            ExecutionMode::BestQuality => self.best_quality,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub input: u32,
    pub output: u32,
}

/// Input tokens from a 4-chars-per-token heuristic plus prompt framing
pub fn token_estimate(content: &str, profile: &ModeProfile) -> TokenEstimate {
    let chars = content.chars().count() as u32;
    TokenEstimate {
        input: chars.div_ceil(4) + PROMPT_OVERHEAD_TOKENS,
        output: profile.output_tokens,
    }
}

/// Expected seconds for one call producing `output_tokens`
pub fn call_seconds(provider: &ProviderProfile, output_tokens: u32) -> f64 {
    provider.average_latency_secs * (1.0 + output_tokens as f64 / 1000.0)
}

/// How well one provider fits one subtask under a mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFit {
    pub provider: ProviderId,
    pub cost: f64,
    pub seconds: f64,
    pub reliability: f32,
}

impl ProviderFit {
    pub fn of(provider: &ProviderProfile, content: &str, profile: &ModeProfile) -> Self {
        let tokens = token_estimate(content, profile);
        Self {
            provider: provider.name.clone(),
            cost: provider.cost_for(tokens.input, tokens.output),
            seconds: call_seconds(provider, tokens.output),
            reliability: provider.reliability,
        }
    }
}

/// Order candidate fits best-first for `mode`.
///
/// - `fast`: cheapest, then quickest
/// - `balanced`: weighted normalised cost (0.5), latency (0.3), unreliability (0.2)
/// - `best_quality`: most reliable, then cheapest
///
/// Ties fall back to the mode's preferred-provider order, then name.
pub fn rank_fits(
    mut fits: Vec<ProviderFit>,
    mode: ExecutionMode,
    profile: &ModeProfile,
) -> Vec<ProviderFit> {
    let max_cost = fits.iter().map(|f| f.cost).fold(0.0, f64::max);
    let max_secs = fits.iter().map(|f| f.seconds).fold(0.0, f64::max);
    let norm = |value: f64, max: f64| if max > 0.0 { value / max } else { 0.0 };
    let balanced_score = |f: &ProviderFit| {
        0.5 * norm(f.cost, max_cost)
            + 0.3 * norm(f.seconds, max_secs)
            + 0.2 * (1.0 - f.reliability as f64)
    };

    let tie_break = |a: &ProviderFit, b: &ProviderFit| {
        profile
            .preference_rank(&a.provider)
            .cmp(&profile.preference_rank(&b.provider))
            .then_with(|| a.provider.cmp(&b.provider))
    };

    fits.sort_by(|a, b| {
        let primary = match mode {
            ExecutionMode::Fast => a
                .cost
                .total_cmp(&b.cost)
                .then_with(|| a.seconds.total_cmp(&b.seconds)),
            ExecutionMode::Balanced => balanced_score(a).total_cmp(&balanced_score(b)),
            ExecutionMode::BestQuality => b
                .reliability
                .total_cmp(&a.reliability)
                .then_with(|| a.cost.total_cmp(&b.cost)),
        };
        primary.then_with(|| tie_break(a, b))
    });
    fits
}

/// Reorder cheapest-first when the top choice would push `spent` past `limit`.
/// Returns whether the budget changed the order.
pub fn apply_budget(
    mut fits: Vec<ProviderFit>,
    spent: f64,
    limit: Option<f64>,
) -> (Vec<ProviderFit>, bool) {
    let over = match (limit, fits.first()) {
        (Some(limit), Some(top)) => spent + top.cost > limit,
        _ => false,
    };
    if over {
        fits.sort_by(|a, b| {
            a.cost
                .total_cmp(&b.cost)
                .then_with(|| a.seconds.total_cmp(&b.seconds))
                .then_with(|| a.provider.cmp(&b.provider))
        });
    }
    (fits, over)
}

/// Estimator over a fixed catalog and mode table
#[derive(Clone)]
pub struct CostEstimator {
    catalog: Arc<ProviderCatalog>,
    modes: ModeTable,
    analyzer: Arc<dyn QueryAnalyzer>,
}

impl CostEstimator {
    pub fn new(
        catalog: Arc<ProviderCatalog>,
        modes: ModeTable,
        analyzer: Arc<dyn QueryAnalyzer>,
    ) -> Self {
        Self {
            catalog,
            modes,
            analyzer,
        }
    }

    pub fn modes(&self) -> &ModeTable {
        &self.modes
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Capable providers for `subtask`, best-first for `mode`
    pub fn rank_for(&self, subtask: &Subtask, mode: ExecutionMode) -> Vec<ProviderFit> {
        let profile = self.modes.get(mode);
        let fits = self
            .catalog
            .capable_of(subtask.task_type)
            .into_iter()
            .map(|p| ProviderFit::of(p, &subtask.content, profile))
            .collect();
        rank_fits(fits, mode, profile)
    }

    /// Estimate one mode. Undecomposable text estimates to zero.
    pub fn estimate(&self, text: &str, mode: ExecutionMode) -> Estimate {
        let profile = self.modes.get(mode);
        let Ok(analysis) = self.analyzer.analyze(text, profile) else {
            return Estimate::default();
        };

        let mut cost = 0.0;
        let mut call_times = Vec::with_capacity(analysis.subtasks.len());
        for subtask in &analysis.subtasks {
            let (fits, _) = apply_budget(self.rank_for(subtask, mode), cost, profile.cost_limit);
            match fits.first() {
                Some(top) => {
                    cost += top.cost;
                    call_times.push(top.seconds);
                }
                None => call_times.push(0.0),
            }
        }

        let execution: f64 = call_times
            .chunks(profile.max_parallel.max(1))
            .map(|wave| wave.iter().copied().fold(0.0, f64::max))
            .sum();

        Estimate {
            cost,
            estimated_seconds: execution + PIPELINE_OVERHEAD_SECS,
        }
    }

    /// Estimate every mode
    pub fn estimate_all(&self, text: &str) -> ModeEstimates {
        ModeEstimates {
            fast: self.estimate(text, ExecutionMode::Fast),
            balanced: self.estimate(text, ExecutionMode::Balanced),
            best_quality: self.estimate(text, ExecutionMode::BestQuality),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::KeywordAnalyzer;
    use crate::registry::{Backend, DeploymentMode};
    use crate::state::types::TaskType;

    fn estimator() -> CostEstimator {
        CostEstimator::new(
            Arc::new(ProviderCatalog::builtin().for_deployment(DeploymentMode::Cloud)),
            ModeTable::default(),
            Arc::new(KeywordAnalyzer::new()),
        )
    }

    #[test]
    fn test_token_estimate() {
        let profile = ModeProfile::balanced();
        let tokens = token_estimate("abcdefghi", &profile);
        assert_eq!(tokens.input, 3 + 50);
        assert_eq!(tokens.output, 500);
    }

    #[test]
    fn test_fast_ranks_cheapest_first() {
        let est = estimator();
        let subtask = Subtask::new(0, "Explain closures", TaskType::Reasoning);
        let ranked = est.rank_for(&subtask, ExecutionMode::Fast);
        assert_eq!(ranked[0].provider, "huggingface-mistral-7b");
        for pair in ranked.windows(2) {
            assert!(pair[0].cost <= pair[1].cost);
        }
    }

    #[test]
    fn test_best_quality_ranks_most_reliable_first() {
        let est = estimator();
        let subtask = Subtask::new(0, "Explain closures", TaskType::Reasoning);
        let ranked = est.rank_for(&subtask, ExecutionMode::BestQuality);
        assert_eq!(ranked[0].provider, "openrouter-claude-3-sonnet");
        assert_eq!(ranked[1].provider, "openrouter-gpt4-turbo");
    }

    #[test]
    fn test_balanced_ranking_is_between_extremes() {
        let est = estimator();
        let subtask = Subtask::new(0, "Explain closures", TaskType::Reasoning);
        let top = &est.rank_for(&subtask, ExecutionMode::Balanced)[0];
        assert_ne!(top.provider, "openrouter-gpt4-turbo");
        assert!(top.reliability >= 0.9);
    }

    #[test]
    fn test_preference_breaks_ties() {
        let catalog = ProviderCatalog::from_profiles([
            ProviderProfile::new("zeta", Backend::Groq, "m"),
            ProviderProfile::new("alpha", Backend::Groq, "m"),
        ]);
        let mut profile = ModeProfile::fast();
        profile.preferred_providers = vec!["zeta".into()];
        let fits = catalog
            .providers()
            .map(|p| ProviderFit::of(p, "same", &profile))
            .collect();
        let ranked = rank_fits(fits, ExecutionMode::Fast, &profile);
        assert_eq!(ranked[0].provider, "zeta");
    }

    #[test]
    fn test_budget_reorders_cheapest_first() {
        let fits = vec![
            ProviderFit {
                provider: "pricey".into(),
                cost: 0.9,
                seconds: 1.0,
                reliability: 0.99,
            },
            ProviderFit {
                provider: "cheap".into(),
                cost: 0.1,
                seconds: 2.0,
                reliability: 0.8,
            },
        ];
        let (kept, over) = apply_budget(fits.clone(), 0.0, Some(1.0));
        assert!(!over);
        assert_eq!(kept[0].provider, "pricey");

        let (reordered, over) = apply_budget(fits, 0.5, Some(1.0));
        assert!(over);
        assert_eq!(reordered[0].provider, "cheap");
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let est = estimator();
        let queries = [
            "Explain quantum computing",
            "First research vector databases, then write a Python client, and finally compare costs",
            "1. summarize the paper 2. verify the claims 3. draft a poem about it",
        ];
        for query in queries {
            for mode in ExecutionMode::all() {
                assert_eq!(est.estimate(query, *mode), est.estimate(query, *mode));
            }
            assert_eq!(est.estimate_all(query), est.estimate_all(query));
        }
    }

    #[test]
    fn test_estimate_orders_modes_by_cost() {
        let est = estimator();
        let all = est.estimate_all(
            "First explain how TLS works, then write a Python function that opens a socket, \
             and finally write a poem about encryption",
        );
        assert!(all.fast.cost > 0.0);
        assert!(all.fast.cost <= all.balanced.cost);
        assert!(all.balanced.cost <= all.best_quality.cost);
        assert!(all.fast.estimated_seconds > PIPELINE_OVERHEAD_SECS);
    }

    #[test]
    fn test_empty_query_estimates_zero() {
        let est = estimator();
        assert_eq!(est.estimate("   ", ExecutionMode::Balanced), Estimate::default());
    }

    #[test]
    fn test_wire_shape() {
        let est = estimator();
        let value = serde_json::to_value(est.estimate_all("Explain monads")).unwrap();
        assert!(value["fast"]["cost"].is_number());
        assert!(value["best_quality"]["eta"].is_number());
    }
}
