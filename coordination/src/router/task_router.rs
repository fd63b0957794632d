//! Subtask to provider assignment
//!
//! Ranks capable providers with the estimator, then walks the ranking as a
//! [`FallbackLadder`] against live breaker state. Every routing decision is
//! made before execution starts; a subtask with no admissible provider is
//! failed on the spot without touching any breaker.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::circuit_breaker::{FallbackLadder, SharedHealthRegistry};
use crate::estimator::{apply_budget, CostEstimator};
use crate::state::types::{ExecutionMode, ProviderId, Subtask, SubtaskId};

/// One routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingAssignment {
    pub subtask_id: SubtaskId,
    pub provider: Option<ProviderId>,
    pub estimated_cost: f64,
    pub reason: String,
}

impl RoutingAssignment {
    pub fn is_routed(&self) -> bool {
        self.provider.is_some()
    }
}

/// Outcome of routing a whole request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingReport {
    pub assignments: Vec<RoutingAssignment>,
    /// Estimated USD for the routed subtasks
    pub estimated_cost: f64,
}

impl RoutingReport {
    pub fn routed_count(&self) -> usize {
        self.assignments.iter().filter(|a| a.is_routed()).count()
    }

    pub fn unroutable_count(&self) -> usize {
        self.assignments.len() - self.routed_count()
    }
}

pub struct TaskRouter {
    estimator: Arc<CostEstimator>,
    health: SharedHealthRegistry,
}

impl TaskRouter {
    pub fn new(estimator: Arc<CostEstimator>, health: SharedHealthRegistry) -> Self {
        Self { estimator, health }
    }

    /// Assign a provider to every subtask, in index order.
    ///
    /// Claims a half-open probe slot for any provider it picks in that state;
    /// callers that end up not dispatching must hand those back with
    /// [`release`](Self::release).
    pub fn route(&self, subtasks: &mut [Subtask], mode: ExecutionMode) -> RoutingReport {
        let profile = self.estimator.modes().get(mode);
        let mut report = RoutingReport::default();

        for subtask in subtasks.iter_mut() {
            let ranked = self.estimator.rank_for(subtask, mode);
            if ranked.is_empty() {
                let reason = format!("no provider supports {}", subtask.task_type);
                warn!(subtask_id = %subtask.id, task_type = %subtask.task_type, "Subtask unroutable");
                subtask.fail(format!("router: {reason}"));
                report.assignments.push(RoutingAssignment {
                    subtask_id: subtask.id.clone(),
                    provider: None,
                    estimated_cost: 0.0,
                    reason,
                });
                continue;
            }

            let (ranked, over_budget) =
                apply_budget(ranked, report.estimated_cost, profile.cost_limit);
            let ladder = FallbackLadder::new(ranked.iter().map(|f| f.provider.clone()).collect());

            let Some(chosen) = ladder.acquire_next(&self.health) else {
                let reason = format!(
                    "all {} capable providers unavailable (circuit open)",
                    ranked.len()
                );
                warn!(subtask_id = %subtask.id, task_type = %subtask.task_type, "Subtask unroutable");
                subtask.fail(format!("router: {reason}"));
                report.assignments.push(RoutingAssignment {
                    subtask_id: subtask.id.clone(),
                    provider: None,
                    estimated_cost: 0.0,
                    reason,
                });
                continue;
            };

            let position = ranked
                .iter()
                .position(|f| f.provider == chosen)
                .unwrap_or(0);
            let fit = &ranked[position];
            let reason = match (position, over_budget) {
                (0, false) => format!("top ranked for {mode}"),
                (0, true) => "cheapest candidate, cost limit reached".to_string(),
                (skipped, _) => format!(
                    "fallback past {skipped} unavailable provider(s): {}",
                    ranked[..skipped]
                        .iter()
                        .map(|f| f.provider.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            };

            debug!(subtask_id = %subtask.id, provider = %fit.provider, %reason, "Subtask routed");
            report.estimated_cost += fit.cost;
            subtask.assigned_provider = Some(fit.provider.clone());
            report.assignments.push(RoutingAssignment {
                subtask_id: subtask.id.clone(),
                provider: Some(fit.provider.clone()),
                estimated_cost: fit.cost,
                reason,
            });
        }

        report
    }

    /// Hand back probe slots claimed during routing for subtasks that will
    /// not be dispatched.
    pub fn release(&self, subtasks: &[Subtask]) {
        for provider in subtasks.iter().filter_map(|s| s.assigned_provider.as_deref()) {
            self.health.release_probe(provider);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::KeywordAnalyzer;
    use crate::config::{BreakerSettings, ModeTable};
    use crate::registry::{Backend, ProviderCatalog, ProviderProfile};
    use crate::router::circuit_breaker::{CircuitState, ProviderHealthRegistry};
    use crate::state::types::{SubtaskStatus, TaskType};

    fn catalog() -> ProviderCatalog {
        ProviderCatalog::from_profiles([
            ProviderProfile::new("cheap", Backend::Groq, "small")
                .with_capabilities(&[TaskType::Reasoning, TaskType::CodeGeneration])
                .with_pricing(0.1e-6, 0.1e-6)
                .with_latency(1.0)
                .with_reliability(0.8),
            ProviderProfile::new("strong", Backend::OpenRouter, "large")
                .with_capabilities(&[TaskType::Reasoning])
                .with_pricing(5e-6, 15e-6)
                .with_latency(2.0)
                .with_reliability(0.98),
        ])
    }

    fn router(health: SharedHealthRegistry) -> TaskRouter {
        let estimator = CostEstimator::new(
            Arc::new(catalog()),
            ModeTable::default(),
            Arc::new(KeywordAnalyzer::new()),
        );
        TaskRouter::new(Arc::new(estimator), health)
    }

    fn registry() -> SharedHealthRegistry {
        ProviderHealthRegistry::new(BreakerSettings {
            failure_threshold: 2,
            ..BreakerSettings::default()
        })
        .shared()
    }

    #[test]
    fn test_mode_biases_choice() {
        let health = registry();
        let router = router(health);

        let mut fast = vec![Subtask::new(0, "Explain borrowing", TaskType::Reasoning)];
        router.route(&mut fast, ExecutionMode::Fast);
        assert_eq!(fast[0].assigned_provider.as_deref(), Some("cheap"));

        let mut best = vec![Subtask::new(0, "Explain borrowing", TaskType::Reasoning)];
        let report = router.route(&mut best, ExecutionMode::BestQuality);
        assert_eq!(best[0].assigned_provider.as_deref(), Some("strong"));
        assert_eq!(report.assignments[0].reason, "top ranked for best_quality");
    }

    #[test]
    fn test_open_circuit_falls_back() {
        let health = registry();
        health.record_outcome("strong", false);
        health.record_outcome("strong", false);
        assert_eq!(health.state("strong"), CircuitState::Open);

        let router = router(health);
        let mut subtasks = vec![Subtask::new(0, "Explain borrowing", TaskType::Reasoning)];
        let report = router.route(&mut subtasks, ExecutionMode::BestQuality);
        assert_eq!(subtasks[0].assigned_provider.as_deref(), Some("cheap"));
        assert!(report.assignments[0].reason.contains("strong"));
    }

    #[test]
    fn test_all_open_fails_subtask_without_breaker_count() {
        let health = registry();
        for _ in 0..2 {
            health.record_outcome("cheap", false);
        }
        let router = router(health.clone());
        let mut subtasks = vec![
            Subtask::new(0, "Write a parser", TaskType::CodeGeneration),
            Subtask::new(1, "Explain parsing", TaskType::Reasoning),
        ];
        let report = router.route(&mut subtasks, ExecutionMode::Balanced);

        assert_eq!(subtasks[0].status, SubtaskStatus::Failed);
        assert!(subtasks[0].error.as_deref().unwrap().starts_with("router:"));
        assert!(subtasks[0].assigned_provider.is_none());
        assert_eq!(subtasks[1].assigned_provider.as_deref(), Some("strong"));
        assert_eq!(report.routed_count(), 1);
        assert_eq!(report.unroutable_count(), 1);
        assert_eq!(health.failure_count("cheap"), 2);
    }

    #[test]
    fn test_unsupported_task_type() {
        let router = router(registry());
        let mut subtasks = vec![Subtask::new(0, "Draw a cat", TaskType::ImageGeneration)];
        let report = router.route(&mut subtasks, ExecutionMode::Fast);
        assert_eq!(subtasks[0].status, SubtaskStatus::Failed);
        assert!(report.assignments[0].reason.contains("image_generation"));
    }

    #[test]
    fn test_cost_limit_switches_to_cheapest() {
        let mut modes = ModeTable::default();
        modes.best_quality.cost_limit = Some(0.02);
        let estimator = CostEstimator::new(
            Arc::new(catalog()),
            modes,
            Arc::new(KeywordAnalyzer::new()),
        );
        let router = TaskRouter::new(Arc::new(estimator), registry());

        let mut subtasks: Vec<Subtask> = (0..3)
            .map(|i| Subtask::new(i, "Explain the proof", TaskType::Reasoning))
            .collect();
        let report = router.route(&mut subtasks, ExecutionMode::BestQuality);
        // 800 output tokens at 15e-6 is ~0.012 per call on "strong"
        assert_eq!(subtasks[0].assigned_provider.as_deref(), Some("strong"));
        assert_eq!(subtasks[1].assigned_provider.as_deref(), Some("cheap"));
        assert!(report.assignments[1].reason.contains("cost limit"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_claimed_once_and_released() {
        let health = registry();
        let router = router(health.clone());
        health.record_outcome("strong", false);
        health.record_outcome("strong", false);
        tokio::time::advance(std::time::Duration::from_secs(31)).await;
        assert_eq!(health.state("strong"), CircuitState::HalfOpen);

        let mut subtasks: Vec<Subtask> = (0..2)
            .map(|i| Subtask::new(i, "Explain the proof", TaskType::Reasoning))
            .collect();
        router.route(&mut subtasks, ExecutionMode::BestQuality);
        assert_eq!(subtasks[0].assigned_provider.as_deref(), Some("strong"));
        assert_eq!(subtasks[1].assigned_provider.as_deref(), Some("cheap"));
        assert!(!health.is_available("strong"));

        router.release(&subtasks);
        assert!(health.is_available("strong"));
        assert_eq!(health.state("cheap"), CircuitState::Closed);
    }
}
