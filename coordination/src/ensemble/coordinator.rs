//! Execution coordinator: concurrent dispatch of routed subtasks
//!
//! Every routed subtask is spawned at once and the stage waits for all of
//! them (a barrier, not a race). Concurrency is bounded twice: by the mode's
//! `max_parallel` for this request and by a process-wide `max_in_flight`
//! semaphore shared by all requests.
//!
//! Each call gets the mode's timeout and at most one retry on a transient
//! error. The breaker sees exactly one outcome per dispatched subtask, the
//! final one, recorded by the call task itself so it lands even when nobody
//! is left to collect the result.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ModeProfile;
use crate::providers::{
    CompletionRequest, CompletionResponse, ProviderError, ProviderPool, SharedProviderClient,
};
use crate::registry::{ProviderCatalog, ProviderProfile};
use crate::router::SharedHealthRegistry;
use crate::state::types::{ExecutionResult, ProviderId, Subtask, SubtaskStatus};

/// Shared reference to ExecutionCoordinator
pub type SharedExecutionCoordinator = Arc<ExecutionCoordinator>;

/// What one dispatched call came back with
struct CallOutcome {
    response: Result<CompletionResponse, ProviderError>,
    attempts: u32,
    latency: Duration,
}

fn estimated_tokens(chars: usize) -> u32 {
    (chars as u32).div_ceil(4)
}

pub struct ExecutionCoordinator {
    catalog: Arc<ProviderCatalog>,
    pool: ProviderPool,
    health: SharedHealthRegistry,
    in_flight: Arc<Semaphore>,
}

impl ExecutionCoordinator {
    pub fn new(
        catalog: Arc<ProviderCatalog>,
        pool: ProviderPool,
        health: SharedHealthRegistry,
        max_in_flight: usize,
    ) -> Self {
        Self {
            catalog,
            pool,
            health,
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Create a shared reference to this coordinator
    pub fn shared(self) -> SharedExecutionCoordinator {
        Arc::new(self)
    }

    /// One dispatched call, reported to the breaker before it returns
    async fn dispatch(
        health: SharedHealthRegistry,
        client: SharedProviderClient,
        request: CompletionRequest,
        timeout: Duration,
        retry_transient: bool,
        request_permits: Arc<Semaphore>,
        global_permits: Arc<Semaphore>,
    ) -> CallOutcome {
        let outcome = Self::call_with_retry(
            client,
            &request,
            timeout,
            retry_transient,
            request_permits,
            global_permits,
        )
        .await;
        health.record_call(
            &request.provider,
            outcome.response.is_ok(),
            Some(outcome.latency),
        );
        outcome
    }

    async fn call_with_retry(
        client: SharedProviderClient,
        request: &CompletionRequest,
        timeout: Duration,
        retry_transient: bool,
        request_permits: Arc<Semaphore>,
        global_permits: Arc<Semaphore>,
    ) -> CallOutcome {
        // Closed semaphores are never produced here; a failed acquire just
        // runs the call unthrottled.
        let _request_permit = request_permits.acquire_owned().await.ok();
        let _global_permit = global_permits.acquire_owned().await.ok();

        let started = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let response = match tokio::time::timeout(timeout, client.complete(request)).await {
                Ok(response) => response,
                Err(_) => Err(ProviderError::Timeout(timeout)),
            };
            match response {
                Err(err) if err.is_transient() && retry_transient && attempts == 1 => {
                    warn!(provider = %request.provider, error = %err, "Transient failure, retrying once");
                }
                response => {
                    return CallOutcome {
                        response,
                        attempts,
                        latency: started.elapsed(),
                    }
                }
            }
        }
    }

    fn incurred_cost(
        profile: &ProviderProfile,
        request: &CompletionRequest,
        response: &CompletionResponse,
    ) -> f64 {
        let input = response.input_tokens.unwrap_or_else(|| {
            estimated_tokens(request.system.chars().count() + request.prompt.chars().count())
        });
        let output = response
            .output_tokens
            .unwrap_or_else(|| estimated_tokens(response.content.chars().count()));
        profile.cost_for(input, output)
    }

    fn failed_result(subtask: &Subtask, provider: &str, error: String, attempts: u32) -> ExecutionResult {
        ExecutionResult {
            subtask_id: subtask.id.clone(),
            provider: Some(provider.to_string()),
            raw_output: None,
            confidence: 0.0,
            latency_ms: 0,
            cost: 0.0,
            error: Some(error),
            attempts,
            completed_at: Utc::now(),
        }
    }

    /// Execute every routed subtask and return one result per subtask, in
    /// index order. Subtasks are updated in place.
    ///
    /// `on_progress(completed, total, active_providers)` runs after each
    /// subtask finishes; `completed` counts routing failures too.
    pub async fn execute(
        &self,
        subtasks: &mut [Subtask],
        profile: &ModeProfile,
        mut on_progress: impl FnMut(usize, usize, Vec<ProviderId>),
    ) -> Vec<ExecutionResult> {
        let total = subtasks.len();
        let mut results: Vec<Option<ExecutionResult>> = vec![None; total];
        let request_permits = Arc::new(Semaphore::new(profile.max_parallel.max(1)));
        let mut in_flight = FuturesUnordered::new();
        let mut running: Vec<Option<ProviderId>> = vec![None; total];
        let mut requests: Vec<Option<CompletionRequest>> = vec![None; total];

        for (pos, subtask) in subtasks.iter_mut().enumerate() {
            let Some(provider) = subtask.assigned_provider.clone() else {
                results[pos] = Some(ExecutionResult::unrouted(subtask));
                continue;
            };
            let (Some(client), Some(provider_profile)) =
                (self.pool.get(&provider), self.catalog.get(&provider))
            else {
                // Nothing was called, so the breaker is not charged
                self.health.release_probe(&provider);
                subtask.fail(format!("coordinator: no client for provider {provider}"));
                results[pos] = Some(ExecutionResult::unrouted(subtask));
                continue;
            };

            let request =
                CompletionRequest::for_subtask(subtask, provider_profile, profile.output_tokens);
            subtask.status = SubtaskStatus::Processing;
            subtask.start_time = Some(Utc::now());
            running[pos] = Some(provider.clone());
            requests[pos] = Some(request.clone());

            let handle = tokio::spawn(Self::dispatch(
                self.health.clone(),
                client,
                request,
                profile.timeout(),
                profile.retry_transient,
                request_permits.clone(),
                self.in_flight.clone(),
            ));
            in_flight.push(async move { (pos, handle.await) });
        }

        let mut completed = total - in_flight.len();
        info!(dispatched = in_flight.len(), unrouted = completed, total, "Execution started");
        if completed > 0 {
            on_progress(completed, total, Self::active(&running));
        }

        while let Some((pos, joined)) = in_flight.next().await {
            let subtask = &mut subtasks[pos];
            let provider = running[pos].take().unwrap_or_default();
            let result = match joined {
                Ok(outcome) => {
                    match outcome.response {
                        Ok(response) => {
                            let provider_profile = self.catalog.get(&provider);
                            let cost = match (provider_profile, requests[pos].as_ref()) {
                                (Some(p), Some(request)) => {
                                    Self::incurred_cost(p, request, &response)
                                }
                                _ => 0.0,
                            };
                            let confidence = response
                                .confidence
                                .or(provider_profile.map(|p| p.reliability))
                                .unwrap_or(0.0)
                                .clamp(0.0, 1.0);
                            ExecutionResult {
                                subtask_id: subtask.id.clone(),
                                provider: Some(provider.clone()),
                                raw_output: Some(response.content),
                                confidence,
                                latency_ms: outcome.latency.as_millis() as u64,
                                cost,
                                error: None,
                                attempts: outcome.attempts,
                                completed_at: Utc::now(),
                            }
                        }
                        Err(err) => {
                            warn!(
                                subtask_id = %subtask.id,
                                provider = %provider,
                                kind = err.kind(),
                                attempts = outcome.attempts,
                                "Subtask failed"
                            );
                            let mut failed = Self::failed_result(
                                subtask,
                                &provider,
                                err.to_string(),
                                outcome.attempts,
                            );
                            failed.latency_ms = outcome.latency.as_millis() as u64;
                            failed
                        }
                    }
                }
                Err(join_error) => {
                    // A panicking call never reached its own breaker report
                    error!(subtask_id = %subtask.id, provider = %provider, "Provider task aborted: {}", join_error);
                    self.health.record_outcome(&provider, false);
                    Self::failed_result(subtask, &provider, format!("call aborted: {join_error}"), 1)
                }
            };

            subtask.end_time = Some(result.completed_at);
            if result.is_success() {
                subtask.status = SubtaskStatus::Completed;
                subtask.confidence = result.confidence;
                subtask.error = None;
            } else {
                subtask.status = SubtaskStatus::Failed;
                subtask.confidence = 0.0;
                subtask.error = result.error.clone();
            }
            debug!(subtask_id = %subtask.id, status = ?subtask.status, "Subtask finished");

            results[pos] = Some(result);
            completed += 1;
            on_progress(completed, total, Self::active(&running));
        }

        subtasks
            .iter()
            .zip(results)
            .map(|(subtask, result)| result.unwrap_or_else(|| ExecutionResult::unrouted(subtask)))
            .collect()
    }

    /// Distinct providers with a call still running, sorted
    fn active(running: &[Option<ProviderId>]) -> Vec<ProviderId> {
        running
            .iter()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
