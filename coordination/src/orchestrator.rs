//! Council: the request pipeline and its service surface
//!
//! ```text
//! submit ──► Analysis ──► Routing ──► Execution ──► Arbitration ──► Synthesis ──► persist
//!               │            │            │              │              │            │
//!               └────────────┴────────────┴──────────────┴──────────────┴────────────┴─► ProgressStream
//! ```
//!
//! One run is sequential across stages. Cancellation is checked between
//! stages; a call already dispatched finishes and is still reported to the
//! breaker. Fatal failures persist a `failed` (or `cancelled`) record and end
//! the stream with a single `error` event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analyzer::{KeywordAnalyzer, QueryAnalysis, QueryAnalyzer};
use crate::config::{CouncilConfig, ModeProfile};
use crate::ensemble::{ArbitrationLayer, ExecutionCoordinator, SynthesisLayer};
use crate::error::{CouncilError, CouncilResult};
use crate::estimator::{CostEstimator, ModeEstimates};
use crate::events::{
    EventBus, ProgressBroadcaster, ProgressPayload, ProgressStream, SharedEventBus, Stage,
};
use crate::providers::{ProviderPool, SharedProviderClient};
use crate::registry::ProviderCatalog;
use crate::router::{
    BackendChecker, HealthChecker, HttpBackendChecker, ProviderHealthRegistry, ProviderHealthReport,
    ProviderHealthSnapshot, SharedHealthRegistry, TaskRouter,
};
use crate::state::store::{JsonFileStore, MemoryRecordStore, SharedRecordStore};
use crate::state::types::{
    ExecutionMode, OrchestrationRecord, Query, RequestId, RequestStatus, Subtask,
};

/// A submitted request and the stream its progress arrives on
#[derive(Debug)]
pub struct Submission {
    pub request_id: RequestId,
    pub stream: ProgressStream,
}

/// Builder for [`Council`]
///
/// Every collaborator defaults from the configuration; tests inject their own.
pub struct CouncilBuilder {
    config: CouncilConfig,
    pool: Option<ProviderPool>,
    analyzer: Option<Arc<dyn QueryAnalyzer>>,
    store: Option<SharedRecordStore>,
    health: Option<SharedHealthRegistry>,
    backend_checker: Option<Arc<dyn BackendChecker>>,
    bus: Option<SharedEventBus>,
}

impl CouncilBuilder {
    pub fn new(config: CouncilConfig) -> Self {
        Self {
            config,
            pool: None,
            analyzer: None,
            store: None,
            health: None,
            backend_checker: None,
            bus: None,
        }
    }

    /// Use these clients instead of building HTTP clients from configuration
    pub fn with_pool(mut self, pool: ProviderPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Add one client to the injected pool
    pub fn with_client(mut self, client: SharedProviderClient) -> Self {
        self.pool.get_or_insert_with(ProviderPool::new).insert(client);
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn QueryAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_store(mut self, store: SharedRecordStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a health registry, e.g. between councils in one process
    pub fn with_health(mut self, health: SharedHealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// How backends are asked for their health; HTTP by default
    pub fn with_backend_checker(mut self, checker: Arc<dyn BackendChecker>) -> Self {
        self.backend_checker = Some(checker);
        self
    }

    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub async fn build(self) -> CouncilResult<Council> {
        let config = self.config;
        config.validate()?;

        let mut catalog = config.catalog();
        let pool = match self.pool {
            Some(pool) => pool,
            None => ProviderPool::from_config(&config, &catalog)?,
        };
        let before = catalog.len();
        catalog.retain(|p| pool.contains(&p.name));
        if catalog.is_empty() {
            warn!(
                deployment = ?config.deployment,
                "No callable providers; requests will fail until credentials are configured"
            );
        } else {
            info!(
                providers = catalog.len(),
                dropped = before - catalog.len(),
                "Provider catalog ready"
            );
        }
        let catalog = Arc::new(catalog);

        let store = match (self.store, &config.store_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => JsonFileStore::open(dir).await?.shared(),
            (None, None) => MemoryRecordStore::new().shared(),
        };
        let health = self
            .health
            .unwrap_or_else(|| ProviderHealthRegistry::from_config(&config).shared());
        let backends: Arc<dyn BackendChecker> = match self.backend_checker {
            Some(checker) => checker,
            None => Arc::new(HttpBackendChecker::new()?),
        };
        let checker = HealthChecker::from_config(&config, backends, health.clone());
        let bus = self.bus.unwrap_or_else(|| EventBus::new().shared());
        let analyzer = self
            .analyzer
            .unwrap_or_else(|| Arc::new(KeywordAnalyzer::new()));

        let estimator = Arc::new(CostEstimator::new(
            catalog.clone(),
            config.modes.clone(),
            analyzer.clone(),
        ));
        let router = TaskRouter::new(estimator.clone(), health.clone());
        let coordinator =
            ExecutionCoordinator::new(catalog.clone(), pool, health.clone(), config.max_in_flight);
        let arbitration = ArbitrationLayer::new(config.arbitration);

        Ok(Council {
            inner: Arc::new(CouncilInner {
                config,
                catalog,
                analyzer,
                estimator,
                router,
                coordinator,
                arbitration,
                synthesis: SynthesisLayer::new(),
                store,
                health,
                checker,
                bus,
                running: Mutex::new(HashMap::new()),
            }),
        })
    }
}

struct CouncilInner {
    config: CouncilConfig,
    catalog: Arc<ProviderCatalog>,
    analyzer: Arc<dyn QueryAnalyzer>,
    estimator: Arc<CostEstimator>,
    router: TaskRouter,
    coordinator: ExecutionCoordinator,
    arbitration: ArbitrationLayer,
    synthesis: SynthesisLayer,
    store: SharedRecordStore,
    health: SharedHealthRegistry,
    checker: HealthChecker,
    bus: SharedEventBus,
    running: Mutex<HashMap<RequestId, CancellationToken>>,
}

/// The orchestration service
#[derive(Clone)]
pub struct Council {
    inner: Arc<CouncilInner>,
}

impl Council {
    pub fn builder(config: CouncilConfig) -> CouncilBuilder {
        CouncilBuilder::new(config)
    }

    /// Start a request in the background and return its progress stream
    pub fn submit(
        &self,
        text: impl Into<String>,
        mode: ExecutionMode,
        requester: impl Into<String>,
    ) -> CouncilResult<Submission> {
        self.ensure_providers()?;
        let query = Query::new(text, mode, requester);
        let request_id = query.request_id.clone();
        let (broadcaster, stream) = ProgressBroadcaster::channel(request_id.clone());
        let broadcaster = broadcaster.with_bus(self.inner.bus.clone());
        let token = self.inner.register(&request_id);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let request_id = query.request_id.clone();
            let _ = inner.run(query, &broadcaster, &token).await;
            inner.unregister(&request_id);
        });

        Ok(Submission { request_id, stream })
    }

    /// Run a request to completion on the current task
    pub async fn process(
        &self,
        text: impl Into<String>,
        mode: ExecutionMode,
        requester: impl Into<String>,
    ) -> CouncilResult<OrchestrationRecord> {
        self.ensure_providers()?;
        let query = Query::new(text, mode, requester);
        let request_id = query.request_id.clone();
        let (broadcaster, _stream) = ProgressBroadcaster::channel(request_id.clone());
        let broadcaster = broadcaster.with_bus(self.inner.bus.clone());
        let token = self.inner.register(&request_id);

        let outcome = self.inner.run(query, &broadcaster, &token).await;
        self.inner.unregister(&request_id);
        outcome
    }

    /// Request cooperative cancellation. Returns false when the request is
    /// not running.
    pub fn cancel(&self, request_id: &str) -> bool {
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        match running.get(request_id) {
            Some(token) => {
                info!(request_id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cost and time estimates for every mode
    pub fn estimate(&self, text: &str) -> ModeEstimates {
        self.inner.estimator.estimate_all(text)
    }

    pub async fn get_result(&self, request_id: &str) -> CouncilResult<OrchestrationRecord> {
        self.inner
            .store
            .get(request_id)
            .await?
            .ok_or_else(|| CouncilError::NotFound(request_id.to_string()))
    }

    /// Remove a record; deleting a missing record is not an error
    pub async fn delete_record(&self, request_id: &str) -> CouncilResult<()> {
        let existed = self.inner.store.delete(request_id).await?;
        debug!(request_id, existed, "Record deleted");
        Ok(())
    }

    /// Records of `requester`, newest first
    pub async fn history(&self, requester: &str) -> CouncilResult<Vec<OrchestrationRecord>> {
        Ok(self.inner.store.list_by_requester(requester).await?)
    }

    /// Breaker state of every catalog provider
    pub fn provider_health(&self) -> Vec<ProviderHealthSnapshot> {
        self.inner
            .health
            .snapshot_of(self.inner.catalog.providers().map(|p| p.name.as_str()))
    }

    /// Ask every catalog provider's backend whether it answers, blended
    /// with breaker state. Backend results are reused for a minute.
    pub async fn check_providers(&self) -> Vec<ProviderHealthReport> {
        self.inner.checker.check(self.inner.catalog.providers()).await
    }

    /// Force a provider's breaker closed. Returns false for unknown providers.
    pub fn reset_provider(&self, provider: &str) -> bool {
        if self.inner.catalog.get(provider).is_none() {
            return false;
        }
        self.inner.health.reset(provider);
        true
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.inner.catalog
    }

    pub fn config(&self) -> &CouncilConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> SharedEventBus {
        self.inner.bus.clone()
    }

    pub fn health_registry(&self) -> SharedHealthRegistry {
        self.inner.health.clone()
    }

    fn ensure_providers(&self) -> CouncilResult<()> {
        if self.inner.catalog.is_empty() {
            return Err(CouncilError::NoProviders(format!(
                "no {:?} provider has credentials configured",
                self.inner.config.deployment
            )));
        }
        Ok(())
    }
}

impl CouncilInner {
    fn register(&self, request_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(request_id.to_string(), token.clone());
        token
    }

    fn unregister(&self, request_id: &str) {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(request_id);
    }

    fn analyze(&self, text: &str, profile: &ModeProfile) -> CouncilResult<QueryAnalysis> {
        let analysis = self.analyzer.analyze(text, profile)?;
        analysis.validate()?;
        Ok(analysis)
    }

    /// Persist a terminal failure and end the stream with an `error` event
    async fn abort(
        &self,
        mut record: OrchestrationRecord,
        broadcaster: &ProgressBroadcaster,
        stage: Stage,
        err: CouncilError,
        started: Instant,
    ) -> CouncilResult<OrchestrationRecord> {
        record.status = match err {
            CouncilError::Cancelled(_) => RequestStatus::Cancelled,
            _ => RequestStatus::Failed,
        };
        record.failure_reason = Some(err.to_string());
        record.execution_time_ms = started.elapsed().as_millis() as u64;

        match record.status {
            RequestStatus::Cancelled => {
                info!(request_id = %record.request_id, %stage, "Request cancelled")
            }
            _ => warn!(request_id = %record.request_id, %stage, kind = err.kind(), "Request failed: {}", err),
        }
        if let Err(store_err) = self.store.put(&record).await {
            error!(request_id = %record.request_id, "Failed to persist record: {}", store_err);
        }

        broadcaster.emit(ProgressPayload::Error {
            stage,
            kind: err.kind().to_string(),
            reason: err.to_string(),
        });
        Err(err)
    }

    async fn run(
        &self,
        query: Query,
        broadcaster: &ProgressBroadcaster,
        cancel: &CancellationToken,
    ) -> CouncilResult<OrchestrationRecord> {
        let started = Instant::now();
        let mut record = OrchestrationRecord::for_query(&query);
        let profile = self.config.modes.get(query.mode).clone();
        let cancelled = || CouncilError::Cancelled(query.request_id.clone());

        info!(request_id = %query.request_id, mode = %query.mode, "Request started");
        broadcaster.emit(ProgressPayload::AnalysisStarted {
            request_id: query.request_id.clone(),
            mode: query.mode,
        });

        // Analysis
        let analysis = match self.analyze(&query.text, &profile) {
            Ok(analysis) => analysis,
            Err(err) => {
                return self
                    .abort(record, broadcaster, Stage::Analysis, err, started)
                    .await
            }
        };
        info!(
            request_id = %query.request_id,
            subtasks = analysis.subtasks.len(),
            complexity = ?analysis.complexity,
            "Analysis complete"
        );
        broadcaster.emit(ProgressPayload::AnalysisComplete {
            subtask_count: analysis.subtasks.len(),
            task_types: analysis.task_types.clone(),
            intent: analysis.intent,
            complexity: analysis.complexity,
        });
        let mut subtasks: Vec<Subtask> = analysis.subtasks;

        // Routing
        if cancel.is_cancelled() {
            record.subtasks = subtasks;
            return self
                .abort(record, broadcaster, Stage::Routing, cancelled(), started)
                .await;
        }
        let report = self.router.route(&mut subtasks, query.mode);
        info!(
            request_id = %query.request_id,
            routed = report.routed_count(),
            unroutable = report.unroutable_count(),
            estimated_cost = report.estimated_cost,
            "Routing complete"
        );
        broadcaster.emit(ProgressPayload::RoutingComplete {
            assignments: report.assignments,
        });

        // Execution
        if cancel.is_cancelled() {
            self.router.release(&subtasks);
            record.subtasks = subtasks;
            return self
                .abort(record, broadcaster, Stage::Execution, cancelled(), started)
                .await;
        }
        let results = self
            .coordinator
            .execute(&mut subtasks, &profile, |completed, total, active| {
                broadcaster.emit(ProgressPayload::ExecutionProgress {
                    completed_subtasks: completed,
                    total_subtasks: total,
                    active_models: active,
                });
            })
            .await;
        record.subtasks = subtasks.clone();
        record.aggregate_cost = crate::ensemble::aggregate_cost(&results);

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            request_id = %query.request_id,
            succeeded,
            failed = results.len() - succeeded,
            "Execution complete"
        );
        if succeeded == 0 {
            let err = CouncilError::TotalExecutionFailure(results.len());
            return self
                .abort(record, broadcaster, Stage::Execution, err, started)
                .await;
        }

        // Arbitration
        if cancel.is_cancelled() {
            return self
                .abort(record, broadcaster, Stage::Arbitration, cancelled(), started)
                .await;
        }
        let arbitration = self.arbitration.arbitrate(&subtasks, &results, &profile);
        for decision in &arbitration.decisions {
            broadcaster.emit(ProgressPayload::ArbitrationDecision(decision.clone()));
        }
        record.arbitration_decisions = arbitration
            .decisions
            .iter()
            .map(|d| d.to_string())
            .collect();

        // Synthesis
        if cancel.is_cancelled() {
            return self
                .abort(record, broadcaster, Stage::Synthesis, cancelled(), started)
                .await;
        }
        let output =
            self.synthesis
                .synthesize(&subtasks, &results, &arbitration, |composed, total, note| {
                    broadcaster.emit(ProgressPayload::SynthesisProgress {
                        composed,
                        total,
                        note: note.to_string(),
                    });
                });

        record.status = RequestStatus::Completed;
        record.synthesis_notes = output.notes;
        record.final_answer = output.final_answer;
        record.aggregate_confidence = output.aggregate_confidence;
        record.aggregate_cost = output.aggregate_cost;
        record.models_used = output.models_used;
        record.execution_time_ms = started.elapsed().as_millis() as u64;

        if let Err(err) = self.store.put(&record).await {
            let err = CouncilError::from(err);
            broadcaster.emit(ProgressPayload::Error {
                stage: Stage::Complete,
                kind: err.kind().to_string(),
                reason: err.to_string(),
            });
            error!(request_id = %record.request_id, "Failed to persist record: {}", err);
            return Err(err);
        }

        info!(
            request_id = %record.request_id,
            confidence = record.aggregate_confidence,
            cost = record.aggregate_cost,
            elapsed_ms = record.execution_time_ms,
            "Request complete"
        );
        broadcaster.emit(ProgressPayload::FinalResponse(Box::new(record.clone())));
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionRequest, CompletionResponse, ProviderClient, ProviderError};
    use crate::config::Endpoint;
    use crate::registry::{Backend, ProviderProfile};
    use crate::router::{BackendCheck, CircuitState, HealthStatus};
    use crate::state::types::TaskType;
    use async_trait::async_trait;

    struct Echo(&'static str);

    #[async_trait]
    impl ProviderClient for Echo {
        fn name(&self) -> &str {
            self.0
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse::text(format!("answer to {}", request.prompt)).with_confidence(0.9))
        }
    }

    fn config() -> CouncilConfig {
        CouncilConfig {
            providers: vec![ProviderProfile::new("echo", Backend::Groq, "m")
                .with_capabilities(TaskType::all())
                .with_pricing(1e-6, 1e-6)],
            ..CouncilConfig::default()
        }
    }

    async fn council() -> Council {
        Council::builder(config())
            .with_client(Arc::new(Echo("echo")))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_catalog_limited_to_pool() {
        let council = council().await;
        assert_eq!(council.catalog().names(), vec!["echo".to_string()]);
        assert_eq!(council.provider_health().len(), 1);
    }

    struct Unauthorized;

    #[async_trait]
    impl BackendChecker for Unauthorized {
        async fn check(&self, _backend: Backend, endpoint: &Endpoint) -> BackendCheck {
            assert_eq!(endpoint.base_url, Backend::Groq.default_base_url());
            BackendCheck {
                status: HealthStatus::Degraded,
                checked_at: chrono::Utc::now(),
                response_time_ms: Some(40),
                error: Some("HTTP 401".into()),
            }
        }
    }

    #[tokio::test]
    async fn test_check_providers_uses_injected_checker() {
        let council = Council::builder(config())
            .with_client(Arc::new(Echo("echo")))
            .with_backend_checker(Arc::new(Unauthorized))
            .build()
            .await
            .unwrap();
        let reports = council.check_providers().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].provider, "echo");
        assert_eq!(reports[0].status, HealthStatus::Degraded);
        assert_eq!(reports[0].circuit_state, CircuitState::Closed);

        for _ in 0..5 {
            council.health_registry().record_outcome("echo", false);
        }
        let reports = council.check_providers().await;
        assert_eq!(reports[0].status, HealthStatus::Down);
        assert_eq!(reports[0].error.as_deref(), Some("HTTP 401"));
    }

    #[tokio::test]
    async fn test_process_persists_completed_record() {
        let council = council().await;
        let record = council
            .process("What is a monad?", ExecutionMode::Fast, "alice")
            .await
            .unwrap();
        assert_eq!(record.status, RequestStatus::Completed);
        assert_eq!(record.models_used, vec!["echo"]);
        assert!(record.final_answer.contains("What is a monad?"));

        let stored = council.get_result(&record.request_id).await.unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn test_empty_query_fails_and_is_recorded() {
        let council = council().await;
        let err = council
            .process("   ", ExecutionMode::Balanced, "alice")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "decomposition_failed");

        let history = council.history("alice").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RequestStatus::Failed);
        assert!(history[0].subtasks.is_empty());
    }

    #[tokio::test]
    async fn test_no_callable_providers() {
        let council = Council::builder(CouncilConfig::default())
            .with_pool(ProviderPool::new())
            .build()
            .await
            .unwrap();
        let err = council
            .submit("hello", ExecutionMode::Fast, "bob")
            .unwrap_err();
        assert_eq!(err.kind(), "no_providers");
    }

    #[tokio::test]
    async fn test_get_missing_and_cancel_unknown() {
        let council = council().await;
        assert!(matches!(
            council.get_result("nope").await,
            Err(CouncilError::NotFound(_))
        ));
        assert!(!council.cancel("nope"));
        assert!(!council.reset_provider("nope"));
        assert!(council.reset_provider("echo"));
    }
}
