//! Council Coordination Library
//!
//! Answers one query by fanning it out across independent AI inference
//! providers:
//!
//! - `analyzer`: decomposes a query into typed subtasks
//! - `estimator`: deterministic cost/time estimates per execution mode
//! - `router`: per-provider circuit breakers, backend health checks and
//!   health-aware assignment
//! - `ensemble`: concurrent execution, arbitration and synthesis
//! - `events`: ordered progress events and the monitoring bus
//! - `state`: the orchestration record and its stores
//! - `orchestrator`: the [`Council`] service tying the stages together
//!
//! # Usage
//!
//! ```ignore
//! use council_coordination::{Council, CouncilConfig, ExecutionMode};
//! use futures::StreamExt;
//!
//! let council = Council::builder(CouncilConfig::load(None)?).build().await?;
//! let mut submission = council.submit("Explain quantum computing", ExecutionMode::Balanced, "alice")?;
//! while let Some(event) = submission.stream.next().await {
//!     println!("{}", event.to_json_line()?);
//! }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod analyzer;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod estimator;
pub mod events;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod router;
pub mod state;

pub use analyzer::{AnalysisError, KeywordAnalyzer, QueryAnalysis, QueryAnalyzer};
pub use config::{ConfigError, CouncilConfig, ModeProfile};
pub use error::{CouncilError, CouncilResult};
pub use estimator::{CostEstimator, Estimate, ModeEstimates};
pub use events::{EventBus, EventFilter, ProgressEvent, ProgressPayload, ProgressStream, Stage};
pub use orchestrator::{Council, CouncilBuilder, Submission};
pub use providers::{
    CompletionRequest, CompletionResponse, ProviderClient, ProviderError, ProviderPool,
};
pub use registry::{Backend, DeploymentMode, ProviderCatalog, ProviderProfile};
pub use router::{
    CircuitState, HealthStatus, ProviderHealthRegistry, ProviderHealthReport,
    ProviderHealthSnapshot,
};
pub use state::{ExecutionMode, OrchestrationRecord, RequestStatus, Subtask, TaskType};
