//! Provider health and task routing
//!
//! ```text
//! Subtask ──► rank capable providers (estimator, per mode)
//!         ──► FallbackLadder over breaker state
//!         ──► assigned provider │ failed at routing
//! ```
//!
//! The [`ProviderHealthRegistry`] is the only state shared between
//! requests. The router reads it before execution; the coordinator writes
//! one outcome per dispatched call. The [`HealthChecker`] asks backends
//! directly, on demand, and never touches breaker state.

pub mod circuit_breaker;
pub mod health_check;
pub mod task_router;

pub use circuit_breaker::{
    CircuitState, FallbackLadder, ProviderHealthRegistry, ProviderHealthSnapshot,
    SharedHealthRegistry, UsageStats,
};
pub use health_check::{
    BackendCheck, BackendChecker, HealthChecker, HealthStatus, HttpBackendChecker,
    ProviderHealthReport,
};
pub use task_router::{RoutingAssignment, RoutingReport, TaskRouter};
