//! Orchestration-level errors

use crate::analyzer::AnalysisError;
use crate::config::ConfigError;
use crate::providers::ProviderError;
use crate::state::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CouncilError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("decomposition failed: {0}")]
    Decomposition(#[from] AnalysisError),

    #[error("no provider can be called: {0}")]
    NoProviders(String),

    #[error("all {0} subtasks failed")]
    TotalExecutionFailure(usize),

    #[error("request {0} was cancelled")]
    Cancelled(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl CouncilError {
    /// Stable machine-readable kind, carried by `error` events
    pub fn kind(&self) -> &'static str {
        match self {
            CouncilError::Config(_) => "configuration",
            CouncilError::Decomposition(_) => "decomposition_failed",
            CouncilError::NoProviders(_) => "no_providers",
            CouncilError::TotalExecutionFailure(_) => "total_execution_failure",
            CouncilError::Cancelled(_) => "cancelled",
            CouncilError::NotFound(_) => "not_found",
            CouncilError::Store(_) => "store",
            CouncilError::Provider(_) => "provider",
        }
    }
}

pub type CouncilResult<T> = Result<T, CouncilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(
            CouncilError::from(AnalysisError::EmptyQuery).kind(),
            "decomposition_failed"
        );
        assert_eq!(CouncilError::TotalExecutionFailure(3).kind(), "total_execution_failure");
        assert_eq!(CouncilError::Cancelled("r".into()).kind(), "cancelled");
        assert_eq!(
            CouncilError::TotalExecutionFailure(3).to_string(),
            "all 3 subtasks failed"
        );
    }
}
