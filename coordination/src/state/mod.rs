//! Request data model and record persistence
//!
//! - [`types`]: queries, subtasks, execution results and the
//!   [`OrchestrationRecord`](types::OrchestrationRecord) emitted per request
//! - [`store`]: the [`RecordStore`](store::RecordStore) seam with in-memory
//!   and JSON-file implementations

pub mod store;
pub mod types;

pub use store::{
    JsonFileStore, MemoryRecordStore, RecordStore, SharedRecordStore, StoreError, StoreResult,
};
pub use types::{
    ExecutionMode, ExecutionResult, OrchestrationRecord, ParseModeError, Priority, ProviderId,
    Query, RequestId, RequestStatus, RiskLevel, Subtask, SubtaskId, SubtaskStatus, TaskType,
};
