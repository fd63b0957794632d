//! Progress event types
//!
//! One closed enum with a variant per pipeline stage. On the wire an event is
//! `{"seq": n, "type": "...", "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::analyzer::{Complexity, Intent};
use crate::ensemble::arbitration::ArbitrationDecision;
use crate::router::RoutingAssignment;
use crate::state::types::{ExecutionMode, OrchestrationRecord, ProviderId, RequestId, TaskType};

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analysis,
    Routing,
    Execution,
    Arbitration,
    Synthesis,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Analysis => "analysis",
            Stage::Routing => "routing",
            Stage::Execution => "execution",
            Stage::Arbitration => "arbitration",
            Stage::Synthesis => "synthesis",
            Stage::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage-specific payload of a progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressPayload {
    #[serde(rename_all = "camelCase")]
    AnalysisStarted {
        request_id: RequestId,
        mode: ExecutionMode,
    },

    #[serde(rename_all = "camelCase")]
    AnalysisComplete {
        subtask_count: usize,
        task_types: Vec<TaskType>,
        intent: Intent,
        complexity: Complexity,
    },

    #[serde(rename_all = "camelCase")]
    RoutingComplete {
        assignments: Vec<RoutingAssignment>,
    },

    #[serde(rename_all = "camelCase")]
    ExecutionProgress {
        completed_subtasks: usize,
        total_subtasks: usize,
        active_models: Vec<ProviderId>,
    },

    ArbitrationDecision(ArbitrationDecision),

    #[serde(rename_all = "camelCase")]
    SynthesisProgress {
        composed: usize,
        total: usize,
        note: String,
    },

    FinalResponse(Box<OrchestrationRecord>),

    #[serde(rename_all = "camelCase")]
    Error {
        stage: Stage,
        kind: String,
        reason: String,
    },
}

impl ProgressPayload {
    /// Wire tag
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressPayload::AnalysisStarted { .. } => "analysis_started",
            ProgressPayload::AnalysisComplete { .. } => "analysis_complete",
            ProgressPayload::RoutingComplete { .. } => "routing_complete",
            ProgressPayload::ExecutionProgress { .. } => "execution_progress",
            ProgressPayload::ArbitrationDecision(_) => "arbitration_decision",
            ProgressPayload::SynthesisProgress { .. } => "synthesis_progress",
            ProgressPayload::FinalResponse(_) => "final_response",
            ProgressPayload::Error { .. } => "error",
        }
    }

    /// Stage that produced the event; an error reports the stage it aborted
    pub fn stage(&self) -> Stage {
        match self {
            ProgressPayload::AnalysisStarted { .. } | ProgressPayload::AnalysisComplete { .. } => {
                Stage::Analysis
            }
            ProgressPayload::RoutingComplete { .. } => Stage::Routing,
            ProgressPayload::ExecutionProgress { .. } => Stage::Execution,
            ProgressPayload::ArbitrationDecision(_) => Stage::Arbitration,
            ProgressPayload::SynthesisProgress { .. } => Stage::Synthesis,
            ProgressPayload::FinalResponse(_) => Stage::Complete,
            ProgressPayload::Error { stage, .. } => *stage,
        }
    }

    /// No event may follow a terminal one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressPayload::FinalResponse(_) | ProgressPayload::Error { .. }
        )
    }
}

/// A sequenced progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub payload: ProgressPayload,
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    pub fn stage(&self) -> Stage {
        self.payload.stage()
    }

    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }

    pub fn final_record(&self) -> Option<&OrchestrationRecord> {
        match &self.payload {
            ProgressPayload::FinalResponse(record) => Some(&**record),
            _ => None,
        }
    }

    /// `(kind, reason)` of an error event
    pub fn error(&self) -> Option<(&str, &str)> {
        match &self.payload {
            ProgressPayload::Error { kind, reason, .. } => Some((kind.as_str(), reason.as_str())),
            _ => None,
        }
    }

    /// One-line JSON, the transport format
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
