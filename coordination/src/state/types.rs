//! Core types for a single orchestration run
//!
//! These types flow between the pipeline stages and end up, in their final
//! state, inside the persisted [`OrchestrationRecord`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a submitted request
pub type RequestId = String;

/// Identifier of a subtask, unique within its request
pub type SubtaskId = String;

/// Provider identifier, e.g. `groq-llama3-70b`
pub type ProviderId = String;

/// Named cost/latency/quality trade-off policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Fast,
    Balanced,
    BestQuality,
}

impl ExecutionMode {
    /// All modes, cheapest first
    pub fn all() -> &'static [ExecutionMode] {
        &[
            ExecutionMode::Fast,
            ExecutionMode::Balanced,
            ExecutionMode::BestQuality,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Fast => "fast",
            ExecutionMode::Balanced => "balanced",
            ExecutionMode::BestQuality => "best_quality",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown execution mode
#[derive(Debug, thiserror::Error)]
#[error("unknown execution mode '{0}' (expected fast, balanced or best_quality)")]
pub struct ParseModeError(String);

impl FromStr for ExecutionMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fast" => Ok(ExecutionMode::Fast),
            "balanced" => Ok(ExecutionMode::Balanced),
            "best_quality" | "best" | "quality" => Ok(ExecutionMode::BestQuality),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// Kind of work a subtask represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Reasoning,
    Research,
    CodeGeneration,
    Debugging,
    CreativeOutput,
    ImageGeneration,
    FactChecking,
    Verification,
}

impl TaskType {
    pub fn all() -> &'static [TaskType] {
        &[
            TaskType::Reasoning,
            TaskType::Research,
            TaskType::CodeGeneration,
            TaskType::Debugging,
            TaskType::CreativeOutput,
            TaskType::ImageGeneration,
            TaskType::FactChecking,
            TaskType::Verification,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Reasoning => "reasoning",
            TaskType::Research => "research",
            TaskType::CodeGeneration => "code_generation",
            TaskType::Debugging => "debugging",
            TaskType::CreativeOutput => "creative_output",
            TaskType::ImageGeneration => "image_generation",
            TaskType::FactChecking => "fact_checking",
            TaskType::Verification => "verification",
        }
    }

    /// Section heading used when composing a multi-part answer
    pub fn heading(&self) -> &'static str {
        match self {
            TaskType::Reasoning => "Reasoning",
            TaskType::Research => "Research",
            TaskType::CodeGeneration => "Code",
            TaskType::Debugging => "Debugging",
            TaskType::CreativeOutput => "Creative",
            TaskType::ImageGeneration => "Image",
            TaskType::FactChecking => "Fact check",
            TaskType::Verification => "Verification",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a subtask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    /// Created by analysis, not yet dispatched
    Pending,
    /// Provider call in flight
    Processing,
    Completed,
    Failed,
}

impl SubtaskStatus {
    /// Whether the subtask has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubtaskStatus::Completed | SubtaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Immutable input of one request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub request_id: RequestId,
    pub text: String,
    pub mode: ExecutionMode,
    /// Opaque requester identity supplied by the caller
    pub requester: String,
    pub submitted_at: DateTime<Utc>,
}

impl Query {
    /// Create a query with a fresh request id
    pub fn new(text: impl Into<String>, mode: ExecutionMode, requester: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            mode,
            requester: requester.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// One decomposed unit of work, routed to exactly one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: SubtaskId,
    /// Position in the analyzer's ordering
    pub index: usize,
    pub content: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub risk_level: RiskLevel,
    /// Minimum acceptable accuracy in [0, 1]
    pub accuracy_requirement: f32,
    pub assigned_provider: Option<ProviderId>,
    pub status: SubtaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub confidence: f32,
    pub error: Option<String>,
}

impl Subtask {
    /// Create a pending subtask at `index`
    pub fn new(index: usize, content: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: format!("subtask-{}", index + 1),
            index,
            content: content.into(),
            task_type,
            priority: Priority::Medium,
            risk_level: RiskLevel::Low,
            accuracy_requirement: 0.8,
            assigned_provider: None,
            status: SubtaskStatus::Pending,
            start_time: None,
            end_time: None,
            confidence: 0.0,
            error: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy_requirement = accuracy.clamp(0.0, 1.0);
        self
    }

    /// Mark failed without a provider call (routing-level failure)
    pub fn fail(&mut self, reason: impl Into<String>) {
        let now = Utc::now();
        self.status = SubtaskStatus::Failed;
        self.start_time.get_or_insert(now);
        self.end_time = Some(now);
        self.confidence = 0.0;
        self.error = Some(reason.into());
    }
}

/// Outcome of executing one subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub subtask_id: SubtaskId,
    /// `None` when routing found no provider
    pub provider: Option<ProviderId>,
    pub raw_output: Option<String>,
    pub confidence: f32,
    pub latency_ms: u64,
    /// Cost actually incurred, in USD
    pub cost: f64,
    pub error: Option<String>,
    /// Provider calls made (0 when never dispatched)
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.raw_output.is_some()
    }

    /// Result for a subtask that never reached a provider
    pub fn unrouted(subtask: &Subtask) -> Self {
        Self {
            subtask_id: subtask.id.clone(),
            provider: None,
            raw_output: None,
            confidence: 0.0,
            latency_ms: 0,
            cost: 0.0,
            error: subtask
                .error
                .clone()
                .or_else(|| Some("no provider assigned".to_string())),
            attempts: 0,
            completed_at: subtask.end_time.unwrap_or_else(Utc::now),
        }
    }
}

/// Terminal status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Durable audit artifact of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRecord {
    pub request_id: RequestId,
    pub requester: String,
    pub query: String,
    pub mode: ExecutionMode,
    pub status: RequestStatus,
    pub subtasks: Vec<Subtask>,
    pub arbitration_decisions: Vec<String>,
    pub synthesis_notes: Vec<String>,
    pub final_answer: String,
    pub aggregate_confidence: f32,
    pub aggregate_cost: f64,
    pub execution_time_ms: u64,
    pub models_used: Vec<ProviderId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrchestrationRecord {
    /// Empty record for a query; stages fill it in
    pub fn for_query(query: &Query) -> Self {
        Self {
            request_id: query.request_id.clone(),
            requester: query.requester.clone(),
            query: query.text.clone(),
            mode: query.mode,
            status: RequestStatus::Failed,
            subtasks: Vec::new(),
            arbitration_decisions: Vec::new(),
            synthesis_notes: Vec::new(),
            final_answer: String::new(),
            aggregate_confidence: 0.0,
            aggregate_cost: 0.0,
            execution_time_ms: 0,
            models_used: Vec::new(),
            failure_reason: None,
            created_at: query.submitted_at,
        }
    }
}
