//! Query Analyzer
//!
//! Turns raw query text into an ordered, fixed list of [`Subtask`]s. The
//! [`QueryAnalyzer`] trait is the seam: [`KeywordAnalyzer`] is the default,
//! deterministic implementation, and callers may inject their own.
//!
//! ```text
//! text ──► classify (intent, complexity, task types)
//!      ──► segment (numbered steps │ sequence words │ conjunctions)
//!      ──► cap at mode.max_subtasks
//!      ──► Subtask { task_type, priority, risk, accuracy }
//! ```

pub mod classifier;
pub mod decomposer;

use serde::{Deserialize, Serialize};

use crate::config::ModeProfile;
use crate::state::types::{Subtask, TaskType};

pub use classifier::{Complexity, Intent, Normalized};

/// Error type for query analysis
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("query produced no subtasks")]
    NoSubtasks,

    #[error("subtask {index} is invalid: {reason}")]
    InvalidSubtask { index: usize, reason: String },
}

/// Output of the analysis stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub intent: Intent,
    pub complexity: Complexity,
    /// Every task type mentioned anywhere in the query
    pub task_types: Vec<TaskType>,
    pub subtasks: Vec<Subtask>,
}

impl QueryAnalysis {
    /// Check the invariants every analyzer must uphold
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.subtasks.is_empty() {
            return Err(AnalysisError::NoSubtasks);
        }
        for (position, subtask) in self.subtasks.iter().enumerate() {
            if subtask.index != position {
                return Err(AnalysisError::InvalidSubtask {
                    index: position,
                    reason: format!("index {} out of order", subtask.index),
                });
            }
            if subtask.content.trim().is_empty() {
                return Err(AnalysisError::InvalidSubtask {
                    index: position,
                    reason: "empty content".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Decomposes a query into subtasks
///
/// Implementations must be deterministic: the estimator calls them outside
/// of any request and expects the same decomposition the pipeline will use.
pub trait QueryAnalyzer: Send + Sync {
    fn analyze(&self, text: &str, profile: &ModeProfile) -> Result<QueryAnalysis, AnalysisError>;
}

/// Keyword-driven analyzer
#[derive(Debug, Clone, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn build_subtask(
        index: usize,
        segment: String,
        query_type: TaskType,
        query: &Normalized,
    ) -> Subtask {
        let text = Normalized::new(&segment);
        let task_type = classifier::task_types(&text)
            .first()
            .copied()
            .unwrap_or(query_type);
        let priority = classifier::detect_priority(&text).max(classifier::detect_priority(query));
        let risk = classifier::detect_risk(&text).max(classifier::detect_risk(query));
        Subtask::new(index, segment, task_type)
            .with_priority(priority)
            .with_risk(risk)
            .with_accuracy(classifier::accuracy_requirement(task_type, risk))
    }
}

impl QueryAnalyzer for KeywordAnalyzer {
    fn analyze(&self, text: &str, profile: &ModeProfile) -> Result<QueryAnalysis, AnalysisError> {
        let normalized = Normalized::new(text);
        if normalized.is_empty() {
            return Err(AnalysisError::EmptyQuery);
        }

        let intent = classifier::detect_intent(text, &normalized);
        let complexity = classifier::assess_complexity(&normalized);
        let task_types = classifier::task_types(&normalized);
        let query_type = task_types.first().copied().unwrap_or(TaskType::Reasoning);

        let segments = if complexity <= Complexity::Simple {
            vec![text.trim().to_string()]
        } else {
            decomposer::cap_segments(decomposer::segment(text), profile.max_subtasks)
        };

        let subtasks: Vec<Subtask> = segments
            .into_iter()
            .enumerate()
            .map(|(i, segment)| Self::build_subtask(i, segment, query_type, &normalized))
            .collect();

        let analysis = QueryAnalysis {
            intent,
            complexity,
            task_types: if task_types.is_empty() {
                vec![TaskType::Reasoning]
            } else {
                task_types
            },
            subtasks,
        };
        analysis.validate()?;
        Ok(analysis)
    }
}
