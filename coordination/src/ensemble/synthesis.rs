//! Final answer composition
//!
//! Pieces are composed in subtask order. Aggregate confidence is the mean
//! over completed subtasks only (failed ones carry weight 0, they do not
//! count as zeros); aggregate cost is what was actually spent.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::arbitration::{ArbitratedPiece, ArbitrationOutcome};
use crate::state::types::{ExecutionResult, ProviderId, Subtask, TaskType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisOutput {
    pub final_answer: String,
    pub notes: Vec<String>,
    pub aggregate_confidence: f32,
    pub aggregate_cost: f64,
    pub models_used: Vec<ProviderId>,
}

/// Mean confidence of successful results; 0 when none succeeded
pub fn aggregate_confidence(results: &[ExecutionResult]) -> f32 {
    let completed: Vec<f64> = results
        .iter()
        .filter(|r| r.is_success())
        .map(|r| r.confidence as f64)
        .collect();
    if completed.is_empty() {
        return 0.0;
    }
    (completed.iter().sum::<f64>() / completed.len() as f64) as f32
}

/// Cost actually incurred across all calls
pub fn aggregate_cost(results: &[ExecutionResult]) -> f64 {
    results.iter().map(|r| r.cost).sum()
}

/// Distinct providers of successful results, in subtask order
pub fn models_used(subtasks: &[Subtask], results: &[ExecutionResult]) -> Vec<ProviderId> {
    let mut models: Vec<ProviderId> = Vec::new();
    for subtask in subtasks {
        let provider = results
            .iter()
            .find(|r| r.subtask_id == subtask.id && r.is_success())
            .and_then(|r| r.provider.as_ref());
        if let Some(provider) = provider {
            if !models.contains(provider) {
                models.push(provider.clone());
            }
        }
    }
    models
}

#[derive(Debug, Clone, Default)]
pub struct SynthesisLayer;

impl SynthesisLayer {
    pub fn new() -> Self {
        Self
    }

    fn piece_note(piece: &ArbitratedPiece, section: Option<usize>) -> String {
        match (&piece.content, &piece.superseded_by, section) {
            (Some(_), _, Some(section)) => {
                let mut note = format!(
                    "{} ({}) from {} included as section {section}",
                    piece.subtask_id,
                    piece.task_type,
                    piece.provider.as_deref().unwrap_or("unknown provider"),
                );
                if piece.low_confidence {
                    note.push_str(&format!(", flagged low confidence {:.2}", piece.confidence));
                }
                note
            }
            (None, Some(winner), _) => {
                format!("{} omitted: superseded by {winner}", piece.subtask_id)
            }
            _ => format!(
                "{} missing: no answer available, aggregate confidence reduced",
                piece.subtask_id
            ),
        }
    }

    /// Compose the final answer. `on_piece(composed, total, note)` is called
    /// once per subtask as it is folded in.
    pub fn synthesize(
        &self,
        subtasks: &[Subtask],
        results: &[ExecutionResult],
        arbitration: &ArbitrationOutcome,
        mut on_piece: impl FnMut(usize, usize, &str),
    ) -> SynthesisOutput {
        let total = arbitration.pieces.len();
        let contributing = arbitration
            .pieces
            .iter()
            .filter(|p| p.content.is_some())
            .count();
        let single = contributing == 1 && total == 1;

        let mut sections: Vec<String> = Vec::new();
        let mut notes: Vec<String> = Vec::new();

        for (composed, piece) in arbitration.pieces.iter().enumerate() {
            let section = match &piece.content {
                Some(content) if single => {
                    sections.push(content.trim().to_string());
                    Some(1)
                }
                Some(content) => {
                    let prompt = subtasks
                        .get(piece.index)
                        .map(|s| s.content.as_str())
                        .unwrap_or_default();
                    sections.push(format!(
                        "## {}. {}: {}\n\n{}",
                        sections.len() + 1,
                        piece.task_type.heading(),
                        prompt,
                        content.trim()
                    ));
                    Some(sections.len())
                }
                None if piece.is_gap() => {
                    let prompt = subtasks
                        .get(piece.index)
                        .map(|s| s.content.as_str())
                        .unwrap_or_default();
                    sections.push(format!("_No answer available for: {prompt}_"));
                    None
                }
                None => None,
            };
            let note = Self::piece_note(piece, section);
            on_piece(composed + 1, total, &note);
            notes.push(note);
        }

        let code_from = arbitration
            .pieces
            .iter()
            .find(|p| p.content.is_some() && p.task_type == TaskType::CodeGeneration);
        let prose_from = arbitration.pieces.iter().find(|p| {
            p.content.is_some() && matches!(p.task_type, TaskType::Reasoning | TaskType::Research)
        });
        if let (Some(code), Some(prose)) = (code_from, prose_from) {
            notes.push(format!(
                "merged code sample from {} with explanation from {}",
                code.subtask_id, prose.subtask_id
            ));
        }

        let aggregate_confidence = aggregate_confidence(results);
        let completed = results.iter().filter(|r| r.is_success()).count();
        notes.push(format!(
            "aggregate confidence {aggregate_confidence:.3} over {completed} of {} completed subtasks",
            subtasks.len()
        ));

        debug!(sections = sections.len(), notes = notes.len(), "Synthesis complete");
        SynthesisOutput {
            final_answer: sections.join("\n\n"),
            notes,
            aggregate_confidence,
            aggregate_cost: aggregate_cost(results),
            models_used: models_used(subtasks, results),
        }
    }
}
