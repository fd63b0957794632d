//! Arbitration of execution results
//!
//! Contested subtasks get one [`ArbitrationDecision`] each:
//!
//! - overlapping subtasks (same task type, similar wording) are resolved to
//!   a single winner; higher confidence wins, then the earlier completion,
//!   then the lower index
//! - a surviving result below the mode's confidence floor is kept but flagged
//! - a subtask without a successful result is recorded as a gap
//!
//! Gaps are recorded in every mode. Overlap resolution and the confidence
//! floor only apply when the mode enables arbitration.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info};

use crate::config::{ArbitrationSettings, ModeProfile};
use crate::state::types::{ExecutionResult, ProviderId, Subtask, SubtaskId, TaskType};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "about", "how", "what", "why",
    "are", "its", "your", "you", "give", "write", "explain", "describe", "also", "then",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// Won an overlap group
    Selected,
    /// Lost an overlap group; contributes no content
    Superseded,
    /// Kept, but below the confidence floor
    LowConfidence,
    /// No successful result
    Gap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrationDecision {
    pub subtask_id: SubtaskId,
    pub outcome: DecisionOutcome,
    pub provider: Option<ProviderId>,
    pub confidence: f32,
    pub explanation: String,
}

impl fmt::Display for ArbitrationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subtask_id, self.explanation)
    }
}

/// One subtask's contribution after arbitration
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitratedPiece {
    pub subtask_id: SubtaskId,
    pub index: usize,
    pub task_type: TaskType,
    /// `None` for gaps and superseded results
    pub content: Option<String>,
    pub provider: Option<ProviderId>,
    pub confidence: f32,
    pub superseded_by: Option<SubtaskId>,
    pub low_confidence: bool,
}

impl ArbitratedPiece {
    pub fn is_gap(&self) -> bool {
        self.content.is_none() && self.superseded_by.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArbitrationOutcome {
    /// In subtask index order
    pub pieces: Vec<ArbitratedPiece>,
    pub decisions: Vec<ArbitrationDecision>,
}

fn keywords(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of the keyword sets of two texts
pub fn similarity(a: &str, b: &str) -> f32 {
    let (a, b) = (keywords(a), keywords(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    let union = a.union(&b).count();
    shared as f32 / union as f32
}

fn find(parent: &mut [usize], i: usize) -> usize {
    let mut root = i;
    while parent[root] != root {
        root = parent[root];
    }
    let mut node = i;
    while parent[node] != root {
        let next = parent[node];
        parent[node] = root;
        node = next;
    }
    root
}

#[derive(Debug, Clone)]
pub struct ArbitrationLayer {
    overlap_threshold: f32,
}

impl Default for ArbitrationLayer {
    fn default() -> Self {
        Self::new(ArbitrationSettings::default())
    }
}

impl ArbitrationLayer {
    pub fn new(settings: ArbitrationSettings) -> Self {
        Self {
            overlap_threshold: settings.overlap_threshold,
        }
    }

    /// Ordering of two candidates in an overlap group, best first
    fn rank(a: (&Subtask, &ExecutionResult), b: (&Subtask, &ExecutionResult)) -> Ordering {
        b.1.confidence
            .total_cmp(&a.1.confidence)
            .then_with(|| a.1.completed_at.cmp(&b.1.completed_at))
            .then_with(|| a.0.index.cmp(&b.0.index))
    }

    /// Groups of successful subtasks (positions into `subtasks`) that overlap
    fn overlap_groups(&self, subtasks: &[Subtask], succeeded: &[usize]) -> Vec<Vec<usize>> {
        let mut parent: Vec<usize> = (0..subtasks.len()).collect();
        for (i, &a) in succeeded.iter().enumerate() {
            for &b in &succeeded[i + 1..] {
                if subtasks[a].task_type == subtasks[b].task_type
                    && similarity(&subtasks[a].content, &subtasks[b].content)
                        >= self.overlap_threshold
                {
                    let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
                    if ra != rb {
                        parent[rb.max(ra)] = ra.min(rb);
                    }
                }
            }
        }

        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for &i in succeeded {
            let root = find(&mut parent, i);
            groups.entry(root).or_default().push(i);
        }
        let mut groups: Vec<Vec<usize>> = groups.into_values().filter(|g| g.len() > 1).collect();
        groups.sort_by_key(|g| g[0]);
        groups
    }

    /// Resolve `results` against `subtasks` (index order) under `profile`
    pub fn arbitrate(
        &self,
        subtasks: &[Subtask],
        results: &[ExecutionResult],
        profile: &ModeProfile,
    ) -> ArbitrationOutcome {
        let by_id: HashMap<&str, &ExecutionResult> =
            results.iter().map(|r| (r.subtask_id.as_str(), r)).collect();

        let mut pieces: Vec<ArbitratedPiece> = subtasks
            .iter()
            .map(|subtask| {
                let result = by_id.get(subtask.id.as_str()).filter(|r| r.is_success());
                ArbitratedPiece {
                    subtask_id: subtask.id.clone(),
                    index: subtask.index,
                    task_type: subtask.task_type,
                    content: result.and_then(|r| r.raw_output.clone()),
                    provider: result.and_then(|r| r.provider.clone()),
                    confidence: result.map(|r| r.confidence).unwrap_or(0.0),
                    superseded_by: None,
                    low_confidence: false,
                }
            })
            .collect();

        // Decisions are collected per subtask, then emitted in index order
        let mut per_subtask: Vec<Vec<ArbitrationDecision>> = vec![Vec::new(); subtasks.len()];

        for (pos, subtask) in subtasks.iter().enumerate() {
            if pieces[pos].content.is_some() {
                continue;
            }
            let reason = by_id
                .get(subtask.id.as_str())
                .and_then(|r| r.error.clone())
                .or_else(|| subtask.error.clone())
                .unwrap_or_else(|| "no result".to_string());
            per_subtask[pos].push(ArbitrationDecision {
                subtask_id: subtask.id.clone(),
                outcome: DecisionOutcome::Gap,
                provider: subtask.assigned_provider.clone(),
                confidence: 0.0,
                explanation: format!("no successful result ({reason}); recorded as a gap"),
            });
        }

        if profile.enable_arbitration {
            let succeeded: Vec<usize> = (0..subtasks.len())
                .filter(|&i| pieces[i].content.is_some())
                .collect();

            for group in self.overlap_groups(subtasks, &succeeded) {
                let mut ranked: Vec<usize> = group.clone();
                ranked.sort_by(|&a, &b| {
                    Self::rank(
                        (&subtasks[a], by_id[subtasks[a].id.as_str()]),
                        (&subtasks[b], by_id[subtasks[b].id.as_str()]),
                    )
                });
                let winner = ranked[0];
                let losers: Vec<String> = ranked[1..]
                    .iter()
                    .map(|&i| format!("{} ({:.2})", subtasks[i].id, pieces[i].confidence))
                    .collect();
                info!(
                    winner = %subtasks[winner].id,
                    group_size = group.len(),
                    "Overlapping results arbitrated"
                );

                per_subtask[winner].push(ArbitrationDecision {
                    subtask_id: subtasks[winner].id.clone(),
                    outcome: DecisionOutcome::Selected,
                    provider: pieces[winner].provider.clone(),
                    confidence: pieces[winner].confidence,
                    explanation: format!(
                        "selected over overlapping {} with confidence {:.2}",
                        losers.join(", "),
                        pieces[winner].confidence
                    ),
                });
                for &loser in &ranked[1..] {
                    let tie = pieces[loser].confidence == pieces[winner].confidence;
                    per_subtask[loser].push(ArbitrationDecision {
                        subtask_id: subtasks[loser].id.clone(),
                        outcome: DecisionOutcome::Superseded,
                        provider: pieces[loser].provider.clone(),
                        confidence: pieces[loser].confidence,
                        explanation: if tie {
                            format!(
                                "discarded: tied at {:.2} with {}, which completed first",
                                pieces[loser].confidence, subtasks[winner].id
                            )
                        } else {
                            format!(
                                "discarded: {} answered the same ground with higher confidence",
                                subtasks[winner].id
                            )
                        },
                    });
                    pieces[loser].content = None;
                    pieces[loser].superseded_by = Some(subtasks[winner].id.clone());
                }
            }

            for (pos, piece) in pieces.iter_mut().enumerate() {
                if piece.content.is_some() && piece.confidence < profile.confidence_floor {
                    piece.low_confidence = true;
                    per_subtask[pos].push(ArbitrationDecision {
                        subtask_id: piece.subtask_id.clone(),
                        outcome: DecisionOutcome::LowConfidence,
                        provider: piece.provider.clone(),
                        confidence: piece.confidence,
                        explanation: format!(
                            "kept as the only answer despite confidence {:.2} below floor {:.2}",
                            piece.confidence, profile.confidence_floor
                        ),
                    });
                }
            }
        }

        let decisions: Vec<ArbitrationDecision> = per_subtask.into_iter().flatten().collect();
        debug!(decisions = decisions.len(), "Arbitration complete");
        ArbitrationOutcome { pieces, decisions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn success(subtask: &Subtask, provider: &str, confidence: f32, offset_ms: i64) -> ExecutionResult {
        ExecutionResult {
            subtask_id: subtask.id.clone(),
            provider: Some(provider.to_string()),
            raw_output: Some(format!("answer from {provider}")),
            confidence,
            latency_ms: 100,
            cost: 0.001,
            error: None,
            attempts: 1,
            completed_at: Utc::now() + Duration::milliseconds(offset_ms),
        }
    }

    fn failure(subtask: &Subtask, provider: &str) -> ExecutionResult {
        ExecutionResult {
            raw_output: None,
            confidence: 0.0,
            cost: 0.0,
            error: Some("timeout".into()),
            ..success(subtask, provider, 0.0, 0)
        }
    }

    #[test]
    fn test_similarity() {
        assert!(similarity("explain rust ownership rules", "explain ownership rules in rust") > 0.9);
        assert!(similarity("write a poem about cats", "explain tcp congestion control") < 0.1);
        assert_eq!(similarity("", "anything"), 0.0);
    }

    #[test]
    fn test_overlap_higher_confidence_wins() {
        let subtasks = vec![
            Subtask::new(0, "explain rust ownership rules", TaskType::Reasoning),
            Subtask::new(1, "explain the ownership rules of rust", TaskType::Reasoning),
        ];
        let results = vec![
            success(&subtasks[0], "a", 0.8, 0),
            success(&subtasks[1], "b", 0.9, 50),
        ];
        let outcome = ArbitrationLayer::default().arbitrate(
            &subtasks,
            &results,
            &ModeProfile::balanced(),
        );
        assert_eq!(outcome.pieces[0].superseded_by.as_deref(), Some("subtask-2"));
        assert!(outcome.pieces[0].content.is_none());
        assert_eq!(outcome.pieces[1].content.as_deref(), Some("answer from b"));

        let outcomes: Vec<_> = outcome.decisions.iter().map(|d| d.outcome).collect();
        assert_eq!(
            outcomes,
            vec![DecisionOutcome::Superseded, DecisionOutcome::Selected]
        );
    }

    #[test]
    fn test_exact_tie_goes_to_earlier_completion() {
        let subtasks = vec![
            Subtask::new(0, "explain rust ownership rules", TaskType::Reasoning),
            Subtask::new(1, "explain rust ownership rules again", TaskType::Reasoning),
        ];
        let results = vec![
            success(&subtasks[0], "a", 0.85, 500),
            success(&subtasks[1], "b", 0.85, 0),
        ];
        let outcome = ArbitrationLayer::default().arbitrate(
            &subtasks,
            &results,
            &ModeProfile::balanced(),
        );
        assert_eq!(outcome.pieces[0].superseded_by.as_deref(), Some("subtask-2"));
        assert!(outcome.decisions[0].explanation.contains("completed first"));
    }

    #[test]
    fn test_different_task_types_do_not_overlap() {
        let subtasks = vec![
            Subtask::new(0, "rust ownership rules", TaskType::Reasoning),
            Subtask::new(1, "rust ownership rules", TaskType::CodeGeneration),
        ];
        let results = vec![
            success(&subtasks[0], "a", 0.95, 0),
            success(&subtasks[1], "b", 0.95, 0),
        ];
        let outcome = ArbitrationLayer::default().arbitrate(
            &subtasks,
            &results,
            &ModeProfile::balanced(),
        );
        assert!(outcome.decisions.is_empty());
        assert!(outcome.pieces.iter().all(|p| p.content.is_some()));
    }

    #[test]
    fn test_gap_and_low_confidence() {
        let subtasks = vec![
            Subtask::new(0, "summarize the paper", TaskType::Research),
            Subtask::new(1, "write a poem about it", TaskType::CreativeOutput),
        ];
        let results = vec![
            failure(&subtasks[0], "a"),
            success(&subtasks[1], "b", 0.5, 0),
        ];
        let outcome = ArbitrationLayer::default().arbitrate(
            &subtasks,
            &results,
            &ModeProfile::balanced(),
        );
        assert!(outcome.pieces[0].is_gap());
        assert!(outcome.pieces[1].low_confidence);
        assert_eq!(outcome.decisions[0].outcome, DecisionOutcome::Gap);
        assert!(outcome.decisions[0].explanation.contains("timeout"));
        assert_eq!(outcome.decisions[1].outcome, DecisionOutcome::LowConfidence);
    }

    #[test]
    fn test_disabled_arbitration_records_only_gaps() {
        let subtasks = vec![
            Subtask::new(0, "explain rust ownership rules", TaskType::Reasoning),
            Subtask::new(1, "explain rust ownership rules", TaskType::Reasoning),
            Subtask::new(2, "write a limerick", TaskType::CreativeOutput),
        ];
        let results = vec![
            success(&subtasks[0], "a", 0.4, 0),
            success(&subtasks[1], "b", 0.9, 0),
            failure(&subtasks[2], "c"),
        ];
        let outcome =
            ArbitrationLayer::default().arbitrate(&subtasks, &results, &ModeProfile::fast());
        assert_eq!(outcome.decisions.len(), 1);
        assert_eq!(outcome.decisions[0].subtask_id, "subtask-3");
        assert!(outcome.pieces[0].content.is_some());
        assert!(!outcome.pieces[0].low_confidence);
    }

    #[test]
    fn test_unrouted_subtask_is_gap() {
        let mut subtask = Subtask::new(0, "draw a cat", TaskType::ImageGeneration);
        subtask.fail("router: no provider supports image_generation");
        let results = vec![ExecutionResult::unrouted(&subtask)];
        let outcome = ArbitrationLayer::default().arbitrate(
            &[subtask],
            &results,
            &ModeProfile::balanced(),
        );
        assert!(outcome.pieces[0].is_gap());
        assert!(outcome.decisions[0].explanation.contains("image_generation"));
    }
}
