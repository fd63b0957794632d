//! Keyword classification of query text.
//!
//! Everything here is a pure function of the text: intent, complexity,
//! task types, priority, risk and the accuracy a subtask should meet.

use serde::{Deserialize, Serialize};

use crate::state::types::{Priority, RiskLevel, TaskType};

/// What the requester is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Question,
    Instruction,
    Analysis,
    Modification,
    Verification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

/// Lowercased text with punctuation collapsed to single spaces and padded,
/// so `" word "` matches whole words and phrases only.
#[derive(Debug, Clone)]
pub struct Normalized {
    padded: String,
    words: usize,
}

impl Normalized {
    pub fn new(text: &str) -> Self {
        let cleaned: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        let words: Vec<&str> = cleaned.split_whitespace().collect();
        Self {
            padded: format!(" {} ", words.join(" ")),
            words: words.len(),
        }
    }

    pub fn mentions(&self, keyword: &str) -> bool {
        self.padded.contains(&format!(" {keyword} "))
    }

    pub fn mentions_any(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.mentions(k))
    }

    pub fn count(&self, keywords: &[&str]) -> usize {
        keywords.iter().filter(|k| self.mentions(k)).count()
    }

    pub fn first_word(&self) -> Option<&str> {
        self.padded.split_whitespace().next()
    }

    pub fn word_count(&self) -> usize {
        self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words == 0
    }
}

/// Keywords per task type, most specific type first
const TASK_KEYWORDS: &[(TaskType, &[&str])] = &[
    (
        TaskType::Debugging,
        &[
            "debug", "debugging", "bug", "bugs", "error", "errors", "fix", "crash", "crashes",
            "exception", "traceback", "stack trace", "broken", "failing",
        ],
    ),
    (
        TaskType::CodeGeneration,
        &[
            "code", "function", "implement", "implementation", "program", "script", "class",
            "api", "refactor", "python", "rust", "javascript", "typescript", "sql", "algorithm",
        ],
    ),
    (
        TaskType::FactChecking,
        &[
            "fact check", "fact checking", "claim", "claims", "accurate", "accuracy",
            "true or false", "citation", "citations",
        ],
    ),
    (
        TaskType::Verification,
        &[
            "verify", "validate", "validation", "confirm", "double check", "test", "tests",
            "proofread",
        ],
    ),
    (
        TaskType::ImageGeneration,
        &["image", "picture", "draw", "drawing", "illustration", "logo", "render"],
    ),
    (
        TaskType::CreativeOutput,
        &[
            "story", "poem", "creative", "imagine", "analogy", "analogies", "metaphor",
            "narrative", "slogan", "song", "lyrics",
        ],
    ),
    (
        TaskType::Research,
        &[
            "research", "find", "investigate", "search", "sources", "best practices", "survey",
            "latest", "study", "literature", "compare",
        ],
    ),
    (
        TaskType::Reasoning,
        &[
            "explain", "why", "reason", "reasoning", "analyze", "analyse", "think", "logic",
            "solve", "understand", "how does", "what is", "describe",
        ],
    ),
];

/// All task types the text mentions, most specific first
pub fn task_types(text: &Normalized) -> Vec<TaskType> {
    TASK_KEYWORDS
        .iter()
        .filter(|(_, keywords)| text.mentions_any(keywords))
        .map(|(task_type, _)| *task_type)
        .collect()
}

/// The most specific task type mentioned, or `Reasoning`
pub fn primary_task_type(text: &Normalized) -> TaskType {
    task_types(text)
        .first()
        .copied()
        .unwrap_or(TaskType::Reasoning)
}

const QUESTION_WORDS: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "which", "is", "are", "can", "could", "does",
    "do", "should", "would", "will",
];

pub fn detect_intent(raw: &str, text: &Normalized) -> Intent {
    let is_question = raw.trim_end().ends_with('?')
        || text
            .first_word()
            .map(|w| QUESTION_WORDS.contains(&w))
            .unwrap_or(false);
    if text.is_empty() || is_question {
        Intent::Question
    } else if text.mentions_any(&["verify", "validate", "check", "confirm", "fact check"]) {
        Intent::Verification
    } else if text.mentions_any(&[
        "modify", "change", "update", "edit", "refactor", "improve", "optimize", "rewrite", "fix",
    ]) {
        Intent::Modification
    } else if text.mentions_any(&[
        "analyze", "analyse", "compare", "evaluate", "assess", "review", "summarize",
    ]) {
        Intent::Analysis
    } else {
        Intent::Instruction
    }
}

const STEP_MARKERS: &[&str] = &[
    "first", "firstly", "then", "next", "finally", "afterwards", "lastly", "step", "steps",
];

const TECHNICAL_MARKERS: &[&str] = &[
    "architecture", "distributed", "concurrent", "concurrency", "scalable", "scalability",
    "optimize", "optimization", "algorithm", "comprehensive", "in depth", "detailed",
    "trade offs", "tradeoffs", "performance",
];

const CONDITIONAL_MARKERS: &[&str] = &["if", "unless", "otherwise", "depending", "whether"];

pub fn complexity_score(text: &Normalized) -> u32 {
    let mut score = 0;
    score += match text.word_count() {
        n if n > 100 => 3,
        n if n > 50 => 2,
        n if n > 20 => 1,
        _ => 0,
    };
    let steps = text.count(STEP_MARKERS);
    if steps >= 1 {
        score += 1;
    }
    if steps >= 3 {
        score += 1;
    }
    let technical = text.count(TECHNICAL_MARKERS);
    if technical >= 1 {
        score += 1;
    }
    if technical >= 3 {
        score += 1;
    }
    if text.mentions_any(CONDITIONAL_MARKERS) {
        score += 1;
    }
    if task_types(text).len() >= 2 {
        score += 1;
    }
    score
}

pub fn assess_complexity(text: &Normalized) -> Complexity {
    let score = complexity_score(text);
    if text.is_empty() || (score == 0 && text.word_count() <= 5) {
        return Complexity::Trivial;
    }
    match score {
        0..=1 => Complexity::Simple,
        2..=3 => Complexity::Moderate,
        4..=5 => Complexity::Complex,
        _ => Complexity::VeryComplex,
    }
}

pub fn detect_priority(text: &Normalized) -> Priority {
    if text.mentions_any(&["urgent", "urgently", "critical", "immediate", "immediately", "asap"]) {
        Priority::High
    } else if text.mentions_any(&["optional", "nice to have", "later", "low priority", "whenever"])
    {
        Priority::Low
    } else {
        Priority::Medium
    }
}

pub fn detect_risk(text: &Normalized) -> RiskLevel {
    if text.mentions_any(&[
        "production", "live", "security", "vulnerability", "data loss", "payment", "payments",
        "medical", "legal",
    ]) {
        RiskLevel::High
    } else if text.mentions_any(&["test", "staging", "prototype", "draft"]) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Minimum acceptable accuracy for a subtask, in [0, 1]
pub fn accuracy_requirement(task_type: TaskType, risk: RiskLevel) -> f32 {
    let base = match task_type {
        TaskType::FactChecking => 0.95,
        TaskType::Verification => 0.9,
        TaskType::Debugging => 0.85,
        TaskType::CodeGeneration | TaskType::Research => 0.8,
        TaskType::Reasoning => 0.75,
        TaskType::CreativeOutput | TaskType::ImageGeneration => 0.6,
    };
    let bump = match risk {
        RiskLevel::Low => 0.0,
        RiskLevel::Medium => 0.05,
        RiskLevel::High => 0.1,
    };
    f32::min(base + bump, 1.0)
}
