//! Splitting query text into ordered subtask segments.
//!
//! Strategies are tried in order and the first one yielding two or more
//! segments wins: explicit numbered steps, sequence words, then
//! conjunctions joining distinct instructions.

use regex::Regex;
use std::sync::LazyLock;

static NUMBERED_STEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)(?:^|\s)(?:\d{1,2}[.)]|step\s+\d{1,2}\s*[:.)\-]?)\s+")
        .expect("NUMBERED_STEP_RE regex should compile")
});

static SEQUENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:[.;!?]\s+|,\s*|\s+)(?:and\s+)?(?:then|after\s+that|afterwards|finally|lastly)\b[,:]?\s*",
    )
    .expect("SEQUENCE_RE regex should compile")
});

static CONJUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:,\s*|;\s*|\s+)(?:and\s+(?:also\s+)?|also\s+|as\s+well\s+as\s+)(explain|write|create|generate|give|list|compare|describe|implement|find|summarize|provide|draw|verify|check|analyze|analyse|debug|fix|suggest|research|outline|translate)\b",
    )
    .expect("CONJUNCTION_RE regex should compile")
});

static LEADING_SEQUENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:first(?:ly)?|to\s+start|second(?:ly)?|third(?:ly)?)\b[,:]?\s*")
        .expect("LEADING_SEQUENCE_RE regex should compile")
});

fn clean(segment: &str) -> Option<String> {
    let trimmed = segment.trim_matches(|c: char| c.is_whitespace() || c == ',' || c == ';');
    let trimmed = LEADING_SEQUENCE_RE.replace(trimmed, "");
    let trimmed = trimmed.trim();
    if trimmed.chars().filter(|c| c.is_alphanumeric()).count() < 2 {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split on explicit `1.` / `2)` / `Step 3:` markers
pub fn split_numbered(text: &str) -> Vec<String> {
    let marks: Vec<(usize, usize)> = NUMBERED_STEP_RE
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();
    if marks.len() < 2 {
        return Vec::new();
    }

    let mut segments = Vec::new();
    // A short lead-in ("Do the following:") is instruction framing, not work
    let preamble = &text[..marks[0].0];
    if preamble.split_whitespace().count() >= 4 && !preamble.trim_end().ends_with(':') {
        segments.extend(clean(preamble));
    }
    for (i, &(_, body_start)) in marks.iter().enumerate() {
        let body_end = marks.get(i + 1).map(|m| m.0).unwrap_or(text.len());
        segments.extend(clean(&text[body_start..body_end]));
    }
    segments
}

/// Split on sequence words: "first X, then Y, and finally Z"
pub fn split_sequence(text: &str) -> Vec<String> {
    SEQUENCE_RE.split(text).filter_map(clean).collect()
}

/// Split where a conjunction introduces a new instruction verb
pub fn split_conjunctions(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut start = 0;
    for caps in CONJUNCTION_RE.captures_iter(text) {
        let (Some(whole), Some(verb)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        segments.extend(clean(&text[start..whole.start()]));
        start = verb.start();
    }
    segments.extend(clean(&text[start..]));
    segments
}

/// Segments for `text`, or a single segment when no strategy splits it
pub fn segment(text: &str) -> Vec<String> {
    for strategy in [split_numbered, split_sequence, split_conjunctions] {
        let segments = strategy(text);
        if segments.len() >= 2 {
            return segments;
        }
    }
    clean(text).into_iter().collect()
}

/// Cap at `max` segments by folding the overflow into the last one
pub fn cap_segments(mut segments: Vec<String>, max: usize) -> Vec<String> {
    let max = max.max(1);
    if segments.len() <= max {
        return segments;
    }
    let tail = segments.split_off(max - 1).join("; ");
    segments.push(tail);
    segments
}
