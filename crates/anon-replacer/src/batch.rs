//! Batch prompt and response codec for remote replacement generation
//!
//! Request: fixed instructions plus one `type=<t>; raw=<r>` line per item,
//! each followed by an indented context line. Response: one replacement
//! per non-empty line, in order.

use std::sync::LazyLock;

use anon_core::EntitySpan;
use regex::Regex;

use crate::generator::SyntheticValueGenerator;

/// Instructions sent with every batch
pub const SYSTEM_PROMPT: &str = "\
You replace sensitive strings with fabricated ones. Return EXACTLY one line per item, in the order given.
- Each line is the replacement only: no index, no type label, no quotes.
- Keep the language of the raw value and stay within two characters of its length.
- Keep the format (IDs still look like IDs, dates like dates) but the value MUST differ.
- If a realistic change is not possible, perturb a few letters or digits so it differs.
- Context lines are for reference only; never answer them.";

/// `[3] PERSON: ` style echo of the request numbering
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[\d+\]\s*[A-Za-z_]+\s*:\s*").unwrap());

/// Entity labels echoed back instead of a value
static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:ORGANIZATION|LOCATION|PERSON)\b").unwrap());

/// One span queued for remote generation
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementBatchItem {
    /// Position of the span in the resolved list
    pub sequence_index: usize,
    pub entity_type: String,
    pub raw_text: String,
    /// Surrounding text, `radius` characters each side
    pub context_window: String,
}

impl ReplacementBatchItem {
    pub fn new(sequence_index: usize, span: &EntitySpan, text: &str, radius: usize) -> Self {
        Self {
            sequence_index,
            entity_type: span.entity_type.clone(),
            raw_text: span.raw_text.clone(),
            context_window: context_window(text, span.start, span.end, radius),
        }
    }
}

/// Text around `[start, end)` extended by `radius` characters each side
pub fn context_window(text: &str, start: usize, end: usize, radius: usize) -> String {
    let from = text[..start]
        .char_indices()
        .rev()
        .take(radius)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let to = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());

    text[from..to].to_string()
}

/// Render the user prompt for a batch
pub fn build_user_prompt(items: &[ReplacementBatchItem]) -> String {
    let mut lines = vec!["Items to replace (one replacement per line, in order):".to_string()];
    for item in items {
        lines.push(format!(
            "type={}; raw={}",
            item.entity_type,
            single_line(&item.raw_text)
        ));
        lines.push(format!("    context={}", single_line(&item.context_window)));
    }
    lines.join("\n")
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

/// Strip numbering tags, whitespace and surrounding quotes
pub fn clean_line(line: &str) -> String {
    let line = TAG_RE.replace(line, "");
    line.trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// Split a response into cleaned, non-empty lines
pub fn parse_response(response: &str) -> Vec<String> {
    response
        .lines()
        .map(clean_line)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Verdict on one response line
#[derive(Debug, Clone, PartialEq)]
pub enum LineVerdict {
    Accepted(String),
    Rejected(&'static str),
}

/// Validate a cleaned response line against its item
pub fn validate_line(item: &ReplacementBatchItem, line: Option<&str>) -> LineVerdict {
    let Some(line) = line else {
        return LineVerdict::Rejected("missing");
    };

    if line.is_empty() {
        LineVerdict::Rejected("empty")
    } else if line == item.raw_text {
        LineVerdict::Rejected("unchanged")
    } else if LABEL_RE.is_match(line) {
        LineVerdict::Rejected("entity label")
    } else if !SyntheticValueGenerator::conforms(&item.entity_type, line, &item.raw_text) {
        LineVerdict::Rejected("format")
    } else {
        LineVerdict::Accepted(line.to_string())
    }
}
