//! JSON extraction from oracle output.
//!
//! Oracles wrap JSON in prose, markdown fences, or stop mid-document when they
//! hit an output limit. Extraction tries, in order:
//!
//! 1. Direct parse (after stripping BOM / zero-width characters)
//! 2. Content of a fenced code block
//! 3. String-aware balanced-bracket scan from the first `{` or `[`
//! 4. Slice from the first `{` to the last `}`
//! 5. Truncation repair: close the open string and brackets, dropping the
//!    trailing partial member if needed
//!
//! Repair is a resilience measure, not a contract; the section validator still
//! checks whatever comes out.

use std::collections::VecDeque;

use serde_json::Value;

/// Characters stripped from the start of oracle output.
const INVISIBLE_PREFIX: &[char] = &['\u{feff}', '\u{200b}', '\u{200c}', '\u{200d}', '\u{fffe}'];

/// How many recent cut points truncation repair keeps.
const MAX_REPAIR_CUTS: usize = 64;

/// Error type for JSON extraction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    /// Output was empty or whitespace.
    #[error("Empty response")]
    Empty,
    /// No strategy produced valid JSON.
    #[error("Could not extract valid JSON: {0}")]
    NoJson(String),
}

/// Parsed JSON and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    /// The parsed value.
    pub value: Value,
    /// Whether truncation repair was needed.
    pub repaired: bool,
}

/// Extract a JSON value from free-form oracle output.
pub fn extract_json(text: &str) -> Result<Extracted, ExtractError> {
    let cleaned = text.trim().trim_start_matches(INVISIBLE_PREFIX).trim();
    if cleaned.is_empty() {
        return Err(ExtractError::Empty);
    }

    let found = parse(cleaned)
        .or_else(|| fenced_block(cleaned).and_then(|block| parse(block).or_else(|| balanced(block))))
        .or_else(|| balanced(cleaned))
        .or_else(|| outer_slice(cleaned));
    if let Some(value) = found {
        return Ok(Extracted { value, repaired: false });
    }

    if let Some(value) = repair_truncated(cleaned) {
        tracing::info!(len = cleaned.len(), "Repaired truncated JSON response");
        return Ok(Extracted { value, repaired: true });
    }

    Err(ExtractError::NoJson(diagnose(cleaned)))
}

fn parse(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

/// Content after a ```` ```json ```` or ```` ``` ```` marker, up to the closing fence if any.
fn fenced_block(text: &str) -> Option<&str> {
    let (marker_at, marker_len) = text
        .find("```json")
        .map(|i| (i, "```json".len()))
        .or_else(|| text.find("```").map(|i| (i, 3)))?;
    let rest = &text[marker_at + marker_len..];
    let end = rest.find("```").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Parse the first complete bracketed value, from whichever of `{` / `[` comes first.
///
/// An opener that never closes ends the scan: anything after it is nested
/// inside a truncated value and left to repair.
fn balanced(text: &str) -> Option<Value> {
    let mut starts: Vec<usize> = ['{', '[']
        .iter()
        .filter_map(|open| text.find(*open))
        .collect();
    starts.sort_unstable();
    for start in starts {
        let span = balanced_span(&text[start..])?;
        if let Some(value) = parse(span) {
            return Some(value);
        }
    }
    None
}

/// Smallest prefix of `text` (which starts with a bracket) that closes it.
fn balanced_span(text: &str) -> Option<&str> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&text[..i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn outer_slice(text: &str) -> Option<Value> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    (last > first).then(|| parse(&text[first..=last])).flatten()
}

/// Close a response that stopped mid-document.
///
/// Walks the text once, remembering the bracket stack at recent cut points
/// (before each `,` and after each closing bracket). Tries the whole text with
/// its open string and brackets closed, then successively shorter cuts.
fn repair_truncated(text: &str) -> Option<Value> {
    let start = text.find(|c: char| c == '{' || c == '[')?;
    let body = &text[start..];

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut cuts: VecDeque<(usize, Vec<char>)> = VecDeque::new();

    for (i, c) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        let cut = match c {
            '"' => {
                in_string = true;
                None
            }
            '{' => {
                stack.push('}');
                None
            }
            '[' => {
                stack.push(']');
                None
            }
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                Some(i + 1)
            }
            ',' => Some(i),
            _ => None,
        };
        if let Some(at) = cut {
            cuts.push_back((at, stack.clone()));
            if cuts.len() > MAX_REPAIR_CUTS {
                cuts.pop_front();
            }
        }
    }

    let mut full = body.trim_end().to_string();
    if escaped {
        full.pop();
    }
    if in_string {
        full.push('"');
    }
    if let Some(value) = parse(&close(full, &stack)) {
        return Some(value);
    }

    cuts.iter()
        .rev()
        .find_map(|(at, snapshot)| parse(&close(body[..*at].to_string(), snapshot)))
}

fn close(mut text: String, stack: &[char]) -> String {
    let trimmed = text.trim_end().trim_end_matches(',').len();
    text.truncate(trimmed);
    text.extend(stack.iter().rev());
    text
}

fn diagnose(text: &str) -> String {
    let mut notes = vec![format!("response length {} chars", text.chars().count())];
    match text.find('{') {
        Some(i) => notes.push(format!("first '{{' at byte {i}")),
        None => notes.push("no '{' found".to_string()),
    }
    let opens = text.matches('{').count();
    let closes = text.matches('}').count();
    if opens != closes {
        notes.push(format!("unbalanced braces ({opens} open, {closes} close)"));
    }
    if !text.ends_with('}') && !text.ends_with(']') {
        notes.push("does not end with a closing bracket, may be truncated".to_string());
    }
    notes.join("; ")
}
