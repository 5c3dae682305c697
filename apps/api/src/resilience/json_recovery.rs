//! JSON recovery: turns raw model output into syntactically valid JSON text.
//!
//! Models wrap JSON in markdown fences, add prose around it, and get cut off at
//! the token limit. Recovery is purely syntactic: whatever comes out of here
//! parses, but the schema layer decides whether it is acceptable.
//!
//! Steps:
//! 1. strip code fences (or stray fence markers)
//! 2. locate the root container (first `{`, or a leading `[`)
//! 3. string-aware scan that tracks the stack of open containers
//! 4. if the root never closes, repair the tail and close containers in
//!    reverse open order

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const FENCE: &str = "```";
/// How far back from the end an unterminated trailing object may start and
/// still be dropped as a whole.
const TRAILING_MEMBER_WINDOW: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryFailure {
    NoOpeningBrace,
    Unrepairable,
}

/// Raised when the text cannot be made into valid JSON.
#[derive(Debug, Clone, Error)]
#[error("{}", describe_failure(.failure, .offset))]
pub struct RecoveryError {
    pub failure: RecoveryFailure,
    /// The offending text (fence-stripped when stripping succeeded).
    pub text: String,
    /// Byte offset of the first syntax error, when known. Diagnostics only.
    pub offset: Option<usize>,
}

fn describe_failure(failure: &RecoveryFailure, offset: &Option<usize>) -> String {
    match (failure, offset) {
        (RecoveryFailure::NoOpeningBrace, _) => {
            "JSON recovery failed: no opening brace found".to_string()
        }
        (RecoveryFailure::Unrepairable, Some(at)) => {
            format!("JSON recovery failed: parse still fails after repair attempt (byte {at})")
        }
        (RecoveryFailure::Unrepairable, None) => {
            "JSON recovery failed: parse still fails after repair attempt".to_string()
        }
    }
}

/// Output of a successful recovery. `cleaned_text` always parses to `value`.
#[derive(Debug, Clone)]
pub struct RecoveredJson {
    pub raw_text: String,
    pub cleaned_text: String,
    pub value: Value,
    /// True when truncation repair was needed.
    pub repaired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

impl Container {
    fn closer(self) -> char {
        match self {
            Container::Object => '}',
            Container::Array => ']',
        }
    }
}

/// A byte position where the text can be cut and still be closed cleanly,
/// with the containers open at that point.
#[derive(Debug, Clone)]
struct CutPoint {
    at: usize,
    open: Vec<Container>,
}

#[derive(Debug, Default)]
struct TruncatedScan {
    open: Vec<Container>,
    in_string: bool,
    escape_pending: bool,
    last_member_boundary: Option<CutPoint>,
    /// Start of every object that is still open, outermost first.
    open_objects: Vec<CutPoint>,
}

enum Scan {
    /// The root closed at this byte offset (exclusive).
    Complete(usize),
    Truncated(TruncatedScan),
}

/// Recovers the best-effort complete JSON document from raw model output.
pub fn recover_json(raw_text: &str) -> Result<RecoveredJson, RecoveryError> {
    let stripped = strip_fences(raw_text);

    let start = if stripped.starts_with('[') {
        Some(0)
    } else {
        stripped.find('{')
    };
    let Some(start) = start else {
        return Err(RecoveryError {
            failure: RecoveryFailure::NoOpeningBrace,
            text: stripped.to_string(),
            offset: None,
        });
    };
    let body = &stripped[start..];

    match scan(body) {
        Scan::Complete(end) => {
            let candidate = &body[..end];
            match serde_json::from_str::<Value>(candidate) {
                Ok(value) => Ok(RecoveredJson {
                    raw_text: raw_text.to_string(),
                    cleaned_text: candidate.to_string(),
                    value,
                    repaired: false,
                }),
                Err(e) => Err(RecoveryError {
                    failure: RecoveryFailure::Unrepairable,
                    text: candidate.to_string(),
                    offset: Some(byte_offset(candidate, &e)),
                }),
            }
        }
        Scan::Truncated(state) => {
            debug!(
                open_containers = state.open.len(),
                in_string = state.in_string,
                "JSON output truncated, attempting repair"
            );
            repair(raw_text, body, &state)
        }
    }
}

/// Extracts the interior of a fenced block, or strips stray fence markers.
fn strip_fences(raw_text: &str) -> &str {
    let text = raw_text.trim();

    // A fence only wraps the document when it opens before the root container;
    // later markers belong to string content.
    let root = text.find(|c: char| c == '{' || c == '[');
    let wrapper = text
        .find(FENCE)
        .filter(|&open| root.map_or(true, |root| open < root));

    if let Some(open) = wrapper {
        let after = &text[open + FENCE.len()..];
        let interior =
            after.trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if interior.contains('{') || interior.contains('[') {
            // An unclosed fence means the output was cut before the closing marker.
            let interior = match interior.rfind(FENCE) {
                Some(close) => &interior[..close],
                None => interior,
            };
            return interior.trim();
        }
    }

    text.trim_start_matches(FENCE)
        .trim_end_matches(FENCE)
        .trim()
}

fn scan(body: &str) -> Scan {
    let mut state = TruncatedScan::default();

    for (i, c) in body.char_indices() {
        if state.in_string {
            if state.escape_pending {
                state.escape_pending = false;
            } else if c == '\\' {
                state.escape_pending = true;
            } else if c == '"' {
                state.in_string = false;
            }
            continue;
        }

        match c {
            '"' => state.in_string = true,
            '{' | '[' => {
                if c == '{' {
                    state.open_objects.push(CutPoint {
                        at: i,
                        open: state.open.clone(),
                    });
                }
                state.open.push(if c == '{' {
                    Container::Object
                } else {
                    Container::Array
                });
                state.last_member_boundary = Some(CutPoint {
                    at: i + 1,
                    open: state.open.clone(),
                });
            }
            '}' | ']' => {
                if state.open.pop() == Some(Container::Object) {
                    state.open_objects.pop();
                }
                if state.open.is_empty() {
                    return Scan::Complete(i + 1);
                }
            }
            ',' => {
                state.last_member_boundary = Some(CutPoint {
                    at: i,
                    open: state.open.clone(),
                });
            }
            _ => {}
        }
    }

    Scan::Truncated(state)
}

/// Tries repair candidates in order and returns the first that parses.
fn repair(
    raw_text: &str,
    body: &str,
    state: &TruncatedScan,
) -> Result<RecoveredJson, RecoveryError> {
    let mut candidates: Vec<String> = Vec::with_capacity(3);

    if state.in_string {
        // Drop the trailing object that holds the unterminated string.
        if let Some(cut) = state.open_objects.last() {
            if body.len() - cut.at <= TRAILING_MEMBER_WINDOW && cut.at > 0 {
                candidates.push(close(&body[..cut.at], &cut.open));
            }
        }
        // Keep the partial value by terminating the string.
        let mut tail = body.to_string();
        if state.escape_pending {
            tail.pop();
        }
        tail.push('"');
        candidates.push(close(&tail, &state.open));
        // The open string was a key: drop the member.
        if let Some(cut) = &state.last_member_boundary {
            candidates.push(close(&body[..cut.at], &cut.open));
        }
    } else {
        candidates.push(close(body, &state.open));
        if let Some(cut) = &state.last_member_boundary {
            candidates.push(close(&body[..cut.at], &cut.open));
        }
    }

    let mut first_error = None;
    for candidate in candidates {
        match serde_json::from_str::<Value>(&candidate) {
            Ok(value) => {
                return Ok(RecoveredJson {
                    raw_text: raw_text.to_string(),
                    cleaned_text: candidate,
                    value,
                    repaired: true,
                })
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(byte_offset(&candidate, &e));
                }
            }
        }
    }

    Err(RecoveryError {
        failure: RecoveryFailure::Unrepairable,
        text: body.to_string(),
        offset: first_error,
    })
}

/// Drops a dangling comma and appends closers for `open`, innermost first.
fn close(prefix: &str, open: &[Container]) -> String {
    let trimmed = prefix.trim_end();
    let trimmed = trimmed.strip_suffix(',').unwrap_or(trimmed).trim_end();
    let mut out = String::with_capacity(trimmed.len() + open.len());
    out.push_str(trimmed);
    out.extend(open.iter().rev().map(|c| c.closer()));
    out
}

/// Converts serde_json's 1-based line/column into a byte offset into `text`.
fn byte_offset(text: &str, error: &serde_json::Error) -> usize {
    let line = error.line().max(1);
    let column = error.column();
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line - 1)
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(text.len())
}
