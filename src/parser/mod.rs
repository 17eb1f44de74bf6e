//! # Provider Event Parsers
//!
//! Five provider CLIs emit five incompatible JSONL dialects. Each parser in
//! this module normalizes one dialect into the unified
//! [`OutputEvent`](crate::event::OutputEvent) model:
//!
//! | Provider | Module | Dialect |
//! |----------|--------|---------|
//! | Claude   | [`claude`]   | snake_case stream-json, usage in `result` |
//! | Amp      | [`amp`]      | snake_case stream-json, usage per message |
//! | Codex    | [`codex`]    | snake_case stream-json, usage in either |
//! | Gemini   | [`gemini`]   | top-level fields, `stats` token block |
//! | OpenCode | [`opencode`] | camelCase IDs, nested `part` payload |
//!
//! Parsers are pure: no I/O, no shared mutable state, safe to call
//! concurrently with different inputs. Malformed or empty lines return
//! [`ParseError`]; the base process drops the line and logs at debug.

mod stream_json;

pub mod amp;
pub mod claude;
pub mod codex;
pub mod gemini;
pub mod opencode;

pub use amp::AmpParser;
pub use claude::ClaudeParser;
pub use codex::CodexParser;
pub use gemini::GeminiParser;
pub use opencode::OpenCodeParser;

use crate::event::{ErrorInfo, ErrorReason, OutputEvent};
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// CONTEXT WINDOWS
// ============================================================================

/// Context window for the Claude/Amp/Codex/OpenCode model families.
pub const CONTEXT_WINDOW_200K: u64 = 200_000;

/// Context window for the Gemini model family.
pub const CONTEXT_WINDOW_1M: u64 = 1_000_000;

/// Phrases (matched case-insensitively) that mean the model refused because
/// the input exceeded its context window. Providers put these in free-text
/// error messages, so substring matching is the only portable detector.
const CONTEXT_EXHAUSTION_PHRASES: &[&str] = &[
    "prompt is too long",
    "context window exceeded",
    "context exceeded",
    "context limit",
    "token limit",
];

// ============================================================================
// PARSE ERRORS
// ============================================================================

/// Errors surfaced by `parse_event`. The consumer discards the line.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Empty or whitespace-only line.
    #[error("empty line")]
    EmptyLine,

    /// Line is not valid JSON.
    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// Line is valid JSON but not an object with a `type` tag.
    #[error("not an event object")]
    NotAnEvent,
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

/// One provider's JSONL dialect, normalized.
pub trait EventParser: Send + Sync {
    /// Parse one stdout line into a unified event.
    ///
    /// On success, `event_type` is set and `raw` holds an owned copy of the
    /// input bytes.
    fn parse_event(&self, line: &[u8]) -> Result<OutputEvent, ParseError>;

    /// Extract the provider session reference from an event, or `None`.
    ///
    /// Most providers only surface it on init events; OpenCode can attach it
    /// to any event, and falls back to a shallow re-parse of the raw line.
    fn extract_session_ref(&self, event: &OutputEvent, raw: &[u8]) -> Option<String>;

    /// True when the event signals context-window exhaustion.
    ///
    /// Holds iff `Error.Reason == context_exceeded` for events this parser
    /// produced: parsing already ran phrase detection, so a reason that is
    /// already set short-circuits the re-scan.
    fn is_context_exhausted(&self, event: &OutputEvent) -> bool {
        if let Some(err) = &event.error {
            if err.reason == ErrorReason::ContextExceeded {
                return true;
            }
        }
        (event.is_error_result || event.is_error())
            && matches_exhaustion_phrase(event.effective_error_message())
    }

    /// The provider's context-window size in tokens.
    fn context_window(&self) -> u64;
}

// ============================================================================
// SHARED NORMALIZATION HELPERS
// ============================================================================

/// Guard shared by every parser: reject empty/whitespace lines, parse JSON,
/// require an object.
pub(crate) fn parse_json_object(line: &[u8]) -> Result<Value, ParseError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ParseError::NotAnEvent)?
        .trim();
    if text.is_empty() {
        return Err(ParseError::EmptyLine);
    }
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(ParseError::NotAnEvent);
    }
    Ok(value)
}

/// Post-parse hook: when the event is error-shaped and its message matches a
/// known exhaustion phrase, mark `Error.Reason = context_exceeded`
/// (allocating `Error` if the event had none).
pub(crate) fn detect_context_exhaustion(event: &mut OutputEvent) {
    if !event.is_error_result && !event.is_error() {
        return;
    }
    if matches_exhaustion_phrase(event.effective_error_message()) {
        event
            .error
            .get_or_insert_with(ErrorInfo::default)
            .reason = ErrorReason::ContextExceeded;
    }
}

/// Case-insensitive substring match against the exhaustion phrase set.
pub(crate) fn matches_exhaustion_phrase(message: &str) -> bool {
    if message.is_empty() {
        return false;
    }
    let lowered = message.to_lowercase();
    CONTEXT_EXHAUSTION_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

/// Decode an error payload in any of the shapes providers emit.
///
/// Accepted forms:
/// 1. Object: `{"message": …, "code": …}`.
/// 2. String with embedded JSON: `"413 {\"type\":\"error\",\"error\":{…}}"` -
///    parse the substring starting at the first `{`, read
///    `.error.message`/`.error.type`; fall back to the whole string.
/// 3. Nested API error: `{"name":"APIError","data":{"message": …}}` -
///    prefer `data.message`, use `name` as the code.
pub(crate) fn parse_error_value(value: &Value) -> ErrorInfo {
    match value {
        Value::String(text) => parse_error_string(text),
        Value::Object(map) => {
            // Nested API-error form takes priority: the outer object's
            // `message` (if any) is usually a generic wrapper.
            if let Some(data) = map.get("data").and_then(Value::as_object) {
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if !message.is_empty() {
                    return ErrorInfo {
                        message,
                        code: map
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        reason: ErrorReason::Unset,
                    };
                }
            }

            let message = map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let code = map
                .get("code")
                .map(json_scalar_to_string)
                .or_else(|| map.get("name").and_then(Value::as_str).map(str::to_string))
                .or_else(|| map.get("type").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default();
            ErrorInfo {
                message,
                code,
                reason: ErrorReason::Unset,
            }
        }
        other => ErrorInfo {
            message: other.to_string(),
            ..Default::default()
        },
    }
}

/// Decode the string error form: find the embedded JSON object and pull the
/// nested `.error.message` / `.error.type` out of it.
fn parse_error_string(text: &str) -> ErrorInfo {
    if let Some(start) = text.find('{') {
        if let Ok(embedded) = serde_json::from_str::<Value>(&text[start..]) {
            if let Some(inner) = embedded.get("error") {
                let message = inner
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(text)
                    .to_string();
                let code = inner
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return ErrorInfo {
                    message,
                    code,
                    reason: ErrorReason::Unset,
                };
            }
        }
    }
    ErrorInfo {
        message: text.to_string(),
        ..Default::default()
    }
}

/// Rule 4 of the polymorphic contract: when the event root has no `error`
/// object, a top-level `message` field is the error message.
pub(crate) fn error_from_event_root(root: &Value) -> Option<ErrorInfo> {
    if let Some(error) = root.get("error") {
        return Some(parse_error_value(error));
    }
    root.get("message")
        .and_then(Value::as_str)
        .map(|message| ErrorInfo {
            message: message.to_string(),
            ..Default::default()
        })
}

/// Stringify a scalar code field (`"overloaded"`, `529`, …) without quoting.
fn json_scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read a string field from an event root.
pub(crate) fn str_field(root: &Value, key: &str) -> Option<String> {
    root.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read an unsigned integer field from an event root.
pub(crate) fn u64_field(root: &Value, key: &str) -> Option<u64> {
    root.get(key).and_then(Value::as_u64)
}

// ============================================================================
// TESTS
// ============================================================================
