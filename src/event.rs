//! # Unified Event Model
//!
//! Every provider CLI speaks its own JSONL dialect. The parsers in
//! [`crate::parser`] normalize all of them into one [`OutputEvent`] shape so
//! the rest of the system (process supervision, workflow tracking, the event
//! bus) never has to know which CLI produced a line.
//!
//! The JSON form of [`OutputEvent`] is a stable boundary consumed by
//! downstream collaborators; field names are part of the contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// EVENT TYPE
// ============================================================================

/// Discriminator for unified events.
///
/// Unknown tags pass through as [`EventType::Other`] so a provider can ship a
/// new event kind without breaking older consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    System,
    Assistant,
    ToolUse,
    ToolResult,
    Result,
    Error,
    StepStart,
    StepFinish,
    /// Pass-through for tags this build does not know about.
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::System => "system",
            EventType::Assistant => "assistant",
            EventType::ToolUse => "tool_use",
            EventType::ToolResult => "tool_result",
            EventType::Result => "result",
            EventType::Error => "error",
            EventType::StepStart => "step_start",
            EventType::StepFinish => "step_finish",
            EventType::Other(tag) => tag,
        }
    }
}

impl Default for EventType {
    fn default() -> Self {
        EventType::Other(String::new())
    }
}

impl From<&str> for EventType {
    fn from(tag: &str) -> Self {
        match tag {
            "system" => EventType::System,
            "assistant" => EventType::Assistant,
            "tool_use" => EventType::ToolUse,
            "tool_result" => EventType::ToolResult,
            "result" => EventType::Result,
            "error" => EventType::Error,
            "step_start" => EventType::StepStart,
            "step_finish" => EventType::StepFinish,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(EventType::from(tag.as_str()))
    }
}

// ============================================================================
// MESSAGE & CONTENT BLOCKS
// ============================================================================

/// Sender role inside a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One block of message content.
///
/// Providers interleave text with tool invocations inside a single message;
/// the order of blocks is preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(rename = "Text")]
        text: String,
    },
    ToolUse {
        #[serde(rename = "ID")]
        id: String,
        #[serde(rename = "Name")]
        name: String,
        /// Raw tool input, untouched.
        #[serde(rename = "Input")]
        input: Value,
    },
    ToolResult {
        #[serde(rename = "ID")]
        id: String,
        #[serde(rename = "Output")]
        output: String,
        #[serde(rename = "IsError", default)]
        is_error: bool,
    },
}

/// A provider message: ordered content blocks plus identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "Role", default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "Content", default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentBlock>,
    #[serde(rename = "Model", default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Convenience projection of the tool_use/tool_result block carried by an
/// event, so consumers don't have to walk content blocks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolInfo {
    #[serde(rename = "ID", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "Name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "Input", default, skip_serializing_if = "Value::is_null")]
    pub input: Value,
    #[serde(rename = "Output", default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

// ============================================================================
// USAGE & ERRORS
// ============================================================================

/// Normalized token accounting.
///
/// `tokens_used` is the parser's "context occupied" figure (each provider
/// computes it from different raw counters); `total_tokens` is the provider's
/// context-window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageInfo {
    #[serde(rename = "TokensUsed")]
    pub tokens_used: u64,
    #[serde(rename = "TotalTokens")]
    pub total_tokens: u64,
    #[serde(rename = "OutputTokens")]
    pub output_tokens: u64,
    #[serde(rename = "InputTokens")]
    pub input_tokens: u64,
}

/// Why an error happened, when the parser can tell.
///
/// `ContextExceeded` is deliberately a *reason*, not an error kind: it rides
/// the event stream so higher layers can remediate (summarize, restart with a
/// trimmed history) instead of terminating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    #[default]
    Unset,
    ContextExceeded,
    RateLimited,
    Auth,
    Unknown,
}

/// Normalized error payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "Message", default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(rename = "Code", default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(rename = "Reason", default)]
    pub reason: ErrorReason,
}

// ============================================================================
// OUTPUT EVENT
// ============================================================================

/// The unified event every parser produces.
///
/// Invariants:
/// - `event_type` is always set after a successful parse.
/// - `raw` is always populated on success and owns its bytes (no aliasing
///   with transport buffers).
///
/// Equality is structural on everything except `raw`, which is advisory
/// debugging material.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputEvent {
    #[serde(rename = "Type")]
    pub event_type: EventType,

    #[serde(rename = "SubType", default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,

    /// Provider-assigned session handle; may arrive on any event, not only
    /// init (OpenCode does this).
    #[serde(rename = "SessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(rename = "WorkDir", default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,

    /// Wall time when the event was parsed; stamped by the base process.
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(rename = "Message", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<EventMessage>,

    #[serde(rename = "Tool", default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolInfo>,

    /// Free-form result string (tool output when inlined).
    #[serde(rename = "Result", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(rename = "Usage", default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,

    #[serde(rename = "DurationMs", default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(rename = "TotalCostUSD", default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,

    /// True when a `result` event carries an error payload.
    #[serde(rename = "IsErrorResult", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error_result: bool,

    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    /// Copy of the source line for debugging. Emitted as a JSON string
    /// (lossy UTF-8), stable within a build.
    #[serde(rename = "Raw", default, with = "raw_bytes")]
    pub raw: Vec<u8>,
}

impl PartialEq for OutputEvent {
    fn eq(&self, other: &Self) -> bool {
        // Raw is excluded: two events are equal when their parsed fields are.
        self.event_type == other.event_type
            && self.sub_type == other.sub_type
            && self.session_id == other.session_id
            && self.work_dir == other.work_dir
            && self.timestamp == other.timestamp
            && self.message == other.message
            && self.tool == other.tool
            && self.result == other.result
            && self.usage == other.usage
            && self.duration_ms == other.duration_ms
            && self.total_cost_usd == other.total_cost_usd
            && self.is_error_result == other.is_error_result
            && self.error == other.error
    }
}

impl OutputEvent {
    /// Create an event of the given type with all optional fields empty.
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            ..Default::default()
        }
    }

    /// True for provider init events (type `system`, sub-type `init`).
    pub fn is_init(&self) -> bool {
        self.event_type == EventType::System && self.sub_type.as_deref() == Some("init")
    }

    pub fn is_assistant(&self) -> bool {
        self.event_type == EventType::Assistant
    }

    pub fn is_tool_use(&self) -> bool {
        self.event_type == EventType::ToolUse
    }

    pub fn is_tool_result(&self) -> bool {
        self.event_type == EventType::ToolResult
    }

    pub fn is_result(&self) -> bool {
        self.event_type == EventType::Result
    }

    pub fn is_error(&self) -> bool {
        self.event_type == EventType::Error
    }

    /// Context-occupied token count, or 0 when the event carries no usage.
    pub fn context_tokens(&self) -> u64 {
        self.usage.map(|u| u.tokens_used).unwrap_or(0)
    }

    /// The message to match context-exhaustion phrases against: the error
    /// message when present, the result string otherwise.
    pub fn effective_error_message(&self) -> &str {
        if let Some(err) = &self.error {
            if !err.message.is_empty() {
                return &err.message;
            }
        }
        self.result.as_deref().unwrap_or("")
    }
}

mod raw_bytes {
    //! `Raw` rides the JSON boundary as a plain string.

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(raw: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(raw))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

// ============================================================================
// TESTS
// ============================================================================
