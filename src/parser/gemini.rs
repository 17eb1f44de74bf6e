//! Gemini stream-json parser.
//!
//! The Gemini CLI has shipped two event schemas: an older one where the tag
//! is a lifecycle word (`init`, `message`, `result`) and the payload lives in
//! top-level fields (`role`, `content`, `tool_name`, `parameters`, `stats`),
//! and a newer one where the tag is already the unified kind (`system`,
//! `assistant`, …) over the same top-level fields. This parser accepts the
//! union, so either stream normalizes identically.

use serde_json::Value;
use tracing::warn;

use crate::event::{
    ContentBlock, EventMessage, EventType, OutputEvent, Role, ToolInfo, UsageInfo,
};
use crate::parser::{
    detect_context_exhaustion, error_from_event_root, parse_json_object, str_field, u64_field,
    EventParser, ParseError, CONTEXT_WINDOW_1M,
};

/// Parser for the Gemini CLI's stream-json dialect (both schema families).
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiParser;

impl GeminiParser {
    pub fn new() -> Self {
        Self
    }
}

impl EventParser for GeminiParser {
    fn parse_event(&self, line: &[u8]) -> Result<OutputEvent, ParseError> {
        let root = parse_json_object(line)?;
        let tag = root.get("type").and_then(Value::as_str).unwrap_or_default();

        let mut event = match tag {
            "init" | "system" => decode_init(&root),
            "message" => decode_message(&root),
            "assistant" => decode_assistant(&root),
            "tool_use" => decode_tool_use(&root),
            "tool_result" => decode_tool_result(&root),
            "result" => decode_result(&root),
            "error" => decode_error(&root),
            other => {
                warn!(tag = other, "unknown gemini event type, passing through");
                OutputEvent::new(EventType::Other(other.to_string()))
            }
        };

        if event.session_id.is_none() {
            event.session_id = str_field(&root, "session_id");
        }
        event.raw = line.to_vec();
        detect_context_exhaustion(&mut event);
        Ok(event)
    }

    /// Gemini surfaces the session id only on init events.
    fn extract_session_ref(&self, event: &OutputEvent, _raw: &[u8]) -> Option<String> {
        if !event.is_init() {
            return None;
        }
        event.session_id.clone().filter(|id| !id.is_empty())
    }

    fn context_window(&self) -> u64 {
        CONTEXT_WINDOW_1M
    }
}

fn decode_init(root: &Value) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::System);
    event.sub_type = str_field(root, "subtype").or_else(|| Some("init".to_string()));
    event.work_dir = str_field(root, "workdir").or_else(|| str_field(root, "cwd"));
    event
}

/// Older family: `message` events discriminate on `role`. Assistant messages
/// are model text; user messages carry tool output fed back to the model.
fn decode_message(root: &Value) -> OutputEvent {
    match root.get("role").and_then(Value::as_str) {
        Some("user") => {
            let content = str_field(root, "content").unwrap_or_default();
            let mut event = OutputEvent::new(EventType::ToolResult);
            event.result = Some(content.clone());
            event.tool = Some(ToolInfo {
                id: str_field(root, "tool_id").unwrap_or_default(),
                output: content,
                ..Default::default()
            });
            event
        }
        _ => decode_assistant(root),
    }
}

fn decode_assistant(root: &Value) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::Assistant);
    if let Some(content) = str_field(root, "content") {
        event.message = Some(EventMessage {
            role: Some(Role::Assistant),
            content: vec![ContentBlock::Text { text: content }],
            ..Default::default()
        });
    }
    event
}

fn decode_tool_use(root: &Value) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::ToolUse);
    event.tool = Some(ToolInfo {
        id: str_field(root, "tool_id").unwrap_or_default(),
        name: str_field(root, "tool_name").unwrap_or_default(),
        input: root.get("parameters").cloned().unwrap_or(Value::Null),
        output: String::new(),
    });
    event
}

fn decode_tool_result(root: &Value) -> OutputEvent {
    let output = str_field(root, "content").unwrap_or_default();
    let mut event = OutputEvent::new(EventType::ToolResult);
    event.result = Some(output.clone());
    event.tool = Some(ToolInfo {
        id: str_field(root, "tool_id").unwrap_or_default(),
        name: str_field(root, "tool_name").unwrap_or_default(),
        output,
        ..Default::default()
    });
    event
}

fn decode_result(root: &Value) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::Result);
    event.result = str_field(root, "content");
    event.is_error_result = root
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if let Some(stats) = root.get("stats") {
        event.usage = Some(decode_stats(stats));
        event.duration_ms = u64_field(stats, "duration_ms");
    }
    if let Some(error) = root.get("error") {
        event.error = Some(crate::parser::parse_error_value(error));
    }
    event
}

fn decode_error(root: &Value) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::Error);
    event.error = error_from_event_root(root).or_else(|| Some(Default::default()));
    event
}

/// `stats{tokens_prompt, tokens_candidates, tokens_cached}`: prompt and
/// cached tokens both occupy the context window; candidates are output.
fn decode_stats(stats: &Value) -> UsageInfo {
    let prompt = u64_field(stats, "tokens_prompt").unwrap_or(0);
    let cached = u64_field(stats, "tokens_cached").unwrap_or(0);
    UsageInfo {
        tokens_used: prompt + cached,
        total_tokens: CONTEXT_WINDOW_1M,
        output_tokens: u64_field(stats, "tokens_candidates").unwrap_or(0),
        input_tokens: prompt,
    }
}
