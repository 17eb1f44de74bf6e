//! OpenCode (`opencode run --format json`) parser.
//!
//! OpenCode is the outlier dialect: identifiers are camelCase (`sessionID`,
//! `callID`, `messageID`), the payload nests under `part`, and the session id
//! can arrive on any event rather than only on init.

use serde_json::Value;

use crate::event::{
    ContentBlock, EventMessage, EventType, OutputEvent, Role, ToolInfo, UsageInfo,
};
use crate::parser::{
    detect_context_exhaustion, error_from_event_root, parse_json_object, str_field, u64_field,
    EventParser, ParseError, CONTEXT_WINDOW_200K,
};

/// Parser for the OpenCode CLI's JSON event dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCodeParser;

impl OpenCodeParser {
    pub fn new() -> Self {
        Self
    }
}

impl EventParser for OpenCodeParser {
    fn parse_event(&self, line: &[u8]) -> Result<OutputEvent, ParseError> {
        let root = parse_json_object(line)?;
        let tag = root.get("type").and_then(Value::as_str).unwrap_or_default();
        let part = root.get("part");

        let mut event = match tag {
            "text" => decode_text(&root, part),
            "tool_use" => decode_tool_use(&root, part),
            "step_start" => decode_step(EventType::StepStart, part),
            "step_finish" => decode_step(EventType::StepFinish, part),
            "error" => decode_error(&root),
            other => OutputEvent::new(EventType::Other(other.to_string())),
        };

        // camelCase only; this dialect never uses snake_case session_id.
        event.session_id = str_field(&root, "sessionID");
        event.raw = line.to_vec();
        detect_context_exhaustion(&mut event);
        Ok(event)
    }

    /// OpenCode attaches `sessionID` to any event. Prefer the parsed field;
    /// fall back to a shallow re-parse of the raw line. The snake_case
    /// `session_id` key must not match here.
    fn extract_session_ref(&self, event: &OutputEvent, raw: &[u8]) -> Option<String> {
        if let Some(id) = event.session_id.clone().filter(|id| !id.is_empty()) {
            return Some(id);
        }
        let root: Value = serde_json::from_slice(raw).ok()?;
        root.get("sessionID")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    fn context_window(&self) -> u64 {
        CONTEXT_WINDOW_200K
    }
}

fn decode_text(root: &Value, part: Option<&Value>) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::Assistant);
    let text = part
        .and_then(|p| p.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    event.message = Some(EventMessage {
        id: str_field(root, "messageID")
            .or_else(|| part.and_then(|p| str_field(p, "messageID"))),
        role: Some(Role::Assistant),
        content: vec![ContentBlock::Text { text }],
        ..Default::default()
    });
    event
}

/// Tool events carry name and (when the tool has run) state with
/// input/output. Without inner state only the identity fields are filled and
/// `Result` stays empty.
fn decode_tool_use(root: &Value, part: Option<&Value>) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::ToolUse);
    let state = part.and_then(|p| p.get("state"));

    let output = state
        .and_then(|s| s.get("output"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    event.tool = Some(ToolInfo {
        id: str_field(root, "callID")
            .or_else(|| part.and_then(|p| str_field(p, "id")))
            .unwrap_or_default(),
        name: part
            .and_then(|p| str_field(p, "tool"))
            .unwrap_or_default(),
        input: state
            .and_then(|s| s.get("input"))
            .cloned()
            .unwrap_or(Value::Null),
        output: output.clone(),
    });
    if !output.is_empty() {
        event.result = Some(output);
    }
    event.sub_type = state
        .and_then(|s| s.get("status"))
        .and_then(Value::as_str)
        .map(str::to_string);
    event
}

/// Step boundaries pass through with their own tags; the finish event is
/// where OpenCode reports token usage.
fn decode_step(event_type: EventType, part: Option<&Value>) -> OutputEvent {
    let mut event = OutputEvent::new(event_type);
    if let Some(part) = part {
        event.sub_type = str_field(part, "reason");
        if let Some(tokens) = part.get("tokens") {
            event.usage = Some(decode_tokens(tokens));
        }
    }
    event
}

fn decode_error(root: &Value) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::Error);
    event.error = error_from_event_root(root).or_else(|| Some(Default::default()));
    event
}

/// `tokens{input, output, cache{read, write}}`: context occupancy is fresh
/// input plus cache reads.
fn decode_tokens(tokens: &Value) -> UsageInfo {
    let input = u64_field(tokens, "input").unwrap_or(0);
    let cache_read = tokens
        .get("cache")
        .and_then(|c| c.get("read"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    UsageInfo {
        tokens_used: input + cache_read,
        total_tokens: CONTEXT_WINDOW_200K,
        output_tokens: u64_field(tokens, "output").unwrap_or(0),
        input_tokens: input,
    }
}
