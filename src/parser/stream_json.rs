//! Shared decoding for the snake_case stream-json family (Claude, Amp,
//! Codex). The three CLIs agree on the envelope - top-level `type`,
//! `session_id`, nested `message.content[]` blocks - and disagree only on
//! where token usage lives.

use serde_json::Value;

use crate::event::{
    ContentBlock, ErrorInfo, EventMessage, EventType, OutputEvent, Role, ToolInfo, UsageInfo,
};
use crate::parser::{error_from_event_root, str_field, u64_field, CONTEXT_WINDOW_200K};

/// Where a dialect reports token usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UsageSource {
    /// Usage arrives on the final `result` event (Claude).
    ResultEvent,
    /// Usage arrives on each assistant message (Amp).
    PerMessage,
    /// Either location; first present wins (Codex).
    Either,
}

impl UsageSource {
    fn reads_message(self) -> bool {
        matches!(self, UsageSource::PerMessage | UsageSource::Either)
    }

    fn reads_result(self) -> bool {
        matches!(self, UsageSource::ResultEvent | UsageSource::Either)
    }
}

/// Decode one event from a parsed JSON object.
pub(crate) fn decode(root: &Value, usage_source: UsageSource) -> OutputEvent {
    let tag = root.get("type").and_then(Value::as_str).unwrap_or_default();

    let mut event = match tag {
        "system" => decode_system(root),
        "assistant" => decode_assistant(root, usage_source),
        "user" => decode_user(root),
        "result" => decode_result(root, usage_source),
        "error" => decode_error(root),
        other => OutputEvent::new(EventType::Other(other.to_string())),
    };

    if event.session_id.is_none() {
        event.session_id = str_field(root, "session_id");
    }
    if event.sub_type.is_none() {
        event.sub_type = str_field(root, "subtype");
    }
    event
}

fn decode_system(root: &Value) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::System);
    event.sub_type = str_field(root, "subtype");
    event.work_dir = str_field(root, "cwd");
    event
}

fn decode_assistant(root: &Value, usage_source: UsageSource) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::Assistant);
    if let Some(raw_message) = root.get("message") {
        let (message, tool) = decode_message(raw_message);
        if usage_source.reads_message() {
            event.usage = raw_message.get("usage").map(decode_usage);
        }
        event.tool = tool;
        event.message = Some(message);
    }
    event
}

/// `user` events are how this family reports tool results: the message holds
/// a `tool_result` block. A user event without one passes through unmapped.
fn decode_user(root: &Value) -> OutputEvent {
    let Some(raw_message) = root.get("message") else {
        return OutputEvent::new(EventType::Other("user".to_string()));
    };
    let (message, _) = decode_message(raw_message);

    let tool_result = message.content.iter().find_map(|block| match block {
        ContentBlock::ToolResult {
            id,
            output,
            is_error,
        } => Some((id.clone(), output.clone(), *is_error)),
        _ => None,
    });

    match tool_result {
        Some((id, output, _is_error)) => {
            let mut event = OutputEvent::new(EventType::ToolResult);
            event.result = Some(output.clone());
            event.tool = Some(ToolInfo {
                id,
                output,
                ..Default::default()
            });
            event.message = Some(message);
            event
        }
        None => {
            let mut event = OutputEvent::new(EventType::Other("user".to_string()));
            event.message = Some(message);
            event
        }
    }
}

fn decode_result(root: &Value, usage_source: UsageSource) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::Result);
    event.is_error_result = root
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    event.result = str_field(root, "result");
    event.duration_ms = u64_field(root, "duration_ms");
    event.total_cost_usd = root.get("total_cost_usd").and_then(Value::as_f64);
    if usage_source.reads_result() {
        event.usage = root.get("usage").map(decode_usage);
    }
    if let Some(error) = root.get("error") {
        event.error = Some(crate::parser::parse_error_value(error));
    }
    event
}

fn decode_error(root: &Value) -> OutputEvent {
    let mut event = OutputEvent::new(EventType::Error);
    event.error = error_from_event_root(root).or_else(|| Some(ErrorInfo::default()));
    event
}

/// Decode `message{role, content[], id, model}` plus the convenience tool
/// projection from the first `tool_use` block.
fn decode_message(raw: &Value) -> (EventMessage, Option<ToolInfo>) {
    let mut message = EventMessage {
        id: str_field(raw, "id"),
        role: raw.get("role").and_then(Value::as_str).and_then(parse_role),
        model: str_field(raw, "model"),
        content: Vec::new(),
    };

    let mut tool = None;
    match raw.get("content") {
        // A bare string is a single text block.
        Some(Value::String(text)) => {
            message.content.push(ContentBlock::Text { text: text.clone() });
        }
        Some(Value::Array(blocks)) => {
            for block in blocks {
                let Some(decoded) = decode_block(block) else {
                    continue;
                };
                if tool.is_none() {
                    if let ContentBlock::ToolUse { id, name, input } = &decoded {
                        tool = Some(ToolInfo {
                            id: id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                            output: String::new(),
                        });
                    }
                }
                message.content.push(decoded);
            }
        }
        _ => {}
    }

    (message, tool)
}

fn decode_block(block: &Value) -> Option<ContentBlock> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::Text {
            text: block
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: str_field(block, "id").unwrap_or_default(),
            name: str_field(block, "name").unwrap_or_default(),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => Some(ContentBlock::ToolResult {
            id: str_field(block, "tool_use_id")
                .or_else(|| str_field(block, "id"))
                .unwrap_or_default(),
            output: flatten_tool_output(block.get("content")),
            is_error: block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }),
        _ => None,
    }
}

/// Tool output is either a string or an array of text blocks.
fn flatten_tool_output(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn parse_role(role: &str) -> Option<Role> {
    match role {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "system" => Some(Role::System),
        _ => None,
    }
}

/// Normalize `usage{input_tokens, output_tokens, cache_read_input_tokens,
/// cache_creation_input_tokens}`. Context occupancy counts the full prompt:
/// fresh input plus both cache figures.
fn decode_usage(raw: &Value) -> UsageInfo {
    let input = u64_field(raw, "input_tokens").unwrap_or(0);
    let cache_read = u64_field(raw, "cache_read_input_tokens").unwrap_or(0);
    let cache_creation = u64_field(raw, "cache_creation_input_tokens").unwrap_or(0);
    UsageInfo {
        tokens_used: input + cache_read + cache_creation,
        total_tokens: CONTEXT_WINDOW_200K,
        output_tokens: u64_field(raw, "output_tokens").unwrap_or(0),
        input_tokens: input,
    }
}

/// Init-only session extraction shared by the family.
pub(crate) fn session_from_init(event: &OutputEvent) -> Option<String> {
    if !event.is_init() {
        return None;
    }
    event.session_id.clone().filter(|id| !id.is_empty())
}
