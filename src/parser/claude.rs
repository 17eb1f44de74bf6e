//! Claude stream-json parser.
//!
//! `claude -p --output-format stream-json` emits snake_case events with the
//! session id on the init event and token usage on the final `result` event.

use crate::event::OutputEvent;
use crate::parser::stream_json::{self, UsageSource};
use crate::parser::{
    detect_context_exhaustion, parse_json_object, EventParser, ParseError, CONTEXT_WINDOW_200K,
};

/// Parser for the Claude CLI's stream-json dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeParser;

impl ClaudeParser {
    pub fn new() -> Self {
        Self
    }
}

impl EventParser for ClaudeParser {
    fn parse_event(&self, line: &[u8]) -> Result<OutputEvent, ParseError> {
        let root = parse_json_object(line)?;
        let mut event = stream_json::decode(&root, UsageSource::ResultEvent);
        event.raw = line.to_vec();
        detect_context_exhaustion(&mut event);
        Ok(event)
    }

    fn extract_session_ref(&self, event: &OutputEvent, _raw: &[u8]) -> Option<String> {
        stream_json::session_from_init(event)
    }

    fn context_window(&self) -> u64 {
        CONTEXT_WINDOW_200K
    }
}
