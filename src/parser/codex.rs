//! Codex stream-json parser.
//!
//! Codex uses the snake_case envelope; stream revisions have moved usage
//! between per-message and result reporting, so this parser reads whichever
//! location is present.

use crate::event::OutputEvent;
use crate::parser::stream_json::{self, UsageSource};
use crate::parser::{
    detect_context_exhaustion, parse_json_object, EventParser, ParseError, CONTEXT_WINDOW_200K,
};

/// Parser for the Codex CLI's stream-json dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodexParser;

impl CodexParser {
    pub fn new() -> Self {
        Self
    }
}

impl EventParser for CodexParser {
    fn parse_event(&self, line: &[u8]) -> Result<OutputEvent, ParseError> {
        let root = parse_json_object(line)?;
        let mut event = stream_json::decode(&root, UsageSource::Either);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> OutputEvent {
        CodexParser::new().parse_event(line.as_bytes()).unwrap()
    }

    #[test]
    fn test_usage_from_message() {
        let event = parse(
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"ok"}],"usage":{"input_tokens":10,"cache_read_input_tokens":90,"output_tokens":5}}}"#,
        );
        assert_eq!(event.usage.unwrap().tokens_used, 100);
    }

    #[test]
    fn test_usage_from_result() {
        let event = parse(
            r#"{"type":"result","is_error":false,"result":"ok","usage":{"input_tokens":10,"cache_creation_input_tokens":30,"output_tokens":2}}"#,
        );
        assert_eq!(event.usage.unwrap().tokens_used, 40);
    }

    #[test]
    fn test_init_session_extraction() {
        let parser = CodexParser::new();
        let init = parse(r#"{"type":"system","subtype":"init","session_id":"cdx-7"}"#);
        assert_eq!(
            parser.extract_session_ref(&init, init.raw.as_slice()),
            Some("cdx-7".to_string())
        );
    }
}
