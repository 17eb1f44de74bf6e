//! Amp stream-json parser.
//!
//! Amp speaks the same snake_case envelope as Claude but reports token usage
//! on each assistant message rather than on the final result.

use crate::event::OutputEvent;
use crate::parser::stream_json::{self, UsageSource};
use crate::parser::{
    detect_context_exhaustion, parse_json_object, EventParser, ParseError, CONTEXT_WINDOW_200K,
};

/// Parser for the Amp CLI's stream-json dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmpParser;

impl AmpParser {
    pub fn new() -> Self {
        Self
    }
}

impl EventParser for AmpParser {
    fn parse_event(&self, line: &[u8]) -> Result<OutputEvent, ParseError> {
        let root = parse_json_object(line)?;
        let mut event = stream_json::decode(&root, UsageSource::PerMessage);
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
        AmpParser::new().parse_event(line.as_bytes()).unwrap()
    }

    #[test]
    fn test_per_message_usage() {
        let event = parse(
            r#"{"type":"assistant","session_id":"amp-1","message":{"role":"assistant","content":[{"type":"text","text":"working"}],"usage":{"input_tokens":100,"cache_read_input_tokens":4000,"cache_creation_input_tokens":900,"output_tokens":42}}}"#,
        );
        let usage = event.usage.unwrap();
        assert_eq!(usage.tokens_used, 5000);
        assert_eq!(usage.output_tokens, 42);
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.total_tokens, 200_000);
    }

    #[test]
    fn test_result_usage_not_read() {
        let event = parse(
            r#"{"type":"result","is_error":false,"result":"ok","usage":{"input_tokens":1,"output_tokens":1}}"#,
        );
        assert!(event.usage.is_none());
    }

    #[test]
    fn test_session_ref_follows_init_pattern() {
        let parser = AmpParser::new();
        let init = parse(r#"{"type":"system","subtype":"init","session_id":"amp-1"}"#);
        assert_eq!(
            parser.extract_session_ref(&init, init.raw.as_slice()),
            Some("amp-1".to_string())
        );
    }

    #[test]
    fn test_context_exhaustion_via_error_event() {
        let parser = AmpParser::new();
        let event =
            parse(r#"{"type":"error","error":{"message":"context window exceeded","code":400}}"#);
        assert!(parser.is_context_exhausted(&event));
    }
}
