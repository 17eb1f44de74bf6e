//! # Headless Process Tests
//!
//! End-to-end supervision behavior against real child processes:
//! - event streaming and channel closure
//! - terminal status commitment (completed / failed / cancelled / timeout)
//! - stderr capture in failure diagnostics
//! - the cancel/status race-prevention contract

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;

use hive::parser::ClaudeParser;
use hive::process::{HeadlessProcess, ProcessError, ProcessOptions, ProcessStatus};

// ============================================================================
// TEST HELPERS
// ============================================================================

/// A process running `sh -c <script>` parsed with the Claude dialect.
fn shell_process(script: &str, timeout: Option<Duration>) -> HeadlessProcess {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    HeadlessProcess::new(
        command,
        ProcessOptions {
            provider: "test".to_string(),
            parser: Arc::new(ClaudeParser::new()),
            capture_stderr: true,
            timeout,
            work_dir: std::env::temp_dir(),
        },
    )
}

const INIT_LINE: &str = r#"{"type":"system","subtype":"init","session_id":"sess-e2e"}"#;
const RESULT_LINE: &str = r#"{"type":"result","is_error":false,"result":"done"}"#;

// ============================================================================
// STREAMING & COMPLETION
// ============================================================================

#[tokio::test]
async fn test_events_stream_in_child_order_then_channel_closes() {
    let script = format!("printf '%s\\n%s\\n' '{INIT_LINE}' '{RESULT_LINE}'");
    let mut process = shell_process(&script, None);
    process.start().unwrap();
    let mut events = process.take_events().unwrap();

    let first = events.recv().await.expect("init event");
    assert!(first.is_init());
    assert!(first.timestamp.is_some());

    let second = events.recv().await.expect("result event");
    assert!(second.is_result());
    assert_eq!(second.result.as_deref(), Some("done"));

    // Channel closure is the termination signal; after it, the status must
    // already be terminal.
    assert!(events.recv().await.is_none());
    assert_eq!(process.status(), ProcessStatus::Completed);
}

#[tokio::test]
async fn test_unparseable_lines_are_dropped() {
    let script = format!("printf 'not json\\n\\n%s\\n' '{RESULT_LINE}'");
    let mut process = shell_process(&script, None);
    process.start().unwrap();
    let mut events = process.take_events().unwrap();

    let only = events.recv().await.expect("the one valid event");
    assert!(only.is_result());
    assert!(events.recv().await.is_none());
    assert_eq!(process.status(), ProcessStatus::Completed);
}

#[tokio::test]
async fn test_session_ref_extracted_and_sticky() {
    let script = format!(
        "printf '%s\\n%s\\n' '{INIT_LINE}' '{{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"sess-later\"}}'"
    );
    let mut process = shell_process(&script, None);
    process.start().unwrap();
    let mut events = process.take_events().unwrap();
    while events.recv().await.is_some() {}
    process.wait().await;

    // First extraction wins; later ids don't overwrite it.
    assert_eq!(process.session_ref().as_deref(), Some("sess-e2e"));
}

#[tokio::test]
async fn test_pid_exposed_while_running() {
    let mut process = shell_process("sleep 2", None);
    process.start().unwrap();
    assert!(process.pid().is_some());
    assert_eq!(process.status(), ProcessStatus::Running);
    process.cancel();
    process.wait().await;
}

// ============================================================================
// FAILURE DIAGNOSTICS
// ============================================================================

#[tokio::test]
async fn test_nonzero_exit_reports_stderr() {
    let mut process = shell_process("echo boom-diagnostic >&2; exit 3", None);
    process.start().unwrap();
    let mut events = process.take_events().unwrap();
    let mut errors = process.take_errors().unwrap();

    while events.recv().await.is_some() {}
    process.wait().await;
    assert_eq!(process.status(), ProcessStatus::Failed);

    let error = errors.recv().await.expect("exit failure");
    match error {
        ProcessError::ExitFailure { code, stderr, .. } => {
            assert_eq!(code, Some(3));
            assert!(stderr.contains("boom-diagnostic"));
        }
        other => panic!("expected ExitFailure, got {other}"),
    }
    assert!(errors.recv().await.is_none());
}

#[tokio::test]
async fn test_timeout_fails_with_timeout_error() {
    let mut process = shell_process("sleep 10", Some(Duration::from_millis(100)));
    process.start().unwrap();
    let mut errors = process.take_errors().unwrap();

    process.wait().await;
    assert_eq!(process.status(), ProcessStatus::Failed);

    let error = errors.recv().await.expect("timeout error");
    assert!(matches!(error, ProcessError::Timeout { .. }));
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_cancel_terminates_promptly() {
    let mut process = shell_process("sleep 30", None);
    process.start().unwrap();
    let mut events = process.take_events().unwrap();

    process.cancel();
    assert!(events.recv().await.is_none());
    process.wait().await;
    assert_eq!(process.status(), ProcessStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_after_completion_keeps_completed() {
    let script = format!("printf '%s\\n' '{RESULT_LINE}'");
    let mut process = shell_process(&script, None);
    process.start().unwrap();
    let mut events = process.take_events().unwrap();
    while events.recv().await.is_some() {}
    process.wait().await;
    assert_eq!(process.status(), ProcessStatus::Completed);

    // Cancel on a terminal process is an idempotent no-op.
    process.cancel();
    process.cancel();
    assert_eq!(process.status(), ProcessStatus::Completed);
}

/// The race-prevention contract: `cancel` commits the terminal status
/// before the token fires, so an observer that wakes on the token always
/// reads `cancelled` without extra synchronization. One failed iteration in
/// a hundred means the ordering is wrong.
#[tokio::test]
async fn test_cancel_race_prevention_100_iterations() {
    for i in 0..100 {
        let mut process = shell_process("sleep 30", None);
        process.start().unwrap();
        let token = process.cancellation_token();

        let status = process.status_handle();
        let observer = tokio::spawn(async move {
            token.cancelled().await;
            status.get()
        });

        process.cancel();
        let observed = observer.await.unwrap();
        assert_eq!(
            observed,
            ProcessStatus::Cancelled,
            "iteration {i}: observer must see the committed status"
        );
        process.wait().await;
    }
}
