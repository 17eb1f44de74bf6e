//! # Headless Process Supervision
//!
//! A [`HeadlessProcess`] owns one spawned provider CLI and turns its stdout
//! into a stream of unified events, independently of which JSONL dialect the
//! CLI speaks (that part is delegated to an [`EventParser`]).
//!
//! Three cooperative workers run per process:
//!
//! 1. **stdout scanner** - reads lines, parses, stamps timestamps, extracts
//!    the session reference, forwards events.
//! 2. **stderr scanner** - buffers stderr lines for failure diagnostics
//!    (when capture is enabled).
//! 3. **completion waiter** - reaps the child, commits the terminal status,
//!    and closes the channels.
//!
//! The events channel blocks on a slow consumer (yielding to cancellation);
//! the errors channel never blocks and drops on overflow. Cancellation
//! commits the `Cancelled` status *before* firing the token, so any observer
//! that wakes on the token already sees the terminal status.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::OutputEvent;
use crate::parser::EventParser;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Outbound event channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Outbound error channel capacity.
pub const ERROR_CHANNEL_CAPACITY: usize = 10;

/// Longest stdout line the scanner will accept (1 MiB).
const MAX_LINE_LENGTH: usize = 1024 * 1024;

// ============================================================================
// STATUS
// ============================================================================

/// Lifecycle status of a headless process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessStatus {
    /// Terminal states admit no further status changes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Pending => "pending",
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Failures reported while a process is being started.
#[derive(Error, Debug)]
pub enum StartError {
    /// stdout/stderr pipe could not be acquired.
    #[error("failed to set up {stream} pipe")]
    Pipe { stream: &'static str },

    /// The OS refused to launch the executable.
    #[error("failed to start process: {0}")]
    Start(#[source] std::io::Error),
}

/// Asynchronous runtime failures, delivered through the errors channel.
///
/// These are informational: the authoritative termination signal is the
/// events channel closing plus the final status read.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The configured timeout elapsed before the process exited.
    #[error("{provider} process timed out")]
    Timeout { provider: String },

    /// Nonzero exit, with whatever stderr was captured.
    #[error("{provider} process exited with {code:?}: {stderr}")]
    ExitFailure {
        provider: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The stdout scanner hit an unreadable line (e.g. over the length cap).
    #[error("{provider} stdout scanner error: {message}")]
    Scanner { provider: String, message: String },
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Per-process composition: which dialect to parse, whether to keep stderr,
/// how long to wait.
pub struct ProcessOptions {
    /// Provider name, used in diagnostics only.
    pub provider: String,
    /// Dialect parser (parse + session extraction).
    pub parser: Arc<dyn EventParser>,
    /// Buffer stderr lines for failure diagnostics.
    pub capture_stderr: bool,
    /// Kill the process and report `Timeout` after this long.
    pub timeout: Option<Duration>,
    /// Working directory the child runs in.
    pub work_dir: PathBuf,
}

// ============================================================================
// HEADLESS PROCESS
// ============================================================================

/// Handle to one spawned provider CLI.
pub struct HeadlessProcess {
    provider: String,
    parser: Arc<dyn EventParser>,
    capture_stderr: bool,
    timeout: Option<Duration>,
    work_dir: PathBuf,

    command: Option<Command>,
    pid: Option<u32>,

    status: Arc<RwLock<ProcessStatus>>,
    session_ref: Arc<RwLock<Option<String>>>,
    stderr_lines: Arc<Mutex<Vec<String>>>,
    cancel: CancellationToken,
    deadline_exceeded: Arc<AtomicBool>,

    events_rx: Option<mpsc::Receiver<OutputEvent>>,
    errors_rx: Option<mpsc::Receiver<ProcessError>>,
    workers: Vec<JoinHandle<()>>,
}

impl HeadlessProcess {
    /// Record the command and configuration. Nothing runs until
    /// [`HeadlessProcess::start`]; status is `pending` and the session
    /// reference is empty.
    pub fn new(command: Command, options: ProcessOptions) -> Self {
        Self {
            provider: options.provider,
            parser: options.parser,
            capture_stderr: options.capture_stderr,
            timeout: options.timeout,
            work_dir: options.work_dir,
            command: Some(command),
            pid: None,
            status: Arc::new(RwLock::new(ProcessStatus::Pending)),
            session_ref: Arc::new(RwLock::new(None)),
            stderr_lines: Arc::new(Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
            deadline_exceeded: Arc::new(AtomicBool::new(false)),
            events_rx: None,
            errors_rx: None,
            workers: Vec::new(),
        }
    }

    /// Launch the child and the three workers. Status becomes `running` on
    /// success.
    pub fn start(&mut self) -> Result<(), StartError> {
        let mut command = self
            .command
            .take()
            .expect("start called twice on the same process");
        command
            .current_dir(&self.work_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(if self.capture_stderr {
                std::process::Stdio::piped()
            } else {
                std::process::Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(StartError::Start)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(StartError::Pipe { stream: "stdout" })?;
        let stderr = if self.capture_stderr {
            Some(
                child
                    .stderr
                    .take()
                    .ok_or(StartError::Pipe { stream: "stderr" })?,
            )
        } else {
            None
        };
        self.pid = child.id();

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        self.events_rx = Some(events_rx);
        self.errors_rx = Some(errors_rx);

        let stderr_worker = self.spawn_stderr_scanner(stderr);
        let stdout_worker = self.spawn_stdout_scanner(stdout, events_tx.clone(), errors_tx.clone());
        let waiter =
            self.spawn_completion_waiter(child, stdout_worker, stderr_worker, events_tx, errors_tx);
        self.workers.push(waiter);

        if let Some(timeout) = self.timeout {
            self.spawn_deadline(timeout);
        }

        *self.status.write() = ProcessStatus::Running;
        Ok(())
    }

    fn spawn_stdout_scanner(
        &self,
        stdout: tokio::process::ChildStdout,
        events_tx: mpsc::Sender<OutputEvent>,
        errors_tx: mpsc::Sender<ProcessError>,
    ) -> JoinHandle<()> {
        let parser = Arc::clone(&self.parser);
        let session_ref = Arc::clone(&self.session_ref);
        let cancel = self.cancel.clone();
        let provider = self.provider.clone();

        tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = lines.next() => next,
                };
                let line = match next {
                    None => break,
                    Some(Ok(line)) => line,
                    Some(Err(err)) => {
                        // Non-blocking by contract: drop when the buffer is full.
                        let scanner_error = ProcessError::Scanner {
                            provider: provider.clone(),
                            message: err.to_string(),
                        };
                        if errors_tx.try_send(scanner_error).is_err() {
                            debug!(provider = %provider, "errors channel full, dropping scanner error");
                        }
                        continue;
                    }
                };

                let mut event = match parser.parse_event(line.as_bytes()) {
                    Ok(event) => event,
                    Err(err) => {
                        debug!(provider = %provider, error = %err, "dropping unparseable line");
                        continue;
                    }
                };
                event.timestamp = Some(Utc::now());

                if let Some(id) = parser.extract_session_ref(&event, line.as_bytes()) {
                    let mut guard = session_ref.write();
                    if guard.is_none() {
                        *guard = Some(id);
                    }
                }

                // Blocking send: a slow consumer backpressures the scanner,
                // but cancellation always wins.
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = events_tx.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn spawn_stderr_scanner(
        &self,
        stderr: Option<tokio::process::ChildStderr>,
    ) -> Option<JoinHandle<()>> {
        let stderr = stderr?;
        let stderr_lines = Arc::clone(&self.stderr_lines);
        let cancel = self.cancel.clone();

        Some(tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = lines.next() => match next {
                        Some(Ok(line)) => stderr_lines.lock().push(line),
                        Some(Err(_)) => continue,
                        None => break,
                    },
                }
            }
        }))
    }

    fn spawn_completion_waiter(
        &self,
        mut child: Child,
        stdout_worker: JoinHandle<()>,
        stderr_worker: Option<JoinHandle<()>>,
        events_tx: mpsc::Sender<OutputEvent>,
        errors_tx: mpsc::Sender<ProcessError>,
    ) -> JoinHandle<()> {
        let status = Arc::clone(&self.status);
        let stderr_lines = Arc::clone(&self.stderr_lines);
        let cancel = self.cancel.clone();
        let deadline_exceeded = Arc::clone(&self.deadline_exceeded);
        let provider = self.provider.clone();

        tokio::spawn(async move {
            let exit = tokio::select! {
                exit = child.wait() => exit,
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            // Let both scanners drain to EOF: stdout so buffered tail events
            // still reach the channel, stderr so the failure diagnostics are
            // complete before they are read.
            let _ = stdout_worker.await;
            if let Some(worker) = stderr_worker {
                let _ = worker.await;
            }

            {
                let mut guard = status.write();
                if guard.is_terminal() {
                    // An explicit cancel already committed its status.
                } else if deadline_exceeded.load(Ordering::Acquire) {
                    *guard = ProcessStatus::Failed;
                    drop(guard);
                    let timeout = ProcessError::Timeout {
                        provider: provider.clone(),
                    };
                    if errors_tx.try_send(timeout).is_err() {
                        debug!(provider = %provider, "errors channel full, dropping timeout error");
                    }
                } else {
                    let failure = match &exit {
                        Ok(exit_status) if exit_status.success() => None,
                        Ok(exit_status) => Some((exit_status.code(), None)),
                        Err(err) => Some((None, Some(err.to_string()))),
                    };
                    match failure {
                        None => *guard = ProcessStatus::Completed,
                        Some((code, wait_error)) => {
                            *guard = ProcessStatus::Failed;
                            drop(guard);
                            let mut stderr = stderr_lines.lock().join("\n");
                            if let Some(wait_error) = wait_error {
                                if stderr.is_empty() {
                                    stderr = wait_error;
                                } else {
                                    stderr.push('\n');
                                    stderr.push_str(&wait_error);
                                }
                            }
                            let exit_failure = ProcessError::ExitFailure {
                                provider: provider.clone(),
                                code,
                                stderr,
                            };
                            if errors_tx.try_send(exit_failure).is_err() {
                                debug!(provider = %provider, "errors channel full, dropping exit error");
                            }
                        }
                    }
                }
            }

            // Dropping the senders here closes both channels; the final
            // status is committed first, so "channel closed" implies
            // "status terminal".
            drop(events_tx);
            drop(errors_tx);

            // Release anything still parked on the token (scanners mid-read,
            // the deadline timer). The status is already terminal.
            cancel.cancel();
        })
    }

    fn spawn_deadline(&mut self, timeout: Duration) {
        let cancel = self.cancel.clone();
        let deadline_exceeded = Arc::clone(&self.deadline_exceeded);
        self.workers.push(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    // Flag first so the waiter can tell timeout from cancel.
                    deadline_exceeded.store(true, Ordering::Release);
                    cancel.cancel();
                }
            }
        }));
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn status(&self) -> ProcessStatus {
        *self.status.read()
    }

    /// A cheap cloneable status reader for observers that outlive their
    /// borrow of the process (e.g. tasks waking on the cancellation token).
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle(Arc::clone(&self.status))
    }

    /// Provider-assigned session reference, once one has been seen.
    pub fn session_ref(&self) -> Option<String> {
        self.session_ref.read().clone()
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// OS process id, available once started.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The unified event stream. Closed when the process reaches a terminal
    /// state. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<OutputEvent>> {
        self.events_rx.take()
    }

    /// The runtime error stream. Closed after the completion waiter is done.
    /// Can be taken once.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<ProcessError>> {
        self.errors_rx.take()
    }

    /// Token observers can use to wake on cancellation; by the time it
    /// fires after [`HeadlessProcess::cancel`], the status is already
    /// committed.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Cancel the process.
    ///
    /// The `cancelled` status is committed under the status lock *before*
    /// the token fires: an observer waking on the token must be able to
    /// read the final status without further synchronization. Idempotent;
    /// never overrides a terminal state reached by natural means.
    pub fn cancel(&self) {
        {
            let mut guard = self.status.write();
            if !guard.is_terminal() {
                *guard = ProcessStatus::Cancelled;
            }
        }
        self.cancel.cancel();
    }

    /// Wait for all workers to finish. The status is terminal afterwards.
    pub async fn wait(&mut self) {
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
    }
}

/// Shared read access to a process's status.
#[derive(Clone)]
pub struct StatusHandle(Arc<RwLock<ProcessStatus>>);

impl StatusHandle {
    pub fn get(&self) -> ProcessStatus {
        *self.0.read()
    }
}

impl Drop for HeadlessProcess {
    fn drop(&mut self) {
        // Stop the workers; the child itself is killed on drop.
        self.cancel.cancel();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ProcessStatus::Pending.is_terminal());
        assert!(!ProcessStatus::Running.is_terminal());
        assert!(ProcessStatus::Completed.is_terminal());
        assert!(ProcessStatus::Failed.is_terminal());
        assert!(ProcessStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ProcessStatus::Running.to_string(), "running");
        assert_eq!(ProcessStatus::Cancelled.to_string(), "cancelled");
    }
}
