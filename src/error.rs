//! # Hive Error Module
//!
//! Unified error handling with fix suggestions.
//!
//! Each subsystem keeps its own `thiserror` enum close to the code that
//! produces it (spawn errors in `client`, transition errors in `workflow`,
//! parse errors in `parser`); this module ties them together for the CLI
//! entry point and gives every error an actionable hint via the
//! [`FixSuggestion`] trait.

use thiserror::Error;

use crate::client::{SpawnError, UnknownProvider};
use crate::parser::ParseError;
use crate::process::StartError;
use crate::workflow::{RegistryError, TransitionError, WorkflowSpecError};

// ============================================================================
// FIX SUGGESTION TRAIT
// ============================================================================

/// Errors that can tell the user how to fix them.
pub trait FixSuggestion {
    /// A one-line remediation hint, when one exists.
    fn fix_suggestion(&self) -> Option<&str>;
}

// ============================================================================
// HIVE ERROR (Top-level CLI Error)
// ============================================================================

/// Top-level error type for the `hive` CLI, wrapping the per-module errors.
#[derive(Error, Debug)]
pub enum HiveError {
    /// Spawn-time failure (auth, executable, MCP, pipes, launch).
    #[error("{0}")]
    Spawn(#[from] SpawnError),

    /// Provider name not in the registry.
    #[error("{0}")]
    UnknownProvider(#[from] UnknownProvider),

    /// Workflow store failure.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// Rejected workflow state change.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// Invalid workflow spec.
    #[error("{0}")]
    Spec(#[from] WorkflowSpecError),

    /// Unparseable provider output (normally dropped, surfaced by tooling).
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// Workflow spec file did not parse.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// IO error (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl HiveError {
    pub fn other(msg: impl Into<String>) -> Self {
        HiveError::Other(msg.into())
    }
}

impl FixSuggestion for HiveError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            HiveError::Spawn(e) => e.fix_suggestion(),
            HiveError::UnknownProvider(_) => {
                Some("Use one of the registered providers: claude, amp, codex, gemini, opencode")
            }
            HiveError::Registry(e) => e.fix_suggestion(),
            HiveError::Transition(e) => e.fix_suggestion(),
            HiveError::Spec(e) => e.fix_suggestion(),
            HiveError::Parse(_) => {
                Some("Check that the provider CLI is emitting JSONL (one JSON object per line)")
            }
            HiveError::YamlParse(_) => {
                Some("Check YAML syntax: ensure proper indentation and quoting")
            }
            HiveError::Io(_) => Some("Check file path exists and has correct permissions"),
            HiveError::Other(_) => None,
        }
    }
}

// ============================================================================
// FIX SUGGESTION IMPLEMENTATIONS
// ============================================================================

impl FixSuggestion for SpawnError {
    fn fix_suggestion(&self) -> Option<&str> {
        Some(match self {
            SpawnError::NoAuth { hint, .. } => hint,
            SpawnError::NoExecutable { hint, .. } => hint,
            SpawnError::McpParse { .. } => "Pass the MCP config as a JSON object",
            SpawnError::McpExistingParse { .. } => {
                "Fix or remove the provider settings file in the working directory"
            }
            SpawnError::McpWrite(_) => "Check the working directory exists and is writable",
            SpawnError::Start(StartError::Pipe { .. }) => {
                "This is an OS resource problem; check open file limits"
            }
            SpawnError::Start(StartError::Start(_)) => {
                "Verify the provider CLI runs from a shell in the same environment"
            }
        })
    }
}

impl FixSuggestion for RegistryError {
    fn fix_suggestion(&self) -> Option<&str> {
        Some(match self {
            RegistryError::DuplicateId(_) => {
                "Workflow ids are assigned at creation; don't re-register an instance"
            }
            RegistryError::NotFound(_) => "List workflows to see the registered ids",
            RegistryError::InvalidId => "Create workflows through WorkflowInstance::from_spec",
        })
    }
}

impl FixSuggestion for TransitionError {
    fn fix_suggestion(&self) -> Option<&str> {
        if self.from.is_terminal() {
            Some("The workflow already finished; create a new one instead")
        } else {
            Some("Check the workflow state machine: pending -> running -> paused/completed")
        }
    }
}

impl FixSuggestion for WorkflowSpecError {
    fn fix_suggestion(&self) -> Option<&str> {
        Some(match self {
            WorkflowSpecError::MissingTemplateId => {
                "Add 'template_id:' to the workflow spec. Example: template_id: code-review"
            }
            WorkflowSpecError::MissingInitialPrompt => {
                "Add 'initial_prompt:' describing what the agent should do"
            }
        })
    }
}

// ============================================================================
// DISPLAY HELPERS
// ============================================================================

/// Format an error with its fix suggestion for display.
pub fn format_error_with_suggestion<E: std::error::Error + FixSuggestion>(error: &E) -> String {
    let mut result = error.to_string();
    if let Some(suggestion) = error.fix_suggestion() {
        result.push_str("\n  Fix: ");
        result.push_str(suggestion);
    }
    result
}

// ============================================================================
// TESTS
// ============================================================================
