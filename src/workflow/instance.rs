//! Workflow entity and lifecycle state machine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Lifecycle state of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl WorkflowState {
    /// Terminal states admit no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Stopped
        )
    }

    /// The transition table. Everything not listed is rejected.
    pub fn can_transition_to(&self, target: WorkflowState) -> bool {
        use WorkflowState::*;
        match self {
            Pending => matches!(target, Running | Stopped),
            Running => matches!(target, Paused | Completed | Failed | Stopped),
            Paused => matches!(target, Running | Stopped | Failed),
            Completed | Failed | Stopped => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Pending => "pending",
            WorkflowState::Running => "running",
            WorkflowState::Paused => "paused",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change. The workflow is left unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: WorkflowState,
    pub to: WorkflowState,
}

// ============================================================================
// SPEC
// ============================================================================

/// Worktree configuration carried by a spec; the worktree itself is
/// allocated later by an external allocator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorktreeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_branch: String,
    #[serde(default)]
    pub branch_name: String,
}

/// What a caller provides to create a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub template_id: String,
    #[serde(default)]
    pub name: String,
    pub initial_prompt: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub epic_id: String,
    #[serde(default)]
    pub worktree: WorktreeConfig,
}

/// Spec validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowSpecError {
    #[error("spec is missing template_id")]
    MissingTemplateId,

    #[error("spec is missing initial_prompt")]
    MissingInitialPrompt,
}

// ============================================================================
// INSTANCE
// ============================================================================

/// One tracked workflow.
///
/// Invariants:
/// - `id` is a valid (non-nil) UUID for any stored workflow.
/// - Terminal states admit no outgoing transitions.
/// - `started_at` is set exactly once, on the first transition to running.
/// - `labels` are a copy of the spec's labels; mutating the source map after
///   construction does not affect the instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub template_id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_progress_at: Option<DateTime<Utc>>,
    pub tokens_used: u64,
    pub active_workers: u32,
    pub epic_id: String,

    pub worktree: WorktreeConfig,
    /// Set by the worktree allocator, not at construction.
    pub worktree_path: Option<String>,
    /// Set by the worktree allocator, not at construction.
    pub worktree_branch: Option<String>,
}

impl WorkflowInstance {
    /// Validate the spec and build a pending workflow with a fresh id.
    /// The name defaults to the template id when empty.
    pub fn from_spec(spec: &WorkflowSpec) -> Result<Self, WorkflowSpecError> {
        if spec.template_id.is_empty() {
            return Err(WorkflowSpecError::MissingTemplateId);
        }
        if spec.initial_prompt.is_empty() {
            return Err(WorkflowSpecError::MissingInitialPrompt);
        }

        let now = Utc::now();
        let name = if spec.name.is_empty() {
            spec.template_id.clone()
        } else {
            spec.name.clone()
        };

        Ok(Self {
            id: Uuid::new_v4(),
            template_id: spec.template_id.clone(),
            name,
            labels: spec.labels.clone(),
            state: WorkflowState::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            last_heartbeat_at: None,
            last_progress_at: None,
            tokens_used: 0,
            active_workers: 0,
            epic_id: spec.epic_id.clone(),
            worktree: spec.worktree.clone(),
            worktree_path: None,
            worktree_branch: None,
        })
    }

    /// Move to `target` if the state machine allows it. On the first
    /// transition to running, `started_at` is stamped; `updated_at` moves on
    /// every accepted transition. A rejected transition leaves the workflow
    /// unchanged.
    pub fn transition_to(&mut self, target: WorkflowState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(target) {
            return Err(TransitionError {
                from: self.state,
                to: target,
            });
        }
        if target == WorkflowState::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.state = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// A sign of life from any of the workflow's processes.
    pub fn record_heartbeat(&mut self) {
        let now = Utc::now();
        self.last_heartbeat_at = Some(now);
        self.updated_at = now;
    }

    /// Forward progress (implies a heartbeat).
    pub fn record_progress(&mut self) {
        let now = Utc::now();
        self.last_progress_at = Some(now);
        self.last_heartbeat_at = Some(now);
        self.updated_at = now;
    }

    /// Monotonic token counter.
    pub fn add_tokens(&mut self, tokens: u64) {
        self.tokens_used += tokens;
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        self.state == WorkflowState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state == WorkflowState::Paused
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> WorkflowSpec {
        WorkflowSpec {
            template_id: "code-review".to_string(),
            initial_prompt: "Review the diff".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_spec_validation() {
        let mut missing_template = spec();
        missing_template.template_id.clear();
        assert_eq!(
            WorkflowInstance::from_spec(&missing_template).unwrap_err(),
            WorkflowSpecError::MissingTemplateId
        );

        let mut missing_prompt = spec();
        missing_prompt.initial_prompt.clear();
        assert_eq!(
            WorkflowInstance::from_spec(&missing_prompt).unwrap_err(),
            WorkflowSpecError::MissingInitialPrompt
        );
    }

    #[test]
    fn test_name_defaults_to_template_id() {
        let workflow = WorkflowInstance::from_spec(&spec()).unwrap();
        assert_eq!(workflow.name, "code-review");

        let mut named = spec();
        named.name = "nightly review".to_string();
        let workflow = WorkflowInstance::from_spec(&named).unwrap();
        assert_eq!(workflow.name, "nightly review");
    }

    #[test]
    fn test_fresh_instance_shape() {
        let workflow = WorkflowInstance::from_spec(&spec()).unwrap();
        assert!(!workflow.id.is_nil());
        assert_eq!(workflow.state, WorkflowState::Pending);
        assert!(workflow.started_at.is_none());
        assert_eq!(workflow.tokens_used, 0);
        assert_eq!(workflow.active_workers, 0);
        assert!(workflow.worktree_path.is_none());
    }

    #[test]
    fn test_labels_are_copied() {
        let mut source = spec();
        source.labels.insert("team".to_string(), "infra".to_string());
        let workflow = WorkflowInstance::from_spec(&source).unwrap();

        source.labels.insert("team".to_string(), "mutated".to_string());
        assert_eq!(workflow.labels["team"], "infra");
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut workflow = WorkflowInstance::from_spec(&spec()).unwrap();
        for target in [
            WorkflowState::Running,
            WorkflowState::Paused,
            WorkflowState::Running,
            WorkflowState::Completed,
        ] {
            workflow.transition_to(target).unwrap();
        }
        assert_eq!(workflow.state, WorkflowState::Completed);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let mut workflow = WorkflowInstance::from_spec(&spec()).unwrap();
        workflow.transition_to(WorkflowState::Running).unwrap();
        workflow.transition_to(WorkflowState::Completed).unwrap();

        for target in [
            WorkflowState::Pending,
            WorkflowState::Running,
            WorkflowState::Paused,
            WorkflowState::Failed,
            WorkflowState::Stopped,
        ] {
            let err = workflow.transition_to(target).unwrap_err();
            assert_eq!(err.from, WorkflowState::Completed);
            assert_eq!(err.to, target);
            assert_eq!(workflow.state, WorkflowState::Completed);
        }
    }

    #[test]
    fn test_transition_table_is_exhaustive() {
        use WorkflowState::*;
        let all = [Pending, Running, Paused, Completed, Failed, Stopped];
        for from in all {
            for to in all {
                let mut workflow = WorkflowInstance::from_spec(&spec()).unwrap();
                workflow.state = from;
                let accepted = workflow.transition_to(to).is_ok();
                assert_eq!(
                    accepted,
                    from.can_transition_to(to),
                    "transition {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_started_at_set_once() {
        let mut workflow = WorkflowInstance::from_spec(&spec()).unwrap();
        workflow.transition_to(WorkflowState::Running).unwrap();
        let first = workflow.started_at.unwrap();

        workflow.transition_to(WorkflowState::Paused).unwrap();
        workflow.transition_to(WorkflowState::Running).unwrap();
        assert_eq!(workflow.started_at.unwrap(), first);
    }

    #[test]
    fn test_heartbeat_and_progress() {
        let mut workflow = WorkflowInstance::from_spec(&spec()).unwrap();
        assert!(workflow.last_heartbeat_at.is_none());

        workflow.record_heartbeat();
        assert!(workflow.last_heartbeat_at.is_some());
        assert!(workflow.last_progress_at.is_none());

        workflow.record_progress();
        assert!(workflow.last_progress_at.is_some());
        assert_eq!(workflow.last_progress_at, workflow.last_heartbeat_at);
    }

    #[test]
    fn test_token_counter_is_monotonic() {
        let mut workflow = WorkflowInstance::from_spec(&spec()).unwrap();
        workflow.add_tokens(100);
        workflow.add_tokens(250);
        assert_eq!(workflow.tokens_used, 350);
    }

    #[test]
    fn test_predicates() {
        let mut workflow = WorkflowInstance::from_spec(&spec()).unwrap();
        assert!(workflow.is_active());
        assert!(!workflow.is_running());

        workflow.transition_to(WorkflowState::Running).unwrap();
        assert!(workflow.is_running());

        workflow.transition_to(WorkflowState::Paused).unwrap();
        assert!(workflow.is_paused());

        workflow.transition_to(WorkflowState::Stopped).unwrap();
        assert!(workflow.is_terminal());
        assert!(!workflow.is_active());
    }
}
