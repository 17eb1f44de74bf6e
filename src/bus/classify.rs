//! Payload taxonomy and the control-plane event classifier.
//!
//! Workflows publish loosely-shaped internal events; the control plane wants
//! one stable tag per event so subscribers can route without unpacking
//! payloads. [`classify`] is that mapping: a pure, total function from
//! payload to tag (first match wins, everything unmatched is `unknown`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::OutputEvent;

// ============================================================================
// PAYLOADS
// ============================================================================

/// Which seat an agent process occupies in its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    Coordinator,
    Worker,
}

/// Target of a status-change process event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Working,
    Ready,
    Retired,
}

/// What happened to an agent process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessEventKind {
    Spawned,
    Output,
    StatusChange { to: AgentState },
    Error,
    WorkflowComplete,
    TokenUsage,
    QueueChanged,
    Ready,
    Working,
    Incoming,
}

/// An event about one agent process inside a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub kind: ProcessEventKind,
    pub role: ProcessRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// The unified provider event, when one triggered this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputEvent>,
}

impl ProcessEvent {
    pub fn new(kind: ProcessEventKind, role: ProcessRole) -> Self {
        Self {
            kind,
            role,
            process_id: None,
            task_id: None,
            output: None,
        }
    }

    pub fn with_process_id(mut self, id: impl Into<String>) -> Self {
        self.process_id = Some(id.into());
        self
    }

    pub fn with_task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    pub fn with_output(mut self, output: OutputEvent) -> Self {
        self.output = Some(output);
        self
    }
}

/// A shell command run on behalf of a workflow, logged for the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLogEvent {
    pub command: String,
    #[serde(default)]
    pub output: String,
}

/// A post into the shared fabric (cross-workflow blackboard).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricEvent {
    pub topic: String,
    pub body: Value,
}

/// A message stored in a workflow's message repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub author: String,
    pub body: String,
}

/// Everything a workflow can put on its internal bus.
///
/// The tagged-variant shape doubles as the enrichment interface: the
/// envelope builder asks the payload for process/task ids instead of probing
/// arbitrary objects for capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload", content = "data", rename_all = "snake_case")]
pub enum BusPayload {
    Process(ProcessEvent),
    CommandLog(CommandLogEvent),
    Fabric(FabricEvent),
    Message(MessageEvent),
    /// Anything else; classifies to `unknown` and passes through.
    Raw(Value),
}

impl BusPayload {
    pub fn process_id(&self) -> Option<&str> {
        match self {
            BusPayload::Process(event) => event.process_id.as_deref(),
            _ => None,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            BusPayload::Process(event) => event.task_id.as_deref(),
            _ => None,
        }
    }
}

// ============================================================================
// CONTROL-PLANE EVENT TYPES
// ============================================================================

/// Stable control-plane tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlPlaneEventType {
    WorkflowCreated,
    WorkflowStarted,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowCompleted,
    WorkflowFailed,
    CoordinatorSpawned,
    CoordinatorReplaced,
    CoordinatorOutput,
    CoordinatorIncoming,
    WorkerSpawned,
    WorkerRetired,
    WorkerOutput,
    WorkerIncoming,
    TaskAssigned,
    TaskCompleted,
    TaskFailed,
    HealthUnhealthy,
    HealthStuck,
    HealthRecovering,
    HealthRecovered,
    CommandLog,
    FabricPosted,
    MessagePosted,
    Unknown,
}

impl ControlPlaneEventType {
    pub fn as_str(&self) -> &'static str {
        use ControlPlaneEventType::*;
        match self {
            WorkflowCreated => "workflow.created",
            WorkflowStarted => "workflow.started",
            WorkflowPaused => "workflow.paused",
            WorkflowResumed => "workflow.resumed",
            WorkflowCompleted => "workflow.completed",
            WorkflowFailed => "workflow.failed",
            CoordinatorSpawned => "coordinator.spawned",
            CoordinatorReplaced => "coordinator.replaced",
            CoordinatorOutput => "coordinator.output",
            CoordinatorIncoming => "coordinator.incoming",
            WorkerSpawned => "worker.spawned",
            WorkerRetired => "worker.retired",
            WorkerOutput => "worker.output",
            WorkerIncoming => "worker.incoming",
            TaskAssigned => "task.assigned",
            TaskCompleted => "task.completed",
            TaskFailed => "task.failed",
            HealthUnhealthy => "health.unhealthy",
            HealthStuck => "health.stuck",
            HealthRecovering => "health.recovering",
            HealthRecovered => "health.recovered",
            CommandLog => "command.log",
            FabricPosted => "fabric.posted",
            MessagePosted => "message.posted",
            Unknown => "unknown",
        }
    }

    /// Lifecycle events (the `workflow.*` family) trigger the bus's
    /// lifecycle callback.
    pub fn is_lifecycle(&self) -> bool {
        use ControlPlaneEventType::*;
        matches!(
            self,
            WorkflowCreated
                | WorkflowStarted
                | WorkflowPaused
                | WorkflowResumed
                | WorkflowCompleted
                | WorkflowFailed
        )
    }
}

impl std::fmt::Display for ControlPlaneEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ControlPlaneEventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Map a payload to its control-plane tag. First match wins; anything
/// unmatched is `unknown`.
pub fn classify(payload: &BusPayload) -> ControlPlaneEventType {
    use ControlPlaneEventType::*;

    let process = match payload {
        BusPayload::Process(event) => event,
        BusPayload::CommandLog(_) => return CommandLog,
        BusPayload::Fabric(_) => return FabricPosted,
        BusPayload::Message(_) => return MessagePosted,
        BusPayload::Raw(_) => return Unknown,
    };

    let role_output = match process.role {
        ProcessRole::Coordinator => CoordinatorOutput,
        ProcessRole::Worker => WorkerOutput,
    };

    match &process.kind {
        ProcessEventKind::Spawned => match process.role {
            ProcessRole::Coordinator => CoordinatorSpawned,
            ProcessRole::Worker => WorkerSpawned,
        },
        ProcessEventKind::Output => role_output,
        ProcessEventKind::StatusChange { to: AgentState::Retired } => match process.role {
            // A coordinator retiring means a replacement is taking over.
            ProcessRole::Coordinator => CoordinatorReplaced,
            ProcessRole::Worker => WorkerRetired,
        },
        ProcessEventKind::StatusChange { .. } => role_output,
        // Coordinator failures surface as output so the operator sees them;
        // worker failures fail the task they were assigned.
        ProcessEventKind::Error => match process.role {
            ProcessRole::Coordinator => CoordinatorOutput,
            ProcessRole::Worker => TaskFailed,
        },
        ProcessEventKind::WorkflowComplete => WorkflowCompleted,
        ProcessEventKind::TokenUsage
        | ProcessEventKind::QueueChanged
        | ProcessEventKind::Ready
        | ProcessEventKind::Working => role_output,
        ProcessEventKind::Incoming => match process.role {
            ProcessRole::Coordinator => CoordinatorIncoming,
            ProcessRole::Worker => WorkerIncoming,
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================
