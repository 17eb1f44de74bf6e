//! # Orchestrator
//!
//! The composition root: owns the client registry, the workflow registry,
//! and the event bus, and wires them together. Constructed once by the
//! entry point and handed down - there is no global mutable state.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bus::{
    BusPayload, ControlPlaneEvent, ControlPlaneEventType, EventBus, ProcessEvent,
    ProcessEventKind, ProcessRole,
};
use crate::client::{register_builtin, ClientConfig, ClientRegistry};
use crate::error::HiveError;
use crate::event::EventType;
use crate::process::HeadlessProcess;
use crate::workflow::{
    WorkflowInstance, WorkflowRegistry, WorkflowSpec, WorkflowState,
};

/// Capacity of the per-workflow internal payload channel.
const WORKFLOW_CHANNEL_CAPACITY: usize = 100;

/// Owns the three registries and the wiring between them.
pub struct Orchestrator {
    clients: ClientRegistry,
    workflows: Arc<WorkflowRegistry>,
    bus: Arc<EventBus>,
}

impl Orchestrator {
    /// An orchestrator with an empty client registry. Call
    /// [`ClientRegistry::register`] to add providers.
    pub fn new() -> Self {
        let workflows = Arc::new(WorkflowRegistry::new());
        let bus = Arc::new(EventBus::new(Arc::clone(&workflows)));
        Self {
            clients: ClientRegistry::new(),
            workflows,
            bus,
        }
    }

    /// An orchestrator with all five built-in providers registered.
    pub fn with_builtin_clients() -> Self {
        let orchestrator = Self::new();
        register_builtin(&orchestrator.clients);
        orchestrator
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn workflows(&self) -> &Arc<WorkflowRegistry> {
        &self.workflows
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Install the default lifecycle hook: `workflow.completed` /
    /// `workflow.failed` envelopes drive the corresponding state machine
    /// transition on the tracked workflow.
    pub fn install_lifecycle_sync(&self) {
        let workflows = Arc::clone(&self.workflows);
        self.bus
            .set_lifecycle_callback(Arc::new(move |envelope: &ControlPlaneEvent| {
                let target = match envelope.event_type {
                    ControlPlaneEventType::WorkflowCompleted => WorkflowState::Completed,
                    ControlPlaneEventType::WorkflowFailed => WorkflowState::Failed,
                    _ => return,
                };
                let _ = workflows.update(envelope.workflow_id, |workflow| {
                    // Already-terminal workflows reject this; that's fine.
                    let _ = workflow.transition_to(target);
                });
            }));
    }

    /// Validate a spec, register the workflow, and announce it.
    pub fn create_workflow(&self, spec: &WorkflowSpec) -> Result<WorkflowInstance, HiveError> {
        let workflow = WorkflowInstance::from_spec(spec)?;
        self.workflows.put(workflow.clone())?;
        self.bus.publish_direct(ControlPlaneEvent::direct(
            ControlPlaneEventType::WorkflowCreated,
            workflow.id,
            &workflow.template_id,
            &workflow.name,
            workflow.state,
            BusPayload::Raw(serde_json::Value::Null),
        ));
        Ok(workflow)
    }

    /// Spawn a provider process for a workflow and wire its event stream
    /// into the bus. The workflow transitions to running.
    pub async fn launch(
        &self,
        workflow_id: uuid::Uuid,
        provider: &str,
        config: &ClientConfig,
        role: ProcessRole,
    ) -> Result<HeadlessProcess, HiveError> {
        let client = self.clients.create(provider)?;
        let mut process = client.spawn(config).await?;

        self.workflows
            .update(workflow_id, |workflow| workflow.transition_to(WorkflowState::Running))??;

        let workflow = self.workflows.get(workflow_id)?;
        self.bus.publish_direct(ControlPlaneEvent::direct(
            ControlPlaneEventType::WorkflowStarted,
            workflow.id,
            &workflow.template_id,
            &workflow.name,
            workflow.state,
            BusPayload::Raw(serde_json::Value::Null),
        ));

        self.attach_process(workflow_id, &mut process, role);
        Ok(process)
    }

    /// Bridge a process's unified events onto the workflow's internal bus
    /// channel and attach that channel to the cross-workflow bus.
    pub fn attach_process(
        &self,
        workflow_id: uuid::Uuid,
        process: &mut HeadlessProcess,
        role: ProcessRole,
    ) {
        let Some(mut events) = process.take_events() else {
            return;
        };
        let pid = process.pid();
        let (tx, rx) = mpsc::channel::<BusPayload>(WORKFLOW_CHANNEL_CAPACITY);
        self.bus.attach(workflow_id, rx, None);

        tokio::spawn(async move {
            let process_id = pid.map(|p| p.to_string());
            let mut spawned = ProcessEvent::new(ProcessEventKind::Spawned, role);
            spawned.process_id = process_id.clone();
            if tx.send(BusPayload::Process(spawned)).await.is_err() {
                return;
            }

            while let Some(output) = events.recv().await {
                let kind = match output.event_type {
                    EventType::Result if !output.is_error_result => {
                        ProcessEventKind::WorkflowComplete
                    }
                    EventType::Error => ProcessEventKind::Error,
                    _ => ProcessEventKind::Output,
                };
                let mut event = ProcessEvent::new(kind, role);
                event.process_id = process_id.clone();
                event.output = Some(output);
                if tx.send(BusPayload::Process(event)).await.is_err() {
                    break;
                }
            }
        });
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}
