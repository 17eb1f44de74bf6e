//! # Cross-Workflow Event Bus
//!
//! Fans in events from every attached workflow's internal channels and
//! republishes them to subscribers, wrapped in control-plane envelopes that
//! carry the workflow's identity and current state. Lifecycle events
//! (`workflow.*`) additionally invoke a registered callback, which is the
//! intended hook for automatic workflow state changes.

mod broker;
mod classify;

pub use broker::{Broker, SUBSCRIBER_BUFFER};
pub use classify::{
    classify, AgentState, BusPayload, CommandLogEvent, ControlPlaneEventType, FabricEvent,
    MessageEvent, ProcessEvent, ProcessEventKind, ProcessRole,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::workflow::{WorkflowRegistry, WorkflowState};

// ============================================================================
// ENVELOPE
// ============================================================================

/// A workflow event enriched with control-plane context.
#[derive(Debug, Clone, Serialize)]
pub struct ControlPlaneEvent {
    #[serde(rename = "type")]
    pub event_type: ControlPlaneEventType,
    /// Filled at publish time when the originator left it empty.
    pub timestamp: Option<DateTime<Utc>>,
    pub workflow_id: Uuid,
    pub template_id: String,
    pub workflow_name: String,
    pub state: WorkflowState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub payload: BusPayload,
}

impl ControlPlaneEvent {
    /// Envelope for a bus-originated event (workflow-created and friends)
    /// that doesn't flow through a forwarder.
    pub fn direct(
        event_type: ControlPlaneEventType,
        workflow_id: Uuid,
        template_id: impl Into<String>,
        workflow_name: impl Into<String>,
        state: WorkflowState,
        payload: BusPayload,
    ) -> Self {
        Self {
            event_type,
            timestamp: None,
            workflow_id,
            template_id: template_id.into(),
            workflow_name: workflow_name.into(),
            state,
            process_id: None,
            task_id: None,
            payload,
        }
    }
}

/// Callback invoked synchronously for every lifecycle (`workflow.*`) event.
pub type LifecycleCallback = Arc<dyn Fn(&ControlPlaneEvent) + Send + Sync>;

// ============================================================================
// EVENT BUS
// ============================================================================

/// The fan-in/fan-out hub for all workflows.
pub struct EventBus {
    registry: Arc<WorkflowRegistry>,
    broker: Arc<Broker>,
    attachments: Mutex<HashMap<Uuid, CancellationToken>>,
    lifecycle: Arc<RwLock<Option<LifecycleCallback>>>,
}

impl EventBus {
    pub fn new(registry: Arc<WorkflowRegistry>) -> Self {
        Self {
            registry,
            broker: Arc::new(Broker::new()),
            attachments: Mutex::new(HashMap::new()),
            lifecycle: Arc::new(RwLock::new(None)),
        }
    }

    /// Register the lifecycle callback (replaces any previous one).
    pub fn set_lifecycle_callback(&self, callback: LifecycleCallback) {
        *self.lifecycle.write() = Some(callback);
    }

    /// Subscribe to the enriched stream. The channel closes when `token`
    /// fires or the bus closes.
    pub fn subscribe(&self, token: CancellationToken) -> mpsc::Receiver<ControlPlaneEvent> {
        self.broker.subscribe(token)
    }

    /// Attach a workflow's internal event source (and optionally its
    /// message-repository source). Attaching an id that is already attached
    /// detaches the existing subscription first, so re-attachment is
    /// idempotent.
    pub fn attach(
        &self,
        workflow_id: Uuid,
        events: mpsc::Receiver<BusPayload>,
        messages: Option<mpsc::Receiver<BusPayload>>,
    ) {
        let token = CancellationToken::new();
        {
            let mut attachments = self.attachments.lock();
            if let Some(existing) = attachments.insert(workflow_id, token.clone()) {
                existing.cancel();
            }
        }

        tokio::spawn(forward_source(
            Arc::clone(&self.registry),
            Arc::clone(&self.broker),
            Arc::clone(&self.lifecycle),
            workflow_id,
            events,
            token.clone(),
        ));

        if let Some(messages) = messages {
            tokio::spawn(forward_source(
                Arc::clone(&self.registry),
                Arc::clone(&self.broker),
                Arc::clone(&self.lifecycle),
                workflow_id,
                messages,
                token,
            ));
        }
    }

    /// Stop forwarding for a workflow. Unknown ids are a no-op.
    pub fn detach(&self, workflow_id: Uuid) {
        if let Some(token) = self.attachments.lock().remove(&workflow_id) {
            token.cancel();
        }
    }

    /// Whether a workflow currently has a live attachment.
    pub fn is_attached(&self, workflow_id: Uuid) -> bool {
        self.attachments.lock().contains_key(&workflow_id)
    }

    /// Publish an envelope that originates outside any workflow (e.g.
    /// workflow-created). Bypasses the forwarders; the timestamp is filled
    /// in when empty.
    pub fn publish_direct(&self, mut envelope: ControlPlaneEvent) {
        if envelope.timestamp.is_none() {
            envelope.timestamp = Some(Utc::now());
        }
        if envelope.event_type.is_lifecycle() {
            let callback = self.lifecycle.read().clone();
            if let Some(callback) = callback {
                callback(&envelope);
            }
        }
        self.broker.publish(&envelope);
    }

    /// Detach every workflow and close every subscriber channel.
    pub fn close(&self) {
        let tokens: Vec<CancellationToken> = {
            let mut attachments = self.attachments.lock();
            attachments.drain().map(|(_, token)| token).collect()
        };
        for token in tokens {
            token.cancel();
        }
        self.broker.close();
    }

    pub fn subscriber_count(&self) -> usize {
        self.broker.subscriber_count()
    }
}

/// One forwarder: single-threaded per source, so per-workflow ordering is
/// preserved end to end.
async fn forward_source(
    registry: Arc<WorkflowRegistry>,
    broker: Arc<Broker>,
    lifecycle: Arc<RwLock<Option<LifecycleCallback>>>,
    workflow_id: Uuid,
    mut source: mpsc::Receiver<BusPayload>,
    token: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            // Biased so a detached forwarder never races its cancellation
            // against one last buffered event.
            biased;
            _ = token.cancelled() => break,
            payload = source.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        let event_type = classify(&payload);

        // Any forwarded event is a sign of life.
        let heartbeat = registry.update(workflow_id, |workflow| {
            workflow.record_heartbeat();
            match event_type {
                ControlPlaneEventType::WorkerSpawned => {
                    workflow.active_workers += 1;
                }
                ControlPlaneEventType::WorkerRetired => {
                    workflow.active_workers = workflow.active_workers.saturating_sub(1);
                }
                _ => {}
            }
        });
        if heartbeat.is_err() {
            debug!(%workflow_id, "dropping event for unregistered workflow");
            continue;
        }

        let Ok(workflow) = registry.get(workflow_id) else {
            continue;
        };

        let envelope = ControlPlaneEvent {
            event_type,
            timestamp: Some(Utc::now()),
            workflow_id,
            template_id: workflow.template_id.clone(),
            workflow_name: workflow.name.clone(),
            state: workflow.state,
            process_id: payload.process_id().map(str::to_string),
            task_id: payload.task_id().map(str::to_string),
            payload,
        };

        if event_type.is_lifecycle() {
            // Snapshot the callback reference, then invoke outside the lock.
            let callback = lifecycle.read().clone();
            if let Some(callback) = callback {
                callback(&envelope);
            }
        }

        broker.publish(&envelope);
    }
}
