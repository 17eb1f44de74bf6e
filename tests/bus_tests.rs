//! # Event Bus Tests
//!
//! Fan-in, envelope enrichment, worker counters, lifecycle dispatch, and
//! attachment idempotency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hive::bus::{
    BusPayload, ControlPlaneEvent, ControlPlaneEventType, EventBus, ProcessEvent,
    ProcessEventKind, ProcessRole,
};
use hive::workflow::{WorkflowInstance, WorkflowRegistry, WorkflowSpec, WorkflowState};

// ============================================================================
// TEST HELPERS
// ============================================================================

fn registry_with_workflow() -> (Arc<WorkflowRegistry>, Uuid) {
    let registry = Arc::new(WorkflowRegistry::new());
    let workflow = WorkflowInstance::from_spec(&WorkflowSpec {
        template_id: "bus-test".to_string(),
        name: "bus test".to_string(),
        initial_prompt: "go".to_string(),
        ..Default::default()
    })
    .unwrap();
    let id = workflow.id;
    registry.put(workflow).unwrap();
    (registry, id)
}

fn output_event(role: ProcessRole) -> BusPayload {
    BusPayload::Process(
        ProcessEvent::new(ProcessEventKind::Output, role).with_process_id("proc-1"),
    )
}

async fn recv_timeout(
    rx: &mut mpsc::Receiver<ControlPlaneEvent>,
) -> Option<ControlPlaneEvent> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for envelope")
}

// ============================================================================
// FORWARDING & ENRICHMENT
// ============================================================================

#[tokio::test]
async fn test_forwarded_event_is_enriched() {
    let (registry, id) = registry_with_workflow();
    let bus = Arc::new(EventBus::new(Arc::clone(&registry)));

    let token = CancellationToken::new();
    let mut subscription = bus.subscribe(token.clone());

    let (tx, rx) = mpsc::channel(8);
    bus.attach(id, rx, None);
    tx.send(output_event(ProcessRole::Coordinator)).await.unwrap();

    let envelope = recv_timeout(&mut subscription).await.unwrap();
    assert_eq!(envelope.event_type, ControlPlaneEventType::CoordinatorOutput);
    assert_eq!(envelope.workflow_id, id);
    assert_eq!(envelope.template_id, "bus-test");
    assert_eq!(envelope.workflow_name, "bus test");
    assert_eq!(envelope.state, WorkflowState::Pending);
    assert_eq!(envelope.process_id.as_deref(), Some("proc-1"));
    assert!(envelope.timestamp.is_some());

    // Forwarding recorded a heartbeat on the workflow.
    assert!(registry.get(id).unwrap().last_heartbeat_at.is_some());
    token.cancel();
}

#[tokio::test]
async fn test_worker_counters_track_spawn_and_retire() {
    let (registry, id) = registry_with_workflow();
    let bus = Arc::new(EventBus::new(Arc::clone(&registry)));

    let token = CancellationToken::new();
    let mut subscription = bus.subscribe(token.clone());

    let (tx, rx) = mpsc::channel(8);
    bus.attach(id, rx, None);

    for _ in 0..2 {
        tx.send(BusPayload::Process(ProcessEvent::new(
            ProcessEventKind::Spawned,
            ProcessRole::Worker,
        )))
        .await
        .unwrap();
    }
    for _ in 0..2 {
        recv_timeout(&mut subscription).await.unwrap();
    }
    assert_eq!(registry.get(id).unwrap().active_workers, 2);

    // Retire three times; the counter must not go below zero.
    for _ in 0..3 {
        tx.send(BusPayload::Process(ProcessEvent::new(
            ProcessEventKind::StatusChange {
                to: hive::bus::AgentState::Retired,
            },
            ProcessRole::Worker,
        )))
        .await
        .unwrap();
    }
    for _ in 0..3 {
        recv_timeout(&mut subscription).await.unwrap();
    }
    assert_eq!(registry.get(id).unwrap().active_workers, 0);
    token.cancel();
}

#[tokio::test]
async fn test_lifecycle_callback_fires_for_workflow_events_only() {
    let (registry, id) = registry_with_workflow();
    let bus = Arc::new(EventBus::new(Arc::clone(&registry)));

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        bus.set_lifecycle_callback(Arc::new(move |envelope| {
            assert!(envelope.event_type.is_lifecycle());
            calls.fetch_add(1, Ordering::SeqCst);
        }));
    }

    let token = CancellationToken::new();
    let mut subscription = bus.subscribe(token.clone());

    let (tx, rx) = mpsc::channel(8);
    bus.attach(id, rx, None);

    tx.send(output_event(ProcessRole::Worker)).await.unwrap();
    tx.send(BusPayload::Process(ProcessEvent::new(
        ProcessEventKind::WorkflowComplete,
        ProcessRole::Coordinator,
    )))
    .await
    .unwrap();

    recv_timeout(&mut subscription).await.unwrap();
    let complete = recv_timeout(&mut subscription).await.unwrap();
    assert_eq!(
        complete.event_type,
        ControlPlaneEventType::WorkflowCompleted
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    token.cancel();
}

#[tokio::test]
async fn test_message_source_forwards_as_message_posted() {
    let (registry, id) = registry_with_workflow();
    let bus = Arc::new(EventBus::new(registry));

    let token = CancellationToken::new();
    let mut subscription = bus.subscribe(token.clone());

    let (events_tx, events_rx) = mpsc::channel(8);
    let (messages_tx, messages_rx) = mpsc::channel(8);
    bus.attach(id, events_rx, Some(messages_rx));

    messages_tx
        .send(BusPayload::Message(hive::bus::MessageEvent {
            author: "coordinator".to_string(),
            body: "ready for review".to_string(),
        }))
        .await
        .unwrap();

    let envelope = recv_timeout(&mut subscription).await.unwrap();
    assert_eq!(envelope.event_type, ControlPlaneEventType::MessagePosted);
    drop(events_tx);
    token.cancel();
}

// ============================================================================
// ATTACHMENT SEMANTICS
// ============================================================================

#[tokio::test]
async fn test_reattach_is_idempotent() {
    let (registry, id) = registry_with_workflow();
    let bus = Arc::new(EventBus::new(registry));

    let token = CancellationToken::new();
    let mut subscription = bus.subscribe(token.clone());

    // First attachment, then a second one for the same workflow: the first
    // subscription is detached, so events sent on the old channel go nowhere
    // and events on the new channel flow exactly once.
    let (old_tx, old_rx) = mpsc::channel(8);
    bus.attach(id, old_rx, None);
    let (new_tx, new_rx) = mpsc::channel(8);
    bus.attach(id, new_rx, None);
    assert!(bus.is_attached(id));

    // Give the detached forwarder a moment to observe its cancellation.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = old_tx.send(output_event(ProcessRole::Worker)).await;
    new_tx.send(output_event(ProcessRole::Coordinator)).await.unwrap();

    let envelope = recv_timeout(&mut subscription).await.unwrap();
    assert_eq!(envelope.event_type, ControlPlaneEventType::CoordinatorOutput);

    // No second delivery from the stale attachment.
    let extra = tokio::time::timeout(Duration::from_millis(200), subscription.recv()).await;
    assert!(extra.is_err(), "stale forwarder must not deliver");
    token.cancel();
}

#[tokio::test]
async fn test_detach_stops_forwarding() {
    let (registry, id) = registry_with_workflow();
    let bus = Arc::new(EventBus::new(registry));

    let token = CancellationToken::new();
    let mut subscription = bus.subscribe(token.clone());

    let (tx, rx) = mpsc::channel(8);
    bus.attach(id, rx, None);
    bus.detach(id);
    assert!(!bus.is_attached(id));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = tx.send(output_event(ProcessRole::Worker)).await;
    let extra = tokio::time::timeout(Duration::from_millis(200), subscription.recv()).await;
    assert!(extra.is_err(), "detached workflow must not deliver");
    token.cancel();
}

#[tokio::test]
async fn test_direct_publish_fills_timestamp_and_bypasses_forwarders() {
    let (registry, id) = registry_with_workflow();
    let bus = Arc::new(EventBus::new(registry));

    let token = CancellationToken::new();
    let mut subscription = bus.subscribe(token.clone());

    bus.publish_direct(ControlPlaneEvent::direct(
        ControlPlaneEventType::WorkflowCreated,
        id,
        "bus-test",
        "bus test",
        WorkflowState::Pending,
        BusPayload::Raw(serde_json::Value::Null),
    ));

    let envelope = recv_timeout(&mut subscription).await.unwrap();
    assert_eq!(envelope.event_type, ControlPlaneEventType::WorkflowCreated);
    assert!(envelope.timestamp.is_some());
    token.cancel();
}

#[tokio::test]
async fn test_subscription_closes_on_token_cancel() {
    let (registry, _) = registry_with_workflow();
    let bus = Arc::new(EventBus::new(registry));

    let token = CancellationToken::new();
    let mut subscription = bus.subscribe(token.clone());
    token.cancel();

    let closed = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .expect("subscription should close promptly");
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_close_tears_everything_down() {
    let (registry, id) = registry_with_workflow();
    let bus = Arc::new(EventBus::new(registry));

    let token = CancellationToken::new();
    let mut subscription = bus.subscribe(token);
    let (_tx, rx) = mpsc::channel(8);
    bus.attach(id, rx, None);

    bus.close();
    let closed = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .expect("subscription should close on bus close");
    assert!(closed.is_none());
    assert_eq!(bus.subscriber_count(), 0);
}
