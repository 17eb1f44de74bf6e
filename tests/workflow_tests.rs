//! # Workflow Registry Tests
//!
//! Cross-thread behavior of the workflow store: atomic updates, consistent
//! snapshots, and the state machine driven through the registry.

use std::collections::HashMap;
use std::sync::Arc;

use hive::workflow::{
    ListQuery, RegistryError, WorkflowInstance, WorkflowRegistry, WorkflowSpec, WorkflowState,
};

fn spec(template: &str) -> WorkflowSpec {
    WorkflowSpec {
        template_id: template.to_string(),
        initial_prompt: "go".to_string(),
        ..Default::default()
    }
}

#[test]
fn test_full_lifecycle_through_registry() {
    let registry = WorkflowRegistry::new();
    let workflow = WorkflowInstance::from_spec(&spec("lifecycle")).unwrap();
    let id = workflow.id;
    registry.put(workflow).unwrap();

    for target in [
        WorkflowState::Running,
        WorkflowState::Paused,
        WorkflowState::Running,
        WorkflowState::Completed,
    ] {
        registry
            .update(id, |w| w.transition_to(target))
            .unwrap()
            .unwrap();
    }

    let finished = registry.get(id).unwrap();
    assert_eq!(finished.state, WorkflowState::Completed);
    assert!(finished.started_at.is_some());

    // Terminal: every further transition is rejected and the state sticks.
    let rejected = registry
        .update(id, |w| w.transition_to(WorkflowState::Running))
        .unwrap();
    assert!(rejected.is_err());
    assert_eq!(registry.get(id).unwrap().state, WorkflowState::Completed);
}

#[test]
fn test_concurrent_token_updates_are_atomic() {
    let registry = Arc::new(WorkflowRegistry::new());
    let workflow = WorkflowInstance::from_spec(&spec("counters")).unwrap();
    let id = workflow.id;
    registry.put(workflow).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(std::thread::spawn(move || {
            for _ in 0..1000 {
                registry.update(id, |w| w.add_tokens(1)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.get(id).unwrap().tokens_used, 8000);
}

#[test]
fn test_list_is_a_consistent_snapshot_under_mutation() {
    let registry = Arc::new(WorkflowRegistry::new());
    for _ in 0..50 {
        registry
            .put(WorkflowInstance::from_spec(&spec("churn")).unwrap())
            .unwrap();
    }

    let writer = {
        let registry = Arc::clone(&registry);
        std::thread::spawn(move || {
            for _ in 0..200 {
                registry
                    .put(WorkflowInstance::from_spec(&spec("churn")).unwrap())
                    .unwrap();
            }
        })
    };

    // Every observed listing must be internally consistent: sorted, and no
    // partial inserts.
    for _ in 0..50 {
        let listing = registry.list(&ListQuery::default());
        for pair in listing.windows(2) {
            let ordering = pair[0]
                .created_at
                .cmp(&pair[1].created_at)
                .then_with(|| pair[0].id.cmp(&pair[1].id));
            assert!(ordering.is_ge());
        }
    }
    writer.join().unwrap();
    assert_eq!(registry.len(), 250);
}

#[test]
fn test_limit_bounds_results() {
    let registry = WorkflowRegistry::new();
    for _ in 0..10 {
        registry
            .put(WorkflowInstance::from_spec(&spec("bounded")).unwrap())
            .unwrap();
    }

    for limit in [1, 3, 10, 25] {
        let listing = registry.list(&ListQuery {
            limit,
            ..Default::default()
        });
        assert!(listing.len() <= limit);
    }
}

#[test]
fn test_label_query_matches_all() {
    let registry = WorkflowRegistry::new();

    let mut both = spec("labeled");
    both.labels = HashMap::from([
        ("team".to_string(), "infra".to_string()),
        ("priority".to_string(), "high".to_string()),
    ]);
    let mut one = spec("labeled");
    one.labels = HashMap::from([("team".to_string(), "infra".to_string())]);

    let matching = WorkflowInstance::from_spec(&both).unwrap();
    let matching_id = matching.id;
    registry.put(matching).unwrap();
    registry
        .put(WorkflowInstance::from_spec(&one).unwrap())
        .unwrap();

    let listing = registry.list(&ListQuery {
        labels: HashMap::from([
            ("team".to_string(), "infra".to_string()),
            ("priority".to_string(), "high".to_string()),
        ]),
        ..Default::default()
    });
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].id, matching_id);
}

#[test]
fn test_remove_then_get_not_found() {
    let registry = WorkflowRegistry::new();
    let workflow = WorkflowInstance::from_spec(&spec("gone")).unwrap();
    let id = workflow.id;
    registry.put(workflow).unwrap();
    registry.remove(id).unwrap();

    assert_eq!(registry.get(id).unwrap_err(), RegistryError::NotFound(id));
}
