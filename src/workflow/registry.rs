//! In-memory workflow store.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use super::instance::{WorkflowInstance, WorkflowState};

// ============================================================================
// ERRORS
// ============================================================================

/// Store operation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("workflow {0} already registered")]
    DuplicateId(Uuid),

    #[error("workflow {0} not found")]
    NotFound(Uuid),

    #[error("workflow id is not valid")]
    InvalidId,
}

// ============================================================================
// LIST QUERY
// ============================================================================

/// Filter for [`WorkflowRegistry::list`]. All criteria are conjunctive;
/// empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Match workflows in any of these states.
    pub states: Vec<WorkflowState>,
    /// Every listed label must be present with the exact value.
    pub labels: HashMap<String, String>,
    /// Match this template only.
    pub template_id: Option<String>,
    /// Skip this many results after sorting.
    pub offset: usize,
    /// Cap the result count; 0 means no limit.
    pub limit: usize,
}

impl ListQuery {
    fn matches(&self, workflow: &WorkflowInstance) -> bool {
        if !self.states.is_empty() && !self.states.contains(&workflow.state) {
            return false;
        }
        if let Some(template_id) = &self.template_id {
            if &workflow.template_id != template_id {
                return false;
            }
        }
        self.labels
            .iter()
            .all(|(key, value)| workflow.labels.get(key) == Some(value))
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Thread-safe workflow store.
///
/// Reads (`get`, `list`, `count`) take the read lock; mutations take the
/// write lock. `update` runs its closure under the write lock, so the
/// mutation is atomic with respect to every other accessor, and `list`
/// returns a consistent point-in-time snapshot.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<Uuid, WorkflowInstance>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a workflow. Fails on a nil id or an id already present.
    pub fn put(&self, workflow: WorkflowInstance) -> Result<(), RegistryError> {
        if workflow.id.is_nil() {
            return Err(RegistryError::InvalidId);
        }
        let mut workflows = self.workflows.write();
        if workflows.contains_key(&workflow.id) {
            return Err(RegistryError::DuplicateId(workflow.id));
        }
        workflows.insert(workflow.id, workflow);
        Ok(())
    }

    /// Fetch a copy of a workflow.
    pub fn get(&self, id: Uuid) -> Result<WorkflowInstance, RegistryError> {
        self.workflows
            .read()
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Mutate a workflow in place. The closure runs under the write lock:
    /// single-writer, atomic with respect to readers.
    pub fn update<F, R>(&self, id: Uuid, mutate: F) -> Result<R, RegistryError>
    where
        F: FnOnce(&mut WorkflowInstance) -> R,
    {
        let mut workflows = self.workflows.write();
        let workflow = workflows.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        Ok(mutate(workflow))
    }

    /// Filtered listing: a consistent snapshot sorted by `created_at`
    /// descending, tie-broken by id descending, with offset/limit applied
    /// after sorting.
    pub fn list(&self, query: &ListQuery) -> Vec<WorkflowInstance> {
        let mut results: Vec<WorkflowInstance> = {
            let workflows = self.workflows.read();
            workflows
                .values()
                .filter(|w| query.matches(w))
                .cloned()
                .collect()
        };

        results.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let results: Vec<WorkflowInstance> =
            results.into_iter().skip(query.offset).collect();
        if query.limit > 0 {
            results.into_iter().take(query.limit).collect()
        } else {
            results
        }
    }

    /// Remove a workflow.
    pub fn remove(&self, id: Uuid) -> Result<(), RegistryError> {
        self.workflows
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Count workflows per state.
    pub fn count(&self) -> HashMap<WorkflowState, usize> {
        let workflows = self.workflows.read();
        let mut counts = HashMap::new();
        for workflow in workflows.values() {
            *counts.entry(workflow.state).or_insert(0) += 1;
        }
        counts
    }

    /// Total number of stored workflows.
    pub fn len(&self) -> usize {
        self.workflows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.read().is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowSpec;

    fn workflow(template: &str) -> WorkflowInstance {
        WorkflowInstance::from_spec(&WorkflowSpec {
            template_id: template.to_string(),
            initial_prompt: "go".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_put_then_get_round_trip() {
        let registry = WorkflowRegistry::new();
        let stored = workflow("t1");
        let id = stored.id;
        registry.put(stored.clone()).unwrap();

        let fetched = registry.get(id).unwrap();
        assert_eq!(fetched.id, stored.id);
        assert_eq!(fetched.template_id, stored.template_id);
        assert_eq!(fetched.created_at, stored.created_at);
    }

    #[test]
    fn test_duplicate_and_invalid_ids() {
        let registry = WorkflowRegistry::new();
        let stored = workflow("t1");
        let id = stored.id;
        registry.put(stored.clone()).unwrap();
        assert_eq!(
            registry.put(stored).unwrap_err(),
            RegistryError::DuplicateId(id)
        );

        let mut nil_id = workflow("t2");
        nil_id.id = Uuid::nil();
        assert_eq!(registry.put(nil_id).unwrap_err(), RegistryError::InvalidId);
    }

    #[test]
    fn test_update_mutates_atomically() {
        let registry = WorkflowRegistry::new();
        let stored = workflow("t1");
        let id = stored.id;
        registry.put(stored).unwrap();

        registry
            .update(id, |w| {
                w.transition_to(WorkflowState::Running).unwrap();
                w.add_tokens(42);
            })
            .unwrap();

        let fetched = registry.get(id).unwrap();
        assert_eq!(fetched.state, WorkflowState::Running);
        assert_eq!(fetched.tokens_used, 42);

        let missing = registry.update(Uuid::new_v4(), |_| ());
        assert!(matches!(missing, Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_remove() {
        let registry = WorkflowRegistry::new();
        let stored = workflow("t1");
        let id = stored.id;
        registry.put(stored).unwrap();

        registry.remove(id).unwrap();
        assert!(matches!(registry.get(id), Err(RegistryError::NotFound(_))));
        assert!(matches!(
            registry.remove(id),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_filters_by_state_labels_and_template() {
        let registry = WorkflowRegistry::new();

        let mut a = workflow("review");
        a.labels.insert("team".to_string(), "infra".to_string());
        let mut b = workflow("review");
        b.transition_to(WorkflowState::Running).unwrap();
        b.labels.insert("team".to_string(), "infra".to_string());
        let c = workflow("deploy");

        let (id_a, id_b) = (a.id, b.id);
        for w in [a, b, c] {
            registry.put(w).unwrap();
        }

        let running = registry.list(&ListQuery {
            states: vec![WorkflowState::Running],
            ..Default::default()
        });
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, id_b);

        let infra = registry.list(&ListQuery {
            labels: HashMap::from([("team".to_string(), "infra".to_string())]),
            ..Default::default()
        });
        assert_eq!(infra.len(), 2);
        assert!(infra.iter().any(|w| w.id == id_a));

        let reviews = registry.list(&ListQuery {
            template_id: Some("review".to_string()),
            ..Default::default()
        });
        assert_eq!(reviews.len(), 2);
    }

    #[test]
    fn test_list_sorted_newest_first_with_offset_and_limit() {
        let registry = WorkflowRegistry::new();
        for _ in 0..5 {
            registry.put(workflow("t")).unwrap();
        }

        let all = registry.list(&ListQuery::default());
        assert_eq!(all.len(), 5);
        for pair in all.windows(2) {
            let ordering = pair[0]
                .created_at
                .cmp(&pair[1].created_at)
                .then_with(|| pair[0].id.cmp(&pair[1].id));
            assert!(ordering.is_ge(), "listing must be newest-first");
        }

        let limited = registry.list(&ListQuery {
            limit: 2,
            ..Default::default()
        });
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, all[0].id);

        let paged = registry.list(&ListQuery {
            offset: 4,
            limit: 10,
            ..Default::default()
        });
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].id, all[4].id);
    }

    #[test]
    fn test_count_by_state() {
        let registry = WorkflowRegistry::new();
        let mut running = workflow("t");
        running.transition_to(WorkflowState::Running).unwrap();
        registry.put(running).unwrap();
        registry.put(workflow("t")).unwrap();
        registry.put(workflow("t")).unwrap();

        let counts = registry.count();
        assert_eq!(counts[&WorkflowState::Pending], 2);
        assert_eq!(counts[&WorkflowState::Running], 1);
        assert_eq!(counts.get(&WorkflowState::Failed), None);
    }
}
