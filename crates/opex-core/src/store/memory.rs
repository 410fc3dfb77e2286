//! In-memory store for tests and embedding.
//!
//! Holds everything behind one async mutex, which makes every trait call
//! atomic. Nothing survives a restart.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{DurableStore, StepTransition};
use crate::error::{OpexError, Result};
use crate::identifier::CounterKey;
use opex_types::{Initiative, InitiativeId, StepId, StepStatus, WorkflowStep};

#[derive(Default)]
struct Tables {
    counters: HashMap<CounterKey, u64>,
    initiatives: HashMap<InitiativeId, Initiative>,
    steps: HashMap<StepId, WorkflowStep>,
    steps_by_initiative: HashMap<InitiativeId, Vec<StepId>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a counter, e.g. to simulate a store recovered after restart
    pub async fn set_counter(&self, key: CounterKey, value: u64) {
        self.tables.lock().await.counters.insert(key, value);
    }

    pub async fn step_count(&self) -> usize {
        self.tables.lock().await.steps.len()
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn load_counter(&self, key: &CounterKey) -> Result<u64> {
        Ok(self.tables.lock().await.counters.get(key).copied().unwrap_or(0))
    }

    async fn increment_counter(&self, key: &CounterKey) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let counter = tables.counters.entry(key.clone()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn save_initiative(&self, initiative: &Initiative) -> Result<()> {
        self.tables
            .lock()
            .await
            .initiatives
            .insert(initiative.id.clone(), initiative.clone());
        Ok(())
    }

    async fn find_initiative(&self, id: &InitiativeId) -> Result<Option<Initiative>> {
        Ok(self.tables.lock().await.initiatives.get(id).cloned())
    }

    async fn list_initiatives(&self) -> Result<Vec<Initiative>> {
        let tables = self.tables.lock().await;
        let mut initiatives: Vec<Initiative> = tables.initiatives.values().cloned().collect();
        initiatives.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(initiatives)
    }

    async fn insert_workflow_steps(&self, initiative_id: &InitiativeId, steps: &[WorkflowStep]) -> Result<()> {
        let mut tables = self.tables.lock().await;

        if tables.steps_by_initiative.get(initiative_id).map_or(false, |ids| !ids.is_empty()) {
            return Err(OpexError::Conflict(format!(
                "Initiative {} already has workflow steps", initiative_id
            )));
        }

        let ids = steps.iter().map(|s| s.id.clone()).collect();
        for step in steps {
            tables.steps.insert(step.id.clone(), step.clone());
        }
        tables.steps_by_initiative.insert(initiative_id.clone(), ids);
        Ok(())
    }

    async fn apply_transition(&self, transition: &StepTransition) -> Result<()> {
        let mut tables = self.tables.lock().await;

        for write in &transition.steps {
            let stored = tables
                .steps
                .get(&write.step.id)
                .ok_or_else(|| OpexError::NotFound(format!("Workflow step {}", write.step.id)))?;
            if stored.status != write.expected {
                return Err(OpexError::Conflict(format!(
                    "Workflow step {} is {} but {} was expected", write.step.id, stored.status, write.expected
                )));
            }
        }

        for write in &transition.steps {
            tables.steps.insert(write.step.id.clone(), write.step.clone());
        }
        tables
            .initiatives
            .insert(transition.initiative.id.clone(), transition.initiative.clone());
        Ok(())
    }

    async fn find_step(&self, id: &StepId) -> Result<Option<WorkflowStep>> {
        Ok(self.tables.lock().await.steps.get(id).cloned())
    }

    async fn find_steps_by_initiative(&self, id: &InitiativeId) -> Result<Vec<WorkflowStep>> {
        let tables = self.tables.lock().await;

        let mut steps: Vec<WorkflowStep> = tables
            .steps_by_initiative
            .get(id)
            .map(|ids| ids.iter().filter_map(|sid| tables.steps.get(sid).cloned()).collect())
            .unwrap_or_default();
        steps.sort_by_key(|s| s.stage_order);
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StepWrite;

    #[tokio::test]
    async fn test_counter_starts_at_one() {
        let store = InMemoryStore::new();
        let key = CounterKey::overall("NDS", 2025);

        assert_eq!(store.load_counter(&key).await.unwrap(), 0);
        assert_eq!(store.increment_counter(&key).await.unwrap(), 1);
        assert_eq!(store.increment_counter(&key).await.unwrap(), 2);
        assert_eq!(store.load_counter(&key).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_second_step_insert_conflicts() {
        let store = InMemoryStore::new();
        let initiative_id = InitiativeId::new();
        let steps = vec![WorkflowStep::new(initiative_id.clone(), 1, "Register initiative", StepStatus::Pending)];

        store.insert_workflow_steps(&initiative_id, &steps).await.unwrap();
        let err = store.insert_workflow_steps(&initiative_id, &steps).await.unwrap_err();
        assert!(matches!(err, OpexError::Conflict(_)));
        assert_eq!(store.step_count().await, 1);
    }

    #[tokio::test]
    async fn test_transition_checks_every_expected_status() {
        let store = InMemoryStore::new();
        let initiative_id = InitiativeId::new();
        let first = WorkflowStep::new(initiative_id.clone(), 1, "Register initiative", StepStatus::Pending);
        let second = WorkflowStep::new(initiative_id.clone(), 2, "Approval", StepStatus::Waiting);
        store
            .insert_workflow_steps(&initiative_id, &[first.clone(), second.clone()])
            .await
            .unwrap();

        let mut approved = first.clone();
        approved.status = StepStatus::Approved;
        let mut activated = second.clone();
        activated.status = StepStatus::Pending;
        let mut initiative = test_initiative(&initiative_id);

        // Second write expects the wrong status: nothing may change
        let bad = StepTransition {
            steps: vec![
                StepWrite { step: approved.clone(), expected: StepStatus::Pending },
                StepWrite { step: activated.clone(), expected: StepStatus::Pending },
            ],
            initiative: initiative.clone(),
        };
        let err = store.apply_transition(&bad).await.unwrap_err();
        assert!(matches!(err, OpexError::Conflict(_)));
        let steps = store.find_steps_by_initiative(&initiative_id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Pending);
        assert!(store.find_initiative(&initiative_id).await.unwrap().is_none());

        initiative.status = opex_types::InitiativeStatus::InProgress;
        let good = StepTransition {
            steps: vec![
                StepWrite { step: approved, expected: StepStatus::Pending },
                StepWrite { step: activated, expected: StepStatus::Waiting },
            ],
            initiative,
        };
        store.apply_transition(&good).await.unwrap();
        let steps = store.find_steps_by_initiative(&initiative_id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Approved);
        assert_eq!(steps[1].status, StepStatus::Pending);

        // Replaying the same transition now conflicts
        assert!(matches!(store.apply_transition(&good).await, Err(OpexError::Conflict(_))));
    }

    fn test_initiative(id: &InitiativeId) -> Initiative {
        let now = chrono::Utc::now();
        Initiative {
            id: id.clone(),
            identifier: "NDS/25/OP/01/001".to_string(),
            title: "Steam trap survey".to_string(),
            description: String::new(),
            site: opex_types::Site::new("NDS", "NDS Plant", "Manufacturing"),
            discipline: opex_types::Discipline::new("OP", "Operations", ""),
            proposal_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            status: opex_types::InitiativeStatus::Proposed,
            estimated_savings: 1_000.0,
            actual_savings: None,
            initiator: None,
            created_at: now,
            updated_at: now,
        }
    }
}
