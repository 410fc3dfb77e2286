//! Durable store collaborator
//!
//! The engine never talks to a database directly. Everything it persists goes
//! through [`DurableStore`], which an embedding application implements on top
//! of whatever storage it runs. Two implementations ship with the crate: an
//! in-memory one for tests and embedding, and a file-backed one used by the
//! command-line binary.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::{OpexError, Result};
use crate::identifier::CounterKey;
use opex_types::{Initiative, InitiativeId, StepId, StepStatus, WorkflowStep};
use std::future::Future;
use std::time::Duration;

/// A step write that only applies while the stored step still has `expected`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepWrite {
    pub step: WorkflowStep,
    pub expected: StepStatus,
}

/// Every record changed by one approval or rejection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTransition {
    pub steps: Vec<StepWrite>,
    pub initiative: Initiative,
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Last value issued for `key`, 0 if the key was never used
    async fn load_counter(&self, key: &CounterKey) -> Result<u64>;

    /// Atomically increment and durably commit the counter, returning the new value
    async fn increment_counter(&self, key: &CounterKey) -> Result<u64>;

    async fn save_initiative(&self, initiative: &Initiative) -> Result<()>;

    async fn find_initiative(&self, id: &InitiativeId) -> Result<Option<Initiative>>;

    async fn list_initiatives(&self) -> Result<Vec<Initiative>>;

    /// Insert the full step set of an initiative.
    ///
    /// Fails with `Conflict` if any step already exists for it.
    async fn insert_workflow_steps(&self, initiative_id: &InitiativeId, steps: &[WorkflowStep]) -> Result<()>;

    /// Commit all step writes and the initiative together, or none of them.
    ///
    /// Fails with `Conflict` if any stored step no longer has its expected
    /// status and with `NotFound` if a step does not exist. A failed call
    /// leaves every record as it was.
    async fn apply_transition(&self, transition: &StepTransition) -> Result<()>;

    async fn find_step(&self, id: &StepId) -> Result<Option<WorkflowStep>>;

    /// All steps of an initiative ordered by stage order
    async fn find_steps_by_initiative(&self, id: &InitiativeId) -> Result<Vec<WorkflowStep>>;
}

/// Run a store call under a deadline, reporting expiry as `Timeout`
pub async fn bounded<T, F>(timeout: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(OpexError::Timeout(format!(
            "{} did not complete within {} ms",
            what,
            timeout.as_millis()
        ))),
    }
}
