//! Workflow management module

pub mod catalog;
pub mod engine;
pub mod lifecycle;

pub use catalog::{Stage, StageCatalog, StageGate};
pub use engine::{plan_advance, verify_step_invariants, AdvancePlan, ApprovalOutcome, ApprovalRequest, WorkflowEngine};
pub use lifecycle::InitiativeLifecycleManager;
