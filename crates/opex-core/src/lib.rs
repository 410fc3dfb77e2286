//! OpEx Initiative Lifecycle Engine
//!
//! Assigns every cost-saving initiative a collision-free structured
//! identifier and drives it through the fixed, stage-gated approval process,
//! including the conditional MOC and CAPEX sub-processes.

pub mod config;
pub mod constants;
pub mod error;
pub mod identifier;
pub mod paths;
pub mod roles;
pub mod store;
pub mod sync;
pub mod workflow;

// Re-export main types for easy access
pub use config::OpexConfig;
pub use error::{OpexError, Result};

pub use identifier::{format_identifier, parse_identifier, CounterKey, IdentifierParts, SequenceAllocator};
pub use roles::{RoleAssignment, RoleResolver, RoleScope, StaticRoleResolver};
pub use store::{DurableStore, FileStore, InMemoryStore, StepTransition, StepWrite};

pub use workflow::{
    ApprovalOutcome,
    ApprovalRequest,
    InitiativeLifecycleManager,
    Stage,
    StageCatalog,
    StageGate,
    WorkflowEngine,
};

pub use opex_types::*;
