//! Stage-gated workflow state machine
//!
//! Every initiative owns one step per catalog stage. A step moves
//! `WAITING -> PENDING -> APPROVED | REJECTED` and at most one step of an
//! initiative is `PENDING` at any time. Approving a step walks forward to the
//! next eligible stage, approving-by-skip any stage whose sub-process was
//! decided not to apply. Rejecting a step ends the initiative.
//!
//! Transitions of one initiative are serialized by a per-initiative lock;
//! transitions of different initiatives run in parallel. All records a
//! transition changes are committed in one store call, compare-and-swap
//! against the statuses read under the lock: a failed commit changes nothing,
//! and a writer in another process that got there first surfaces as
//! `Conflict`.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::catalog::{Stage, StageCatalog, StageGate};
use crate::constants::SKIPPED_COMMENT;
use crate::error::{OpexError, Result};
use crate::roles::RoleResolver;
use crate::store::{bounded, DurableStore, StepTransition, StepWrite};
use crate::sync::KeyedLocks;
use opex_types::{
    ApproverRef, ConditionFlags, Initiative, InitiativeId, InitiativeStatus, StepId, StepStatus, SubProcess,
    WorkflowStep,
};

/// Everything an approver supplies with an approval
#[derive(Debug, Clone, Default)]
pub struct ApprovalRequest {
    pub comments: Option<String>,
    pub signature: Option<String>,
    pub conditions: ConditionFlags,
    /// Only accepted on the approval that closes the initiative
    pub actual_savings: Option<f64>,
}

impl ApprovalRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_conditions(mut self, conditions: ConditionFlags) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_actual_savings(mut self, savings: f64) -> Self {
        self.actual_savings = Some(savings);
        self
    }
}

/// Result of a successful approval
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    /// The approved step
    pub step: WorkflowStep,
    /// Stages approved-by-skip on the way to the next eligible one
    pub skipped: Vec<WorkflowStep>,
    /// The step that became `PENDING`, `None` if the workflow finished
    pub activated: Option<WorkflowStep>,
    pub initiative: Initiative,
}

/// Where the forward walk from an approved step ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvancePlan {
    /// Indices (into the ordered step list) to approve-by-skip
    pub skip: Vec<usize>,
    /// Index of the step to activate, `None` when the walk ran off the end
    pub activate: Option<usize>,
}

/// Plan the walk after `steps[approved]` is approved.
///
/// `decisions` holds every sub-process decision known at that point,
/// including one made by the approval itself. A conditional stage whose
/// decision is missing is treated as applicable.
pub fn plan_advance(
    catalog: &StageCatalog,
    steps: &[WorkflowStep],
    approved: usize,
    decisions: &HashMap<SubProcess, bool>,
) -> Result<AdvancePlan> {
    let mut skip = Vec::new();

    for idx in (approved + 1)..steps.len() {
        let next = &steps[idx];
        if next.status != StepStatus::Waiting {
            return Err(OpexError::Conflict(format!(
                "Step {} (stage {}) is {} but should still be WAITING",
                next.id, next.stage_order, next.status
            )));
        }

        match catalog.stage_at(next.stage_order)?.gate {
            StageGate::ConditionalOn(sp) if decisions.get(&sp) == Some(&false) => skip.push(idx),
            _ => return Ok(AdvancePlan { skip, activate: Some(idx) }),
        }
    }

    Ok(AdvancePlan { skip, activate: None })
}

/// Check the step-set invariants of one initiative.
///
/// Ordered by stage; a live initiative has exactly one `PENDING` step with
/// only `APPROVED` steps before it and only `WAITING` steps after it. A
/// closed one has every step `APPROVED`; a rejected one has exactly one
/// `REJECTED` step in place of the pending one.
pub fn verify_step_invariants(steps: &[WorkflowStep], status: InitiativeStatus) -> std::result::Result<(), String> {
    let boundary_status = match status {
        InitiativeStatus::Closed => None,
        InitiativeStatus::Rejected => Some(StepStatus::Rejected),
        _ => Some(StepStatus::Pending),
    };

    let boundary = steps.iter().position(|s| !matches!(s.status, StepStatus::Approved));

    match (boundary_status, boundary) {
        (None, None) => Ok(()),
        (None, Some(idx)) => Err(format!(
            "closed initiative has step {} in {}", steps[idx].stage_order, steps[idx].status
        )),
        (Some(expected), None) => Err(format!("no {} step although initiative is {}", expected, status)),
        (Some(expected), Some(idx)) => {
            if steps[idx].status != expected {
                return Err(format!(
                    "step {} is {} where {} was expected", steps[idx].stage_order, steps[idx].status, expected
                ));
            }
            match steps[idx + 1..].iter().find(|s| s.status != StepStatus::Waiting) {
                Some(s) => Err(format!("step {} is {} after the active step", s.stage_order, s.status)),
                None => Ok(()),
            }
        }
    }
}

/// State loaded and checked under the initiative lock
struct OpenStep {
    steps: Vec<WorkflowStep>,
    index: usize,
    initiative: Initiative,
    stage: Stage,
}

pub struct WorkflowEngine {
    catalog: Arc<StageCatalog>,
    store: Arc<dyn DurableStore>,
    roles: Arc<dyn RoleResolver>,
    locks: KeyedLocks<InitiativeId>,
    timeout: Duration,
}

impl WorkflowEngine {
    pub fn new(
        catalog: Arc<StageCatalog>,
        store: Arc<dyn DurableStore>,
        roles: Arc<dyn RoleResolver>,
        timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            store,
            roles,
            locks: KeyedLocks::new(),
            timeout,
        }
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// Create the step set of a new initiative.
    ///
    /// A no-op returning the existing steps when the initiative already has
    /// them, so a failed creation can simply be retried.
    pub async fn bootstrap(&self, initiative: &Initiative) -> Result<Vec<WorkflowStep>> {
        let _guard = self.locks.acquire(&initiative.id).await;

        let existing = self.load_steps(&initiative.id).await?;
        if !existing.is_empty() && existing.len() != self.catalog.len() {
            return Err(OpexError::Storage(format!(
                "Initiative {} has {} of {} workflow steps",
                initiative.identifier,
                existing.len(),
                self.catalog.len()
            )));
        }
        if !existing.is_empty() {
            log::debug!(
                "Initiative {} already has {} steps, skipping bootstrap",
                initiative.identifier,
                existing.len()
            );
            return Ok(existing);
        }

        let first = self.catalog.first().order;
        let steps: Vec<WorkflowStep> = self
            .catalog
            .stages()
            .iter()
            .map(|stage| {
                let status = if stage.order == first { StepStatus::Pending } else { StepStatus::Waiting };
                WorkflowStep::new(initiative.id.clone(), stage.order, stage.name.clone(), status)
            })
            .collect();

        bounded(
            self.timeout,
            "workflow step insert",
            self.store.insert_workflow_steps(&initiative.id, &steps),
        )
        .await?;

        log::info!("Bootstrapped {} workflow steps for {}", steps.len(), initiative.identifier);
        Ok(steps)
    }

    /// Steps of an initiative in stage order
    pub async fn list_steps(&self, initiative_id: &InitiativeId) -> Result<Vec<WorkflowStep>> {
        self.load_steps(initiative_id).await
    }

    /// The step currently awaiting action, if any
    pub async fn pending_step(&self, initiative_id: &InitiativeId) -> Result<Option<WorkflowStep>> {
        Ok(self
            .load_steps(initiative_id)
            .await?
            .into_iter()
            .find(|s| s.status == StepStatus::Pending))
    }

    /// Approve a pending step and activate the next eligible one
    pub async fn approve(
        &self,
        step_id: &StepId,
        approver: &ApproverRef,
        request: ApprovalRequest,
    ) -> Result<ApprovalOutcome> {
        let initiative_id = self.owning_initiative(step_id).await?;
        let _guard = self.locks.acquire(&initiative_id).await;

        let OpenStep { steps, index, mut initiative, stage } =
            self.open_transition(&initiative_id, step_id, approver).await?;

        let mut decisions = recorded_decisions(&self.catalog, &steps)?;
        if let StageGate::Decides(sp) = stage.gate {
            let applies = request.conditions.required(sp).ok_or_else(|| {
                OpexError::InvalidInput(format!(
                    "Stage '{}' requires a decision whether {} is required", stage.name, sp
                ))
            })?;
            decisions.insert(sp, applies);
        }

        let plan = plan_advance(&self.catalog, &steps, index, &decisions)?;

        if let Some(savings) = request.actual_savings {
            if plan.activate.is_some() {
                return Err(OpexError::InvalidInput(
                    "Actual savings can only be recorded on the approval that closes the initiative".to_string(),
                ));
            }
            if !savings.is_finite() || savings < 0.0 {
                return Err(OpexError::InvalidInput(format!("Actual savings must be non-negative, got {}", savings)));
            }
        }

        // All checks passed; everything below is committed as one transition
        let now = Utc::now();
        let mut step = steps[index].clone();
        step.status = StepStatus::Approved;
        step.approver = Some(approver.clone());
        step.approval_timestamp = Some(now);
        step.comments = request.comments.clone();
        step.signature = request.signature.clone();
        step.updated_at = now;
        match stage.gate {
            StageGate::Decides(sp) => {
                step.set_required(sp, decisions[&sp]);
                if let Some(reference) = request.conditions.reference(sp) {
                    step.set_reference(sp, reference.to_string());
                }
            }
            StageGate::ConditionalOn(sp) => {
                if let Some(reference) = request.conditions.reference(sp) {
                    step.set_reference(sp, reference.to_string());
                }
            }
            StageGate::Unconditional => {}
        }

        let mut skipped = Vec::with_capacity(plan.skip.len());
        for idx in &plan.skip {
            let mut skip = steps[*idx].clone();
            skip.status = StepStatus::Approved;
            skip.skipped = true;
            skip.comments = Some(SKIPPED_COMMENT.to_string());
            if let StageGate::ConditionalOn(sp) = self.catalog.stage_at(skip.stage_order)?.gate {
                skip.set_required(sp, false);
            }
            skip.updated_at = now;
            skipped.push(skip);
        }

        let activated = match plan.activate {
            Some(idx) => {
                let mut next = steps[idx].clone();
                next.status = StepStatus::Pending;
                if let StageGate::ConditionalOn(sp) = self.catalog.stage_at(next.stage_order)?.gate {
                    next.set_required(sp, true);
                }
                next.updated_at = now;
                Some(next)
            }
            None => None,
        };

        match &activated {
            Some(_) if initiative.status == InitiativeStatus::Proposed => {
                initiative.status = InitiativeStatus::InProgress;
            }
            Some(_) => {}
            None => {
                initiative.status = InitiativeStatus::Closed;
                initiative.actual_savings = request.actual_savings;
            }
        }
        initiative.updated_at = now;

        let mut writes = vec![StepWrite { step: step.clone(), expected: StepStatus::Pending }];
        writes.extend(skipped.iter().map(|s| StepWrite { step: s.clone(), expected: StepStatus::Waiting }));
        if let Some(next) = &activated {
            writes.push(StepWrite { step: next.clone(), expected: StepStatus::Waiting });
        }
        self.commit(writes, &initiative).await?;

        for skip in &skipped {
            log::info!(
                "Skipped stage {} ('{}') of {}: condition not applicable",
                skip.stage_order,
                skip.stage_name,
                initiative.identifier
            );
        }
        match &activated {
            Some(next) => log::info!(
                "{} approved stage {} ('{}'); stage {} ('{}') is now pending",
                approver,
                step.stage_order,
                step.stage_name,
                next.stage_order,
                next.stage_name
            ),
            None => log::info!("Initiative {} closed by {}", initiative.identifier, approver),
        }

        Ok(ApprovalOutcome {
            step,
            skipped,
            activated,
            initiative,
        })
    }

    /// Reject a pending step, terminating the initiative
    pub async fn reject(
        &self,
        step_id: &StepId,
        approver: &ApproverRef,
        comments: Option<String>,
    ) -> Result<WorkflowStep> {
        let initiative_id = self.owning_initiative(step_id).await?;
        let _guard = self.locks.acquire(&initiative_id).await;

        let OpenStep { steps, index, mut initiative, .. } =
            self.open_transition(&initiative_id, step_id, approver).await?;

        let now = Utc::now();
        let mut step = steps[index].clone();
        step.status = StepStatus::Rejected;
        step.approver = Some(approver.clone());
        step.approval_timestamp = Some(now);
        step.comments = comments;
        step.updated_at = now;

        initiative.status = InitiativeStatus::Rejected;
        initiative.updated_at = now;
        self.commit(vec![StepWrite { step: step.clone(), expected: StepStatus::Pending }], &initiative)
            .await?;

        log::info!(
            "Initiative {} rejected at stage {} ('{}') by {}",
            initiative.identifier,
            step.stage_order,
            step.stage_name,
            approver
        );
        Ok(step)
    }

    async fn owning_initiative(&self, step_id: &StepId) -> Result<InitiativeId> {
        bounded(self.timeout, "workflow step lookup", self.store.find_step(step_id))
            .await?
            .map(|step| step.initiative_id)
            .ok_or_else(|| OpexError::NotFound(format!("Workflow step {}", step_id)))
    }

    /// Load and check everything a transition needs. Caller holds the lock.
    async fn open_transition(
        &self,
        initiative_id: &InitiativeId,
        step_id: &StepId,
        approver: &ApproverRef,
    ) -> Result<OpenStep> {
        let steps = self.load_steps(initiative_id).await?;
        let index = steps
            .iter()
            .position(|s| &s.id == step_id)
            .ok_or_else(|| OpexError::NotFound(format!("Workflow step {}", step_id)))?;

        let current = &steps[index];
        if current.status != StepStatus::Pending {
            return Err(OpexError::InvalidState(format!(
                "Step {} (stage {} '{}') is {}, only PENDING steps can be acted on",
                step_id, current.stage_order, current.stage_name, current.status
            )));
        }

        let initiative = bounded(self.timeout, "initiative lookup", self.store.find_initiative(initiative_id))
            .await?
            .ok_or_else(|| OpexError::NotFound(format!("Initiative {}", initiative_id)))?;

        if initiative.status.is_terminal() {
            return Err(OpexError::InvalidState(format!(
                "Initiative {} is {}", initiative.identifier, initiative.status
            )));
        }

        let stage = self.catalog.stage_at(current.stage_order)?.clone();
        self.authorize(approver, &stage, &initiative).await?;

        Ok(OpenStep {
            steps,
            index,
            initiative,
            stage,
        })
    }

    async fn authorize(&self, approver: &ApproverRef, stage: &Stage, initiative: &Initiative) -> Result<()> {
        let assignment = bounded(self.timeout, "role lookup", self.roles.role_of(approver)).await?;

        match assignment {
            Some(role) if role.authorizes(&stage.responsible_role, &initiative.site.code) => Ok(()),
            Some(role) => {
                log::warn!(
                    "{} holds {} ({:?}) but stage {} of {} needs {} at {}",
                    approver,
                    role.role_code,
                    role.scope,
                    stage.order,
                    initiative.identifier,
                    stage.responsible_role,
                    initiative.site.code
                );
                Err(OpexError::Unauthorized(format!(
                    "{} may not act on stage '{}' (requires role {} at site {})",
                    approver, stage.name, stage.responsible_role, initiative.site.code
                )))
            }
            None => {
                log::warn!("Unknown approver {} tried to act on {}", approver, initiative.identifier);
                Err(OpexError::Unauthorized(format!("{} has no role assignment", approver)))
            }
        }
    }

    async fn load_steps(&self, initiative_id: &InitiativeId) -> Result<Vec<WorkflowStep>> {
        bounded(
            self.timeout,
            "workflow step listing",
            self.store.find_steps_by_initiative(initiative_id),
        )
        .await
    }

    async fn commit(&self, steps: Vec<StepWrite>, initiative: &Initiative) -> Result<()> {
        let transition = StepTransition {
            steps,
            initiative: initiative.clone(),
        };
        bounded(self.timeout, "workflow transition", self.store.apply_transition(&transition)).await
    }
}

/// Sub-process decisions already recorded on approved decision steps
fn recorded_decisions(catalog: &StageCatalog, steps: &[WorkflowStep]) -> Result<HashMap<SubProcess, bool>> {
    let mut decisions = HashMap::new();
    for step in steps.iter().filter(|s| s.status == StepStatus::Approved) {
        if let StageGate::Decides(sp) = catalog.stage_at(step.stage_order)?.gate {
            if let Some(applies) = step.required(sp) {
                decisions.insert(sp, applies);
            }
        }
    }
    Ok(decisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::{RoleAssignment, StaticRoleResolver};
    use crate::store::InMemoryStore;
    use chrono::NaiveDate;
    use opex_types::{Discipline, Site};

    fn roles() -> StaticRoleResolver {
        StaticRoleResolver::new()
            .with("nds_stld", RoleAssignment::site("STLD", "NDS"))
            .with("nds_sh", RoleAssignment::site("SH", "NDS"))
            .with("nds_eh", RoleAssignment::site("EH", "NDS"))
            .with("nds_il", RoleAssignment::site("IL", "NDS"))
            .with("hsd1_sh", RoleAssignment::site("SH", "HSD1"))
            .with("corp_ctsd", RoleAssignment::corporate("CTSD"))
    }

    fn initiative() -> Initiative {
        let now = Utc::now();
        Initiative {
            id: InitiativeId::new(),
            identifier: "NDS/25/OP/01/001".to_string(),
            title: "Steam trap survey".to_string(),
            description: String::new(),
            site: Site::new("NDS", "NDS Plant", "Manufacturing"),
            discipline: Discipline::new("OP", "Operations", ""),
            proposal_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            status: InitiativeStatus::Proposed,
            estimated_savings: 250_000.0,
            actual_savings: None,
            initiator: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn setup() -> (WorkflowEngine, Arc<InMemoryStore>, Initiative) {
        let store = Arc::new(InMemoryStore::new());
        let engine = WorkflowEngine::new(
            Arc::new(StageCatalog::standard()),
            store.clone(),
            Arc::new(roles()),
            Duration::from_secs(5),
        );
        let initiative = initiative();
        store.save_initiative(&initiative).await.unwrap();
        (engine, store, initiative)
    }

    async fn pending(engine: &WorkflowEngine, initiative: &Initiative) -> WorkflowStep {
        engine.pending_step(&initiative.id).await.unwrap().expect("a pending step")
    }

    async fn approve_as(engine: &WorkflowEngine, initiative: &Initiative, who: &str, request: ApprovalRequest) -> ApprovalOutcome {
        let step = pending(engine, initiative).await;
        engine.approve(&step.id, &ApproverRef::new(who), request).await.unwrap()
    }

    /// Approve stages 1..=3 so that the MOC decision is pending
    async fn advance_to_moc_decision(engine: &WorkflowEngine, initiative: &Initiative) {
        approve_as(engine, initiative, "nds_stld", ApprovalRequest::new()).await;
        approve_as(engine, initiative, "nds_sh", ApprovalRequest::new()).await;
        approve_as(engine, initiative, "nds_eh", ApprovalRequest::new()).await;
    }

    #[tokio::test]
    async fn test_bootstrap_creates_one_pending_step() {
        let (engine, _store, initiative) = setup().await;

        let steps = engine.bootstrap(&initiative).await.unwrap();
        assert_eq!(steps.len(), 13);
        assert_eq!(steps[0].status, StepStatus::Pending);
        assert!(steps[1..].iter().all(|s| s.status == StepStatus::Waiting));
        verify_step_invariants(&steps, InitiativeStatus::Proposed).unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let (engine, store, initiative) = setup().await;

        let first = engine.bootstrap(&initiative).await.unwrap();
        let second = engine.bootstrap(&initiative).await.unwrap();

        assert_eq!(store.step_count().await, 13);
        let first_ids: Vec<_> = first.iter().map(|s| s.id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|s| s.id.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn test_approve_activates_next_stage() {
        let (engine, store, initiative) = setup().await;
        engine.bootstrap(&initiative).await.unwrap();

        let outcome = approve_as(&engine, &initiative, "nds_stld", ApprovalRequest::new().with_comments("Registered")).await;

        assert_eq!(outcome.step.status, StepStatus::Approved);
        assert_eq!(outcome.step.comments.as_deref(), Some("Registered"));
        assert!(outcome.step.approval_timestamp.is_some());
        assert_eq!(outcome.activated.as_ref().unwrap().stage_order, 2);
        assert_eq!(outcome.initiative.status, InitiativeStatus::InProgress);

        let steps = store.find_steps_by_initiative(&initiative.id).await.unwrap();
        verify_step_invariants(&steps, InitiativeStatus::InProgress).unwrap();
    }

    #[tokio::test]
    async fn test_double_approve_is_invalid_state() {
        let (engine, store, initiative) = setup().await;
        engine.bootstrap(&initiative).await.unwrap();
        let first = pending(&engine, &initiative).await;

        engine.approve(&first.id, &ApproverRef::new("nds_stld"), ApprovalRequest::new()).await.unwrap();
        let before = store.find_steps_by_initiative(&initiative.id).await.unwrap();

        let err = engine
            .approve(&first.id, &ApproverRef::new("nds_stld"), ApprovalRequest::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OpexError::InvalidState(_)));

        let after = store.find_steps_by_initiative(&initiative.id).await.unwrap();
        let statuses = |steps: &[WorkflowStep]| steps.iter().map(|s| s.status).collect::<Vec<_>>();
        assert_eq!(statuses(&before), statuses(&after));
    }

    #[tokio::test]
    async fn test_waiting_step_cannot_be_approved() {
        let (engine, _store, initiative) = setup().await;
        let steps = engine.bootstrap(&initiative).await.unwrap();

        let err = engine
            .approve(&steps[1].id, &ApproverRef::new("nds_sh"), ApprovalRequest::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OpexError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_unknown_step_is_not_found() {
        let (engine, _store, _initiative) = setup().await;
        let err = engine
            .approve(&StepId::new(), &ApproverRef::new("nds_stld"), ApprovalRequest::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OpexError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_wrong_role_is_unauthorized() {
        let (engine, _store, initiative) = setup().await;
        engine.bootstrap(&initiative).await.unwrap();
        let step = pending(&engine, &initiative).await;

        let err = engine.approve(&step.id, &ApproverRef::new("nds_sh"), ApprovalRequest::new()).await.unwrap_err();
        assert!(matches!(err, OpexError::Unauthorized(_)));

        let err = engine.approve(&step.id, &ApproverRef::new("nobody"), ApprovalRequest::new()).await.unwrap_err();
        assert!(matches!(err, OpexError::Unauthorized(_)));

        // Still pending and untouched
        let again = pending(&engine, &initiative).await;
        assert_eq!(again.id, step.id);
        assert!(again.approver.is_none());
    }

    #[tokio::test]
    async fn test_site_role_of_other_site_is_unauthorized() {
        let (engine, _store, initiative) = setup().await;
        engine.bootstrap(&initiative).await.unwrap();
        approve_as(&engine, &initiative, "nds_stld", ApprovalRequest::new()).await;

        let step = pending(&engine, &initiative).await;
        let err = engine.approve(&step.id, &ApproverRef::new("hsd1_sh"), ApprovalRequest::new()).await.unwrap_err();
        assert!(matches!(err, OpexError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_moc_not_required_skips_moc_stage() {
        let (engine, store, initiative) = setup().await;
        engine.bootstrap(&initiative).await.unwrap();
        advance_to_moc_decision(&engine, &initiative).await;

        let outcome = approve_as(
            &engine,
            &initiative,
            "nds_il",
            ApprovalRequest::new().with_conditions(ConditionFlags::default().with_moc(false)),
        )
        .await;

        assert_eq!(outcome.step.moc_required, Some(false));
        assert_eq!(outcome.skipped.len(), 1);
        let skipped = &outcome.skipped[0];
        assert_eq!(skipped.stage_order, 5);
        assert_eq!(skipped.status, StepStatus::Approved);
        assert!(skipped.skipped);
        assert_eq!(skipped.comments.as_deref(), Some(SKIPPED_COMMENT));
        assert!(skipped.approver.is_none());
        assert!(skipped.approval_timestamp.is_none());

        assert_eq!(outcome.activated.as_ref().unwrap().stage_order, 6);

        let steps = store.find_steps_by_initiative(&initiative.id).await.unwrap();
        verify_step_invariants(&steps, InitiativeStatus::InProgress).unwrap();
    }

    #[tokio::test]
    async fn test_moc_required_activates_moc_stage() {
        let (engine, _store, initiative) = setup().await;
        engine.bootstrap(&initiative).await.unwrap();
        advance_to_moc_decision(&engine, &initiative).await;

        let outcome = approve_as(
            &engine,
            &initiative,
            "nds_il",
            ApprovalRequest::new().with_conditions(ConditionFlags::default().with_moc(true)),
        )
        .await;
        assert!(outcome.skipped.is_empty());
        let moc = outcome.activated.unwrap();
        assert_eq!(moc.stage_order, 5);
        assert_eq!(moc.moc_required, Some(true));

        let conditions = ConditionFlags {
            moc_reference: Some("MOC-NDS-4711".to_string()),
            ..Default::default()
        };
        let done = approve_as(&engine, &initiative, "nds_il", ApprovalRequest::new().with_conditions(conditions)).await;
        assert_eq!(done.step.moc_reference.as_deref(), Some("MOC-NDS-4711"));
        assert_eq!(done.activated.unwrap().stage_order, 6);
    }

    #[tokio::test]
    async fn test_decision_stage_requires_flag() {
        let (engine, _store, initiative) = setup().await;
        engine.bootstrap(&initiative).await.unwrap();
        advance_to_moc_decision(&engine, &initiative).await;

        let step = pending(&engine, &initiative).await;
        let err = engine.approve(&step.id, &ApproverRef::new("nds_il"), ApprovalRequest::new()).await.unwrap_err();
        assert!(matches!(err, OpexError::InvalidInput(_)));
        assert_eq!(pending(&engine, &initiative).await.id, step.id);
    }

    #[tokio::test]
    async fn test_reject_terminates_initiative() {
        let (engine, store, initiative) = setup().await;
        engine.bootstrap(&initiative).await.unwrap();
        approve_as(&engine, &initiative, "nds_stld", ApprovalRequest::new()).await;

        let step = pending(&engine, &initiative).await;
        let rejected = engine
            .reject(&step.id, &ApproverRef::new("nds_sh"), Some("Payback too long".to_string()))
            .await
            .unwrap();
        assert_eq!(rejected.status, StepStatus::Rejected);
        assert_eq!(rejected.approver, Some(ApproverRef::new("nds_sh")));
        assert!(rejected.approval_timestamp.is_some());

        let stored = store.find_initiative(&initiative.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InitiativeStatus::Rejected);
        assert!(engine.pending_step(&initiative.id).await.unwrap().is_none());

        let steps = store.find_steps_by_initiative(&initiative.id).await.unwrap();
        verify_step_invariants(&steps, InitiativeStatus::Rejected).unwrap();
        assert!(steps[2..].iter().all(|s| s.status == StepStatus::Waiting));

        let err = engine.reject(&step.id, &ApproverRef::new("nds_sh"), None).await.unwrap_err();
        assert!(matches!(err, OpexError::InvalidState(_)));
    }

    #[test]
    fn test_plan_skips_only_declined_sub_process() {
        let catalog = StageCatalog::standard();
        let id = InitiativeId::new();
        let steps: Vec<WorkflowStep> = catalog
            .stages()
            .iter()
            .map(|s| WorkflowStep::new(id.clone(), s.order, s.name.clone(), StepStatus::Waiting))
            .collect();

        // Approving stage 4 (index 3) with MOC declined
        let decisions = HashMap::from([(SubProcess::Moc, false)]);
        let plan = plan_advance(&catalog, &steps, 3, &decisions).unwrap();
        assert_eq!(plan, AdvancePlan { skip: vec![4], activate: Some(5) });

        // Approving stage 6 (index 5) with CAPEX declined
        let decisions = HashMap::from([(SubProcess::Capex, false)]);
        let plan = plan_advance(&catalog, &steps, 5, &decisions).unwrap();
        assert_eq!(plan, AdvancePlan { skip: vec![6], activate: Some(7) });

        // Last stage runs off the end
        let plan = plan_advance(&catalog, &steps, 12, &HashMap::new()).unwrap();
        assert_eq!(plan, AdvancePlan { skip: vec![], activate: None });
    }
}
