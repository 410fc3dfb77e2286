//! Ordered, immutable list of approval stages

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{OpexError, Result};
use opex_types::SubProcess;

/// How a stage participates in conditional branching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "sub_process", rename_all = "snake_case")]
pub enum StageGate {
    /// Always executed
    #[default]
    Unconditional,
    /// Approving this stage records whether the sub-process applies
    Decides(SubProcess),
    /// Executed only if the matching decision said the sub-process applies
    ConditionalOn(SubProcess),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub order: u32,
    pub name: String,
    pub responsible_role: String,
    #[serde(default)]
    pub gate: StageGate,
    #[serde(default)]
    pub required_attachment: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl Stage {
    pub fn new(order: u32, name: &str, responsible_role: &str, description: &str) -> Self {
        Self {
            order,
            name: name.to_string(),
            responsible_role: responsible_role.to_string(),
            gate: StageGate::Unconditional,
            required_attachment: None,
            description: description.to_string(),
        }
    }

    pub fn gated(mut self, gate: StageGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_attachment(mut self, tag: &str) -> Self {
        self.required_attachment = Some(tag.to_string());
        self
    }
}

/// Validated stage list; cannot be changed after construction
#[derive(Debug, Clone)]
pub struct StageCatalog {
    stages: Vec<Stage>,
}

impl StageCatalog {
    /// Validate and freeze a stage list. Input order does not matter.
    pub fn new(mut stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(OpexError::Config("Stage catalog is empty".to_string()));
        }

        stages.sort_by_key(|s| s.order);

        for (idx, stage) in stages.iter().enumerate() {
            let expected = idx as u32 + 1;
            if stage.order != expected {
                return Err(OpexError::Config(format!(
                    "Stage orders must be contiguous from 1: expected {} but found {} ('{}')",
                    expected, stage.order, stage.name
                )));
            }
            if stage.name.trim().is_empty() {
                return Err(OpexError::Config(format!("Stage {} has no name", stage.order)));
            }
            if stage.responsible_role.trim().is_empty() {
                return Err(OpexError::Config(format!(
                    "Stage {} ('{}') has no responsible role", stage.order, stage.name
                )));
            }
        }

        Self::validate_gates(&stages)?;

        Ok(Self { stages })
    }

    /// Every decision is immediately followed by its execution stage and
    /// every execution stage immediately follows its decision.
    fn validate_gates(stages: &[Stage]) -> Result<()> {
        let mut decided: Vec<SubProcess> = Vec::new();

        for (idx, stage) in stages.iter().enumerate() {
            match stage.gate {
                StageGate::Unconditional => {}
                StageGate::Decides(sp) => {
                    if decided.contains(&sp) {
                        return Err(OpexError::Config(format!(
                            "{} is decided by more than one stage (again at stage {})", sp, stage.order
                        )));
                    }
                    decided.push(sp);

                    let follows = stages.get(idx + 1).map(|next| next.gate);
                    if follows != Some(StageGate::ConditionalOn(sp)) {
                        return Err(OpexError::Config(format!(
                            "Decision stage {} ('{}') must be followed by a stage conditional on {}",
                            stage.order, stage.name, sp
                        )));
                    }
                }
                StageGate::ConditionalOn(sp) => {
                    let preceded = idx
                        .checked_sub(1)
                        .and_then(|prev| stages.get(prev))
                        .map(|prev| prev.gate);
                    if preceded != Some(StageGate::Decides(sp)) {
                        return Err(OpexError::Config(format!(
                            "Stage {} ('{}') is conditional on {} but does not follow its decision stage",
                            stage.order, stage.name, sp
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Load a JSON array of stage definitions
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            OpexError::Config(format!("Failed to read stage catalog {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let stages: Vec<Stage> = serde_json::from_str(json)
            .map_err(|e| OpexError::Config(format!("Failed to parse stage catalog: {}", e)))?;
        Self::new(stages)
    }

    /// The standard 13-stage cost-saving initiative process
    pub fn standard() -> Self {
        let stages = vec![
            Stage::new(1, "Register initiative", "STLD", "Initial registration of the initiative"),
            Stage::new(2, "Approval", "SH", "Site head approval of the initiative"),
            Stage::new(3, "Define Responsibilities", "EH", "Engineering head defines responsibilities and selects initiative lead")
                .with_attachment("Annexure 2"),
            Stage::new(4, "MOC required?", "IL", "Determine if Management of Change is required")
                .gated(StageGate::Decides(SubProcess::Moc)),
            Stage::new(5, "MOC", "IL", "Complete Management of Change process if required")
                .gated(StageGate::ConditionalOn(SubProcess::Moc)),
            Stage::new(6, "CAPEX required?", "IL", "Determine if Capital Expenditure approval is required")
                .gated(StageGate::Decides(SubProcess::Capex)),
            Stage::new(7, "CAPEX Process", "STLD", "Complete Capital Expenditure approval process if required")
                .gated(StageGate::ConditionalOn(SubProcess::Capex)),
            Stage::new(8, "Prepare Initiative Timeline Tracker", "IL", "Prepare detailed timeline for initiative implementation")
                .with_attachment("Annexure 3"),
            Stage::new(9, "Trial Implementation & Performance Check", "STLD", "Implement trial and check performance"),
            Stage::new(10, "Periodic Status Review with CMO", "CTSD", "Corporate review with Chief Manufacturing Officer"),
            Stage::new(11, "Savings Monitoring for 1 month", "STLD", "Monitor savings for one month period"),
            Stage::new(12, "Saving Validation with F&A", "STLD", "Validate savings with Finance and Accounts"),
            Stage::new(13, "Initiative Closure", "STLD", "Close the initiative after successful completion"),
        ];

        match Self::new(stages) {
            Ok(catalog) => catalog,
            Err(e) => unreachable!("built-in stage catalog is invalid: {}", e),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage_at(&self, order: u32) -> Result<&Stage> {
        order
            .checked_sub(1)
            .and_then(|idx| self.stages.get(idx as usize))
            .ok_or_else(|| OpexError::NotFound(format!("Stage {}", order)))
    }

    /// Stage that records the decision for `sub_process`, if any
    pub fn decision_stage(&self, sub_process: SubProcess) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|s| s.gate == StageGate::Decides(sub_process))
    }

    pub fn first(&self) -> &Stage {
        &self.stages[0]
    }

    pub fn last_order(&self) -> u32 {
        self.stages.len() as u32
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
