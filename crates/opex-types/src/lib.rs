//! Shared types for the initiative lifecycle engine

use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use uuid::Uuid;

/// Strongly typed InitiativeId (surrogate key, never shown to users)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InitiativeId(String);

impl InitiativeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Result<Self, String> {
        Uuid::parse_str(s)
            .map(|_| Self(s.to_string()))
            .map_err(|e| format!("Invalid InitiativeId format: {}", e))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InitiativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strongly typed StepId
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(String);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Result<Self, String> {
        Uuid::parse_str(s)
            .map(|_| Self(s.to_string()))
            .map_err(|e| format!("Invalid StepId format: {}", e))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the user acting on a step (login or e-mail)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApproverRef(String);

impl ApproverRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApproverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Manufacturing site (master data, read-only here)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
}

impl Site {
    pub fn new(code: impl Into<String>, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            category: category.into(),
        }
    }
}

/// Engineering discipline (master data, read-only here)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discipline {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Discipline {
    pub fn new(code: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Initiative lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitiativeStatus {
    Proposed,
    InProgress,
    Approved,
    Rejected,
    #[serde(alias = "COMPLETED")]
    Closed,
}

impl InitiativeStatus {
    /// No further step transitions happen once an initiative is here
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Closed)
    }
}

impl fmt::Display for InitiativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Proposed => "PROPOSED",
            Self::InProgress => "IN_PROGRESS",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Closed => "CLOSED",
        };
        write!(f, "{}", s)
    }
}

/// Per-step workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Waiting,
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "WAITING",
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

/// Conditional sub-processes a stage can depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubProcess {
    /// Management of Change (regulatory change control)
    Moc,
    /// Capital expenditure approval
    Capex,
}

impl fmt::Display for SubProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Moc => write!(f, "MOC"),
            Self::Capex => write!(f, "CAPEX"),
        }
    }
}

/// Caller-supplied decisions and references recorded at approval time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionFlags {
    #[serde(default)]
    pub moc_required: Option<bool>,
    #[serde(default)]
    pub moc_reference: Option<String>,
    #[serde(default)]
    pub capex_required: Option<bool>,
    #[serde(default)]
    pub capex_reference: Option<String>,
}

impl ConditionFlags {
    pub fn required(&self, sub_process: SubProcess) -> Option<bool> {
        match sub_process {
            SubProcess::Moc => self.moc_required,
            SubProcess::Capex => self.capex_required,
        }
    }

    pub fn reference(&self, sub_process: SubProcess) -> Option<&str> {
        match sub_process {
            SubProcess::Moc => self.moc_reference.as_deref(),
            SubProcess::Capex => self.capex_reference.as_deref(),
        }
    }

    pub fn with_moc(mut self, required: bool) -> Self {
        self.moc_required = Some(required);
        self
    }

    pub fn with_capex(mut self, required: bool) -> Self {
        self.capex_required = Some(required);
        self
    }
}

/// Caller input for creating an initiative
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiativeDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub site: Option<Site>,
    pub discipline: Option<Discipline>,
    pub proposal_date: NaiveDate,
    #[serde(default)]
    pub estimated_savings: f64,
    #[serde(default)]
    pub initiator: Option<ApproverRef>,
}

/// Cost-saving initiative (aggregate root)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Initiative {
    pub id: InitiativeId,
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub site: Site,
    pub discipline: Discipline,
    pub proposal_date: NaiveDate,
    pub status: InitiativeStatus,
    pub estimated_savings: f64,
    pub actual_savings: Option<f64>,
    pub initiator: Option<ApproverRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One (initiative, stage) approval step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepId,
    pub initiative_id: InitiativeId,
    pub stage_order: u32,
    pub stage_name: String,
    pub status: StepStatus,
    pub approver: Option<ApproverRef>,
    pub approval_timestamp: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    pub signature: Option<String>,
    pub moc_required: Option<bool>,
    pub moc_reference: Option<String>,
    pub capex_required: Option<bool>,
    pub capex_reference: Option<String>,
    #[serde(default)]
    pub skipped: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowStep {
    /// Create a fresh step in the given starting status
    pub fn new(
        initiative_id: InitiativeId,
        stage_order: u32,
        stage_name: impl Into<String>,
        status: StepStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: StepId::new(),
            initiative_id,
            stage_order,
            stage_name: stage_name.into(),
            status,
            approver: None,
            approval_timestamp: None,
            comments: None,
            signature: None,
            moc_required: None,
            moc_reference: None,
            capex_required: None,
            capex_reference: None,
            skipped: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_decided(&self) -> bool {
        matches!(self.status, StepStatus::Approved | StepStatus::Rejected)
    }

    pub fn required(&self, sub_process: SubProcess) -> Option<bool> {
        match sub_process {
            SubProcess::Moc => self.moc_required,
            SubProcess::Capex => self.capex_required,
        }
    }

    pub fn set_required(&mut self, sub_process: SubProcess, required: bool) {
        match sub_process {
            SubProcess::Moc => self.moc_required = Some(required),
            SubProcess::Capex => self.capex_required = Some(required),
        }
    }

    pub fn set_reference(&mut self, sub_process: SubProcess, reference: String) {
        match sub_process {
            SubProcess::Moc => self.moc_reference = Some(reference),
            SubProcess::Capex => self.capex_reference = Some(reference),
        }
    }
}
