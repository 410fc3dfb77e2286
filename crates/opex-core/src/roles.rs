//! Approver role resolution

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::RoleBinding;
use crate::error::Result;
use opex_types::ApproverRef;

/// Where a role assignment applies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "site_code", rename_all = "snake_case")]
pub enum RoleScope {
    /// Only initiatives at this site
    Site(String),
    /// Initiatives at every site
    Corporate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role_code: String,
    pub scope: RoleScope,
}

impl RoleAssignment {
    pub fn site(role_code: impl Into<String>, site_code: impl Into<String>) -> Self {
        Self {
            role_code: role_code.into(),
            scope: RoleScope::Site(site_code.into()),
        }
    }

    pub fn corporate(role_code: impl Into<String>) -> Self {
        Self {
            role_code: role_code.into(),
            scope: RoleScope::Corporate,
        }
    }

    /// Whether this assignment may act on a stage owned by `role_code` at `site_code`
    pub fn authorizes(&self, role_code: &str, site_code: &str) -> bool {
        if self.role_code != role_code {
            return false;
        }
        match &self.scope {
            RoleScope::Corporate => true,
            RoleScope::Site(site) => site == site_code,
        }
    }
}

/// Maps an approver to the role they hold
#[async_trait]
pub trait RoleResolver: Send + Sync {
    /// `None` when the approver is unknown
    async fn role_of(&self, approver: &ApproverRef) -> Result<Option<RoleAssignment>>;
}

/// Resolver over a fixed table, usually built from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticRoleResolver {
    assignments: HashMap<ApproverRef, RoleAssignment>,
}

impl StaticRoleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bindings(bindings: &[RoleBinding]) -> Self {
        let mut resolver = Self::new();
        for binding in bindings {
            let assignment = match &binding.site {
                Some(site) => RoleAssignment::site(binding.role_code.clone(), site.clone()),
                None => RoleAssignment::corporate(binding.role_code.clone()),
            };
            resolver.assign(binding.approver.clone(), assignment);
        }
        resolver
    }

    pub fn assign(&mut self, approver: ApproverRef, assignment: RoleAssignment) {
        self.assignments.insert(approver, assignment);
    }

    pub fn with(mut self, approver: &str, assignment: RoleAssignment) -> Self {
        self.assign(ApproverRef::new(approver), assignment);
        self
    }
}

#[async_trait]
impl RoleResolver for StaticRoleResolver {
    async fn role_of(&self, approver: &ApproverRef) -> Result<Option<RoleAssignment>> {
        Ok(self.assignments.get(approver).cloned())
    }
}
