//! Initiative creation and lookup

use chrono::{Datelike, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::catalog::StageCatalog;
use super::engine::WorkflowEngine;
use crate::config::OpexConfig;
use crate::error::{OpexError, Result};
use crate::identifier::{format_identifier, is_valid_code, parse_identifier, SequenceAllocator};
use crate::roles::RoleResolver;
use crate::store::{bounded, DurableStore};
use opex_types::{Initiative, InitiativeDraft, InitiativeId, InitiativeStatus, WorkflowStep};

/// Orchestrates identifier assignment, persistence and workflow bootstrap
pub struct InitiativeLifecycleManager {
    store: Arc<dyn DurableStore>,
    allocator: Arc<SequenceAllocator>,
    engine: Arc<WorkflowEngine>,
    timeout: Duration,
}

impl InitiativeLifecycleManager {
    pub fn new(
        store: Arc<dyn DurableStore>,
        allocator: Arc<SequenceAllocator>,
        engine: Arc<WorkflowEngine>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            allocator,
            engine,
            timeout,
        }
    }

    /// Wire allocator, catalog and engine from configuration
    pub fn from_config(
        config: &OpexConfig,
        store: Arc<dyn DurableStore>,
        roles: Arc<dyn RoleResolver>,
    ) -> Result<Self> {
        let catalog = match &config.catalog.path {
            Some(path) => StageCatalog::from_file(path)?,
            None => StageCatalog::standard(),
        };
        log::info!("Loaded stage catalog with {} stages", catalog.len());

        let timeout = config.engine.store_timeout();
        let allocator = Arc::new(SequenceAllocator::new(store.clone(), timeout));
        let engine = Arc::new(WorkflowEngine::new(Arc::new(catalog), store.clone(), roles, timeout));

        Ok(Self::new(store, allocator, engine, timeout))
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn allocator(&self) -> &Arc<SequenceAllocator> {
        &self.allocator
    }

    /// Create an initiative with a fresh identifier and its workflow steps.
    ///
    /// Counters are scoped by the calendar year of the proposal date. Numbers
    /// drawn for a creation that fails later are not reused. If the steps
    /// cannot be created the initiative stays stored without them; call
    /// [`retry_bootstrap`](Self::retry_bootstrap) or
    /// [`resume_incomplete_bootstraps`](Self::resume_incomplete_bootstraps).
    pub async fn create_initiative(&self, draft: InitiativeDraft) -> Result<Initiative> {
        let site = draft
            .site
            .ok_or_else(|| OpexError::InvalidInput("Initiative site is required".to_string()))?;
        let discipline = draft
            .discipline
            .ok_or_else(|| OpexError::InvalidInput("Initiative discipline is required".to_string()))?;

        if !is_valid_code(&site.code) {
            return Err(OpexError::InvalidInput(format!("Invalid site code '{}'", site.code)));
        }
        if !is_valid_code(&discipline.code) {
            return Err(OpexError::InvalidInput(format!("Invalid discipline code '{}'", discipline.code)));
        }
        if !draft.estimated_savings.is_finite() || draft.estimated_savings < 0.0 {
            return Err(OpexError::InvalidInput(format!(
                "Estimated savings must be non-negative, got {}", draft.estimated_savings
            )));
        }

        let year = draft.proposal_date.year();
        let discipline_seq = self
            .allocator
            .next_discipline_sequence(&site.code, &discipline.code, year)
            .await?;
        let overall_seq = self.allocator.next_overall_sequence(&site.code, year).await?;
        let identifier = format_identifier(&site.code, year, &discipline.code, discipline_seq, overall_seq);

        let now = Utc::now();
        let initiative = Initiative {
            id: InitiativeId::new(),
            identifier,
            title: draft.title,
            description: draft.description,
            site,
            discipline,
            proposal_date: draft.proposal_date,
            status: InitiativeStatus::Proposed,
            estimated_savings: draft.estimated_savings,
            actual_savings: None,
            initiator: draft.initiator,
            created_at: now,
            updated_at: now,
        };

        bounded(self.timeout, "initiative save", self.store.save_initiative(&initiative)).await?;
        log::info!("Created initiative {} ({})", initiative.identifier, initiative.id);

        if let Err(e) = self.engine.bootstrap(&initiative).await {
            log::warn!(
                "Initiative {} ({}) stored without workflow steps: {}",
                initiative.identifier,
                initiative.id,
                e
            );
            return Err(e);
        }

        Ok(initiative)
    }

    /// Create the steps of an initiative whose bootstrap failed earlier
    pub async fn retry_bootstrap(&self, id: &InitiativeId) -> Result<Vec<WorkflowStep>> {
        let initiative = self.get_initiative(id).await?;
        self.engine.bootstrap(&initiative).await
    }

    /// Bootstrap every stored initiative that has no steps yet
    pub async fn resume_incomplete_bootstraps(&self) -> Result<usize> {
        let mut resumed = 0;
        for initiative in self.list_initiatives().await? {
            if self.engine.list_steps(&initiative.id).await?.is_empty() {
                self.engine.bootstrap(&initiative).await?;
                log::info!("Resumed bootstrap of {}", initiative.identifier);
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    pub async fn get_initiative(&self, id: &InitiativeId) -> Result<Initiative> {
        bounded(self.timeout, "initiative lookup", self.store.find_initiative(id))
            .await?
            .ok_or_else(|| OpexError::NotFound(format!("Initiative {}", id)))
    }

    /// Look up by the formatted identifier, e.g. `NDS/25/OP/03/012`
    pub async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Initiative>> {
        let parts = parse_identifier(identifier)?;
        log::debug!("Looking up initiative {:?}", parts);

        Ok(self
            .list_initiatives()
            .await?
            .into_iter()
            .find(|i| i.identifier == identifier.trim()))
    }

    pub async fn list_initiatives(&self) -> Result<Vec<Initiative>> {
        bounded(self.timeout, "initiative listing", self.store.list_initiatives()).await
    }

    pub async fn list_by_status(&self, status: InitiativeStatus) -> Result<Vec<Initiative>> {
        Ok(self
            .list_initiatives()
            .await?
            .into_iter()
            .filter(|i| i.status == status)
            .collect())
    }

    pub async fn list_by_site(&self, site_code: &str) -> Result<Vec<Initiative>> {
        Ok(self
            .list_initiatives()
            .await?
            .into_iter()
            .filter(|i| i.site.code == site_code)
            .collect())
    }

    /// Steps of an existing initiative in stage order
    pub async fn list_steps(&self, id: &InitiativeId) -> Result<Vec<WorkflowStep>> {
        self.get_initiative(id).await?;
        self.engine.list_steps(id).await
    }
}
