//! Configuration management for the initiative lifecycle engine

use serde::{Deserialize, Serialize};
use crate::constants::{DEFAULT_DATA_DIR, DEFAULT_STORE_TIMEOUT_MS};
use crate::error::{OpexError, Result};
use crate::identifier::is_valid_code;
use opex_types::{ApproverRef, Discipline, Site};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpexConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub sites: Vec<Site>,

    #[serde(default)]
    pub disciplines: Vec<Discipline>,

    #[serde(default)]
    pub roles: Vec<RoleBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(alias = "data_root", default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl EngineConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { store_timeout_ms: default_store_timeout_ms() }
    }
}

/// Where the stage list comes from; the built-in catalog when `path` is unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Assigns a role to an approver. No `site` means a corporate role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleBinding {
    pub approver: ApproverRef,
    pub role_code: String,
    #[serde(default)]
    pub site: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

impl OpexConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OpexError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_json_str(&content)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OpexError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn find_site(&self, code: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.code == code)
    }

    pub fn find_discipline(&self, code: &str) -> Option<&Discipline> {
        self.disciplines.iter().find(|d| d.code == code)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(OpexError::Config("Storage data_dir is required".to_string()));
        }

        if self.engine.store_timeout_ms == 0 {
            return Err(OpexError::Config("Engine store_timeout_ms must be greater than zero".to_string()));
        }

        let mut site_codes = HashSet::new();
        for site in &self.sites {
            if !is_valid_code(&site.code) {
                return Err(OpexError::Config(format!("Site code '{}' must be alphanumeric", site.code)));
            }
            if !site_codes.insert(site.code.as_str()) {
                return Err(OpexError::Config(format!("Duplicate site code '{}'", site.code)));
            }
        }

        let mut discipline_codes = HashSet::new();
        for discipline in &self.disciplines {
            if !is_valid_code(&discipline.code) {
                return Err(OpexError::Config(format!(
                    "Discipline code '{}' must be alphanumeric", discipline.code
                )));
            }
            if !discipline_codes.insert(discipline.code.as_str()) {
                return Err(OpexError::Config(format!("Duplicate discipline code '{}'", discipline.code)));
            }
        }

        for binding in &self.roles {
            if binding.role_code.is_empty() {
                return Err(OpexError::Config(format!(
                    "Role code is required for approver '{}'", binding.approver
                )));
            }
            if let Some(site) = &binding.site {
                if !site_codes.contains(site.as_str()) {
                    return Err(OpexError::Config(format!(
                        "Approver '{}' is bound to unknown site '{}'", binding.approver, site
                    )));
                }
            }
        }

        Ok(())
    }
}
