/// Directory layout of the file-backed store, relative to its root
use std::path::{Path, PathBuf};

use opex_types::{InitiativeId, StepId};

use crate::identifier::CounterKey;

pub const INITIATIVES_DIR_NAME: &str = "initiatives";
pub const STEPS_DIR_NAME: &str = "steps";
pub const COUNTERS_DIR_NAME: &str = "counters";
pub const JOURNAL_DIR_NAME: &str = "journal";

/// Held exclusively by every writer, shared by readers
pub const LOCK_FILE_NAME: &str = "store.lock";

/// Prefix of step directories being assembled before the rename into place
pub const STAGING_PREFIX: &str = ".staging_";

pub fn initiatives_dir(root: &Path) -> PathBuf {
    root.join(INITIATIVES_DIR_NAME)
}

pub fn steps_dir(root: &Path) -> PathBuf {
    root.join(STEPS_DIR_NAME)
}

pub fn counters_dir(root: &Path) -> PathBuf {
    root.join(COUNTERS_DIR_NAME)
}

pub fn journal_dir(root: &Path) -> PathBuf {
    root.join(JOURNAL_DIR_NAME)
}

pub fn lock_file(root: &Path) -> PathBuf {
    root.join(LOCK_FILE_NAME)
}

pub fn initiative_file(root: &Path, id: &InitiativeId) -> PathBuf {
    initiatives_dir(root).join(format!("initiative_{}.json", id))
}

/// Steps live in a directory per initiative so listing them is one read_dir
pub fn initiative_steps_dir(root: &Path, id: &InitiativeId) -> PathBuf {
    steps_dir(root).join(id.as_str())
}

pub fn step_file_name(step_id: &StepId) -> String {
    format!("step_{}.json", step_id)
}

pub fn step_file(root: &Path, initiative_id: &InitiativeId, step_id: &StepId) -> PathBuf {
    initiative_steps_dir(root, initiative_id).join(step_file_name(step_id))
}

/// Index from step id to owning initiative
pub fn step_index_file(root: &Path, step_id: &StepId) -> PathBuf {
    steps_dir(root).join(format!("index_{}.json", step_id))
}

/// Pending multi-record transition of one initiative
pub fn journal_file(root: &Path, initiative_id: &InitiativeId) -> PathBuf {
    journal_dir(root).join(format!("transition_{}.json", initiative_id))
}

pub fn counter_file(root: &Path, key: &CounterKey) -> PathBuf {
    counters_dir(root).join(format!("counter_{}.json", key.file_stem()))
}
