//! File-backed durable store
//!
//! One JSON document per record, each written to a uniquely named temp file
//! and renamed into place. Writers hold an exclusive `fd-lock` on the store's
//! lock file and readers a shared one, so processes sharing a data directory
//! are serialized against each other.
//!
//! A transition touching several documents is written as one journal record,
//! applied, and then the journal is removed. A journal left behind by a crash
//! is replayed before the next access.

use async_trait::async_trait;
use fd_lock::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::{DurableStore, StepTransition};
use crate::error::{OpexError, Result};
use crate::identifier::CounterKey;
use crate::paths;
use opex_types::{Initiative, InitiativeId, StepId, WorkflowStep};

#[derive(Debug, Serialize, Deserialize)]
struct CounterRecord {
    key: CounterKey,
    value: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StepIndexRecord {
    initiative_id: InitiativeId,
}

/// Store rooted at a data directory
pub struct FileStore {
    root_path: PathBuf,
}

impl FileStore {
    /// Open (and create if missing) a store at `root_path`.
    ///
    /// Replays unfinished transitions and removes half-built step directories
    /// left by a crashed writer.
    pub fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();

        for dir in &[
            paths::initiatives_dir(&root_path),
            paths::steps_dir(&root_path),
            paths::counters_dir(&root_path),
            paths::journal_dir(&root_path),
        ] {
            fs::create_dir_all(dir)?;
        }

        exclusive(&root_path, sweep_staging)?;

        Ok(Self { root_path })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Run blocking file work off the async workers
    async fn run<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let root = self.root_path.clone();
        tokio::task::spawn_blocking(move || work(&root))
            .await
            .map_err(|e| OpexError::Storage(format!("File store task failed: {}", e)))?
    }
}

fn open_lock(root: &Path) -> Result<RwLock<File>> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(paths::lock_file(root))?;
    Ok(RwLock::new(file))
}

/// Run `work` holding the exclusive store lock, after replaying journals
fn exclusive<T>(root: &Path, work: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
    let mut lock = open_lock(root)?;
    let _guard = lock.write()?;

    replay_journals(root)?;
    work(root)
}

/// Run `work` holding the shared store lock.
///
/// A journal seen under the shared lock belongs to a writer that died, so
/// the read is upgraded to an exclusive one that replays it first.
fn shared<T>(root: &Path, work: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
    let lock = open_lock(root)?;
    let guard = lock.read()?;
    if !has_journals(root)? {
        return work(root);
    }
    drop(guard);

    exclusive(root, work)
}

/// Write a document so readers see either the old or the new version
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| OpexError::Storage(format!("{} has no parent directory", path.display())))?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path)?;
    serde_json::from_str(&json)
        .map_err(|e| OpexError::Storage(format!("Failed to deserialize {}: {}", path.display(), e)))
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

fn is_record(path: &Path, prefix: &str) -> bool {
    path.is_file()
        && path.extension().and_then(|s| s.to_str()) == Some("json")
        && path
            .file_name()
            .and_then(|s| s.to_str())
            .map_or(false, |name| name.starts_with(prefix))
}

fn record_paths(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_record(&path, prefix) {
            records.push(path);
        }
    }
    Ok(records)
}

/// Every committed `.json` document in a directory
fn read_all<T: DeserializeOwned>(dir: &Path, prefix: &str) -> Result<Vec<T>> {
    record_paths(dir, prefix)?.iter().map(|path| read_json(path)).collect()
}

fn has_journals(root: &Path) -> Result<bool> {
    Ok(!record_paths(&paths::journal_dir(root), "transition_")?.is_empty())
}

/// Write every record of a transition; repeating it is harmless
fn apply_writes(root: &Path, transition: &StepTransition) -> Result<()> {
    for write in &transition.steps {
        write_json(&paths::step_file(root, &write.step.initiative_id, &write.step.id), &write.step)?;
    }
    write_json(&paths::initiative_file(root, &transition.initiative.id), &transition.initiative)
}

/// Caller holds the exclusive lock
fn replay_journals(root: &Path) -> Result<()> {
    for path in record_paths(&paths::journal_dir(root), "transition_")? {
        let transition: StepTransition = read_json(&path)?;
        apply_writes(root, &transition)?;
        fs::remove_file(&path)?;
        log::warn!("Replayed unfinished transition of initiative {}", transition.initiative.id);
    }
    Ok(())
}

/// Caller holds the exclusive lock
fn sweep_staging(root: &Path) -> Result<()> {
    for entry in fs::read_dir(paths::steps_dir(root))? {
        let path = entry?.path();
        let is_staging = path.is_dir()
            && path
                .file_name()
                .and_then(|s| s.to_str())
                .map_or(false, |name| name.starts_with(paths::STAGING_PREFIX));

        if is_staging {
            fs::remove_dir_all(&path)?;
            log::warn!("Removed abandoned step staging directory {}", path.display());
        }
    }
    Ok(())
}

#[async_trait]
impl DurableStore for FileStore {
    async fn load_counter(&self, key: &CounterKey) -> Result<u64> {
        let key = key.clone();
        self.run(move |root| {
            shared(root, |root| {
                Ok(read_optional::<CounterRecord>(&paths::counter_file(root, &key))?
                    .map(|record| record.value)
                    .unwrap_or(0))
            })
        })
        .await
    }

    async fn increment_counter(&self, key: &CounterKey) -> Result<u64> {
        let key = key.clone();
        self.run(move |root| {
            exclusive(root, |root| {
                let path = paths::counter_file(root, &key);
                let current = read_optional::<CounterRecord>(&path)?
                    .map(|record| record.value)
                    .unwrap_or(0);

                let record = CounterRecord {
                    key: key.clone(),
                    value: current + 1,
                };
                write_json(&path, &record)?;

                log::debug!("Counter {} committed at {}", key, record.value);
                Ok(record.value)
            })
        })
        .await
    }

    async fn save_initiative(&self, initiative: &Initiative) -> Result<()> {
        let initiative = initiative.clone();
        self.run(move |root| {
            exclusive(root, |root| write_json(&paths::initiative_file(root, &initiative.id), &initiative))
        })
        .await
    }

    async fn find_initiative(&self, id: &InitiativeId) -> Result<Option<Initiative>> {
        let id = id.clone();
        self.run(move |root| shared(root, |root| read_optional(&paths::initiative_file(root, &id))))
            .await
    }

    async fn list_initiatives(&self) -> Result<Vec<Initiative>> {
        self.run(|root| {
            shared(root, |root| {
                let mut initiatives: Vec<Initiative> = read_all(&paths::initiatives_dir(root), "initiative_")?;
                initiatives.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                Ok(initiatives)
            })
        })
        .await
    }

    async fn insert_workflow_steps(&self, initiative_id: &InitiativeId, steps: &[WorkflowStep]) -> Result<()> {
        let initiative_id = initiative_id.clone();
        let steps = steps.to_vec();
        self.run(move |root| {
            exclusive(root, |root| {
                let target = paths::initiative_steps_dir(root, &initiative_id);
                if !record_paths(&target, "step_")?.is_empty() {
                    return Err(OpexError::Conflict(format!(
                        "Initiative {} already has workflow steps", initiative_id
                    )));
                }
                if target.exists() {
                    fs::remove_dir_all(&target)?;
                }

                // Assemble the full set aside, then move it into place in one rename
                let staging = tempfile::Builder::new()
                    .prefix(paths::STAGING_PREFIX)
                    .tempdir_in(paths::steps_dir(root))?;
                for step in &steps {
                    write_json(&staging.path().join(paths::step_file_name(&step.id)), step)?;
                }
                for step in &steps {
                    let index = StepIndexRecord {
                        initiative_id: initiative_id.clone(),
                    };
                    write_json(&paths::step_index_file(root, &step.id), &index)?;
                }
                fs::rename(staging.path(), &target)?;

                Ok(())
            })
        })
        .await
    }

    async fn apply_transition(&self, transition: &StepTransition) -> Result<()> {
        let transition = transition.clone();
        self.run(move |root| {
            exclusive(root, |root| {
                for write in &transition.steps {
                    let path = paths::step_file(root, &write.step.initiative_id, &write.step.id);
                    let stored: WorkflowStep = read_optional(&path)?
                        .ok_or_else(|| OpexError::NotFound(format!("Workflow step {}", write.step.id)))?;

                    if stored.status != write.expected {
                        return Err(OpexError::Conflict(format!(
                            "Workflow step {} is {} but {} was expected",
                            write.step.id, stored.status, write.expected
                        )));
                    }
                }

                let journal = paths::journal_file(root, &transition.initiative.id);
                write_json(&journal, &transition)?;
                apply_writes(root, &transition)?;
                fs::remove_file(&journal)?;

                Ok(())
            })
        })
        .await
    }

    async fn find_step(&self, id: &StepId) -> Result<Option<WorkflowStep>> {
        let id = id.clone();
        self.run(move |root| {
            shared(root, |root| {
                match read_optional::<StepIndexRecord>(&paths::step_index_file(root, &id))? {
                    Some(index) => read_optional(&paths::step_file(root, &index.initiative_id, &id)),
                    None => Ok(None),
                }
            })
        })
        .await
    }

    async fn find_steps_by_initiative(&self, id: &InitiativeId) -> Result<Vec<WorkflowStep>> {
        let id = id.clone();
        self.run(move |root| {
            shared(root, |root| {
                let mut steps: Vec<WorkflowStep> = read_all(&paths::initiative_steps_dir(root, &id), "step_")?;
                steps.sort_by_key(|s| s.stage_order);
                Ok(steps)
            })
        })
        .await
    }
}
