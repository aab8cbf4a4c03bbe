//! Persisted per-task stage, used to resume an interrupted batch.
//!
//! Every transition is validated against the task state machine and
//! written to disk before the call returns. A task with no record is
//! `Pending`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info, warn};

use vaultsort_core::{Result, TaskRecord, TaskStage};

use crate::persist::{lock, read_json_or_default, write_json_atomic};

/// Thread-safe task progress store.
pub struct ProgressStore {
    records: Mutex<BTreeMap<String, TaskRecord>>,
    path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ProgressStore {
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Open the progress file at `path`; corruption starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records: BTreeMap<String, TaskRecord> = read_json_or_default(&path, "progress")?;
        let unfinished = records.values().filter(|r| !r.stage.is_terminal()).count();
        if unfinished > 0 {
            info!(
                unfinished,
                path = %path.display(),
                "Found unfinished tasks from a previous run"
            );
        }
        Ok(Self {
            records: Mutex::new(records),
            path: Some(path),
            persist_lock: Mutex::new(()),
        })
    }

    /// Current stage of `key`; `Pending` when unknown.
    pub fn stage(&self, key: &str) -> TaskStage {
        lock(&self.records)
            .get(key)
            .map(|r| r.stage)
            .unwrap_or(TaskStage::Pending)
    }

    pub fn get(&self, key: &str) -> Option<TaskRecord> {
        lock(&self.records).get(key).cloned()
    }

    pub fn is_terminal(&self, key: &str) -> bool {
        self.stage(key).is_terminal()
    }

    /// Start a new logical task for `key`, resetting it to `Pending`.
    ///
    /// A stage left non-terminal by an interrupted run is re-attempted from
    /// the start; a forced re-run also restarts terminal tasks.
    pub fn begin(&self, key: &str) -> Result<()> {
        let previous = lock(&self.records).insert(key.to_string(), TaskRecord::new(TaskStage::Pending));
        if let Some(prev) = previous {
            if !prev.stage.is_terminal() && prev.stage != TaskStage::Pending {
                debug!(path = key, stage = %prev.stage, "Resuming interrupted task");
            }
        }
        self.persist()
    }

    /// Move `key` to `next`, recording `error` for failures.
    pub fn transition(&self, key: &str, next: TaskStage, error: Option<String>) -> Result<()> {
        {
            let mut records = lock(&self.records);
            let current = records.get(key).map(|r| r.stage).unwrap_or(TaskStage::Pending);
            current.transition(next)?;
            records.insert(
                key.to_string(),
                TaskRecord {
                    stage: next,
                    updated_at: Utc::now(),
                    error,
                },
            );
        }
        self.persist()
    }

    /// Drop the record for `key`. The file is rewritten only when a record
    /// existed, so callers can forget unknown keys for free.
    pub fn forget(&self, key: &str) -> Result<bool> {
        let removed = lock(&self.records).remove(key).is_some();
        if removed {
            debug!(path = key, "Progress record dropped");
            self.persist()?;
        }
        Ok(removed)
    }

    /// Keys left in a non-terminal stage.
    pub fn pending_resume(&self) -> Vec<String> {
        lock(&self.records)
            .iter()
            .filter(|(_, r)| !r.stage.is_terminal())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, TaskRecord> {
        lock(&self.records).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every record and remove the backing file.
    pub fn clear(&self) -> Result<()> {
        let _guard = lock(&self.persist_lock);
        lock(&self.records).clear();
        if let Some(path) = self.path.as_deref() {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Progress file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove progress file");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let _guard = lock(&self.persist_lock);
        let snapshot = self.snapshot();
        write_json_atomic(path, &snapshot)
    }
}
