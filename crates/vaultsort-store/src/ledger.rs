//! Persisted path → fingerprint ledger for incremental runs.
//!
//! A path needs processing when it has no record, its fingerprint changed,
//! or its last attempt failed. The ledger file is the durable source of
//! truth and survives restarts; a file that cannot be decoded is logged and
//! replaced by an empty ledger, so the worst case is a full re-run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use vaultsort_core::{Fingerprint, HashRecord, LedgerConfig, Result};

use crate::persist::{lock, read_json_or_default, write_json_atomic};

const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    records: BTreeMap<String, HashRecord>,
}

#[derive(Debug, Default, Clone, Copy)]
struct RunCounters {
    new_count: u64,
    changed_count: u64,
    unchanged_count: u64,
}

#[derive(Debug, Default)]
struct LedgerInner {
    records: HashMap<String, HashRecord>,
    counters: RunCounters,
    records_since_flush: usize,
}

/// Per-run change-detection statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub tracked_count: usize,
    pub new_count: u64,
    pub changed_count: u64,
    pub unchanged_count: u64,
    /// Fraction of checked paths found unchanged this run.
    pub skip_rate: f64,
}

/// Thread-safe change tracker.
pub struct ChangeTracker {
    inner: Mutex<LedgerInner>,
    path: Option<PathBuf>,
    flush_every: usize,
    persist_lock: Mutex<()>,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ChangeTracker {
    /// Ledger without a backing file.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
            path: None,
            flush_every: 0,
            persist_lock: Mutex::new(()),
        }
    }

    /// Open the ledger at `path`, saving after every record.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(path, &LedgerConfig::default())
    }

    /// Open the ledger at `path` with the configured flush cadence.
    pub fn open_with(path: impl Into<PathBuf>, config: &LedgerConfig) -> Result<Self> {
        let path = path.into();
        let file: LedgerFile = read_json_or_default(&path, "ledger")?;
        let records: HashMap<String, HashRecord> = file.records.into_iter().collect();
        info!(
            tracked_count = records.len(),
            path = %path.display(),
            "Ledger opened"
        );
        Ok(Self {
            inner: Mutex::new(LedgerInner {
                records,
                ..Default::default()
            }),
            path: Some(path),
            flush_every: config.flush_every,
            persist_lock: Mutex::new(()),
        })
    }

    /// Reset the per-run counters.
    pub fn begin_run(&self) {
        lock(&self.inner).counters = RunCounters::default();
    }

    /// Whether `path` needs processing for `fingerprint`.
    pub fn has_changed(&self, path: &str, fingerprint: &Fingerprint) -> bool {
        let mut inner = lock(&self.inner);
        let (changed, new) = match inner.records.get(path) {
            None => (true, true),
            Some(r) => (!r.succeeded || &r.fingerprint != fingerprint, false),
        };
        if new {
            inner.counters.new_count += 1;
        } else if changed {
            inner.counters.changed_count += 1;
        } else {
            inner.counters.unchanged_count += 1;
        }
        trace!(path = path, fingerprint = fingerprint.short(), changed, new, "Change check");
        changed
    }

    /// Upsert the record for `path` and flush on the configured cadence.
    pub fn record(
        &self,
        path: &str,
        fingerprint: Fingerprint,
        size_bytes: u64,
        succeeded: bool,
    ) -> Result<()> {
        let flush_due = {
            let mut inner = lock(&self.inner);
            inner.records.insert(
                path.to_string(),
                HashRecord {
                    path: path.to_string(),
                    fingerprint,
                    last_processed_at: Utc::now(),
                    succeeded,
                    size_bytes,
                },
            );
            inner.records_since_flush += 1;
            self.flush_every > 0 && inner.records_since_flush >= self.flush_every
        };
        debug!(path = path, succeeded, "Ledger record");
        if flush_due {
            self.flush()?;
        }
        Ok(())
    }

    /// Drop records whose path is not in `existing`. Returns the number removed.
    pub fn prune<I, S>(&self, existing: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keep: HashSet<String> = existing.into_iter().map(|s| s.as_ref().to_string()).collect();
        let removed = {
            let mut inner = lock(&self.inner);
            let before = inner.records.len();
            inner.records.retain(|path, _| keep.contains(path));
            before - inner.records.len()
        };
        if removed > 0 {
            info!(removed, "Pruned ledger records for vanished notes");
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn get(&self, path: &str) -> Option<HashRecord> {
        lock(&self.inner).records.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> TrackerStats {
        let inner = lock(&self.inner);
        let c = inner.counters;
        let checked = c.new_count + c.changed_count + c.unchanged_count;
        TrackerStats {
            tracked_count: inner.records.len(),
            new_count: c.new_count,
            changed_count: c.changed_count,
            unchanged_count: c.unchanged_count,
            skip_rate: if checked == 0 {
                0.0
            } else {
                c.unchanged_count as f64 / checked as f64
            },
        }
    }

    /// All records, sorted by path.
    pub fn export(&self) -> Vec<HashRecord> {
        let inner = lock(&self.inner);
        let mut records: Vec<_> = inner.records.values().cloned().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    /// Insert records verbatim, replacing any with the same path.
    pub fn import<I: IntoIterator<Item = HashRecord>>(&self, records: I) {
        let mut inner = lock(&self.inner);
        for r in records {
            inner.records.insert(r.path.clone(), r);
        }
    }

    /// Write the ledger to its backing file, if any.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        self.flush_to(path)
    }

    /// Write the ledger to an explicit path.
    pub fn flush_to(&self, path: &Path) -> Result<()> {
        let _guard = lock(&self.persist_lock);
        let file = {
            let mut inner = lock(&self.inner);
            inner.records_since_flush = 0;
            LedgerFile {
                version: LEDGER_VERSION,
                records: inner
                    .records
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            }
        };
        write_json_atomic(path, &file)?;
        trace!(tracked_count = file.records.len(), "Ledger flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::of(s.as_bytes())
    }

    #[test]
    fn test_note_md_scenario() {
        let tracker = ChangeTracker::in_memory();
        assert!(tracker.has_changed("note.md", &fp("v1")));
        tracker.record("note.md", fp("v1"), 2, true).unwrap();
        assert!(!tracker.has_changed("note.md", &fp("v1")));
        assert!(tracker.has_changed("note.md", &fp("v2")));
    }

    #[test]
    fn test_unchanged_is_idempotent() {
        let tracker = ChangeTracker::in_memory();
        tracker.record("a.md", fp("a"), 1, true).unwrap();
        for _ in 0..3 {
            assert!(!tracker.has_changed("a.md", &fp("a")));
        }
        assert_eq!(tracker.stats().unchanged_count, 3);
    }

    #[test]
    fn test_failed_record_is_retried() {
        let tracker = ChangeTracker::in_memory();
        tracker.record("a.md", fp("a"), 1, false).unwrap();
        assert!(tracker.has_changed("a.md", &fp("a")));
        tracker.record("a.md", fp("a"), 1, true).unwrap();
        assert!(!tracker.has_changed("a.md", &fp("a")));
    }

    #[test]
    fn test_stats_counters_and_reset() {
        let tracker = ChangeTracker::in_memory();
        tracker.record("a.md", fp("a"), 1, true).unwrap();
        tracker.record("b.md", fp("b"), 1, true).unwrap();

        tracker.has_changed("a.md", &fp("a"));
        tracker.has_changed("b.md", &fp("b2"));
        tracker.has_changed("c.md", &fp("c"));
        tracker.has_changed("d.md", &fp("d"));

        let stats = tracker.stats();
        assert_eq!(stats.tracked_count, 2);
        assert_eq!(stats.new_count, 2);
        assert_eq!(stats.changed_count, 1);
        assert_eq!(stats.unchanged_count, 1);
        assert!((stats.skip_rate - 0.25).abs() < f64::EPSILON);

        tracker.begin_run();
        let stats = tracker.stats();
        assert_eq!(stats.new_count + stats.changed_count + stats.unchanged_count, 0);
        assert_eq!(stats.skip_rate, 0.0);
        assert_eq!(stats.tracked_count, 2);
    }

    #[test]
    fn test_prune_removes_vanished_paths() {
        let tracker = ChangeTracker::in_memory();
        for p in ["a.md", "b.md", "c.md"] {
            tracker.record(p, fp(p), 1, true).unwrap();
        }
        let removed = tracker.prune(["a.md", "c.md", "new.md"]).unwrap();
        assert_eq!(removed, 1);
        assert!(tracker.get("b.md").is_none());
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.prune(["a.md", "c.md"]).unwrap(), 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        {
            let tracker = ChangeTracker::open(&path).unwrap();
            tracker.record("a.md", fp("a"), 10, true).unwrap();
            tracker.record("b.md", fp("b"), 20, false).unwrap();
        }
        let reopened = ChangeTracker::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        let b = reopened.get("b.md").unwrap();
        assert!(!b.succeeded);
        assert_eq!(b.size_bytes, 20);
        assert!(!reopened.has_changed("a.md", &fp("a")));
    }

    #[test]
    fn test_flush_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let config = LedgerConfig {
            flush_every: 2,
            ..Default::default()
        };
        let tracker = ChangeTracker::open_with(&path, &config).unwrap();
        tracker.record("a.md", fp("a"), 1, true).unwrap();
        assert!(!path.exists());
        tracker.record("b.md", fp("b"), 1, true).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_corrupted_ledger_recovers_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{\"version\": 1, \"records\": [oops").unwrap();
        let tracker = ChangeTracker::open(&path).unwrap();
        assert!(tracker.is_empty());
        assert!(tracker.has_changed("a.md", &fp("a")));
    }

    #[test]
    fn test_export_import_round_trip() {
        let tracker = ChangeTracker::in_memory();
        tracker.record("b.md", fp("b"), 2, true).unwrap();
        tracker.record("a.md", fp("a"), 1, false).unwrap();

        let copy = ChangeTracker::in_memory();
        copy.import(tracker.export());
        assert_eq!(copy.export(), tracker.export());
        assert_eq!(copy.export()[0].path, "a.md");
    }
}
