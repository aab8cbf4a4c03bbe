//! Per-run aggregate counters.
//!
//! Workers bump atomics; the failed-path list sits behind its own mutex.
//! Totals are exact only after the batch drains; mid-run snapshots are an
//! approximate progress indicator.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vaultsort_core::Result;
use vaultsort_store::persist::{lock, write_json_atomic};

/// A task that ended in `Failed`, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub path: String,
    pub reason: String,
}

/// Serializable view of [`RunStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatsSnapshot {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Tasks that reached `Completed` through classification or a cache hit.
    pub processed: u64,
    /// Inputs short-circuited as unchanged or already terminal.
    pub skipped: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Provider attempts beyond the first, summed over tasks.
    pub retries: u64,
    pub low_confidence: u64,
    pub timed_out: u64,
    #[serde(default)]
    pub failed_paths: Vec<FailedTask>,
}

impl RunStatsSnapshot {
    /// Inputs accounted for so far.
    pub fn total(&self) -> u64 {
        self.processed + self.skipped + self.failed
    }
}

/// Concurrent run counters.
#[derive(Debug)]
pub struct RunStats {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    retries: AtomicU64,
    low_confidence: AtomicU64,
    timed_out: AtomicU64,
    failed_paths: Mutex<Vec<FailedTask>>,
}

impl RunStats {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
            processed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            low_confidence: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            failed_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retries(&self, retries: u32) {
        if retries > 0 {
            self.retries.fetch_add(u64::from(retries), Ordering::Relaxed);
        }
    }

    pub fn record_low_confidence(&self) {
        self.low_confidence.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed task; `timed_out` also bumps the timeout counter.
    pub fn record_failure(&self, path: &str, reason: impl Into<String>, timed_out: bool) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timed_out.fetch_add(1, Ordering::Relaxed);
        }
        lock(&self.failed_paths).push(FailedTask {
            path: path.to_string(),
            reason: reason.into(),
        });
    }

    pub fn finish(&self) {
        *lock(&self.finished_at) = Some(Utc::now());
    }

    pub fn snapshot(&self) -> RunStatsSnapshot {
        let mut failed_paths = lock(&self.failed_paths).clone();
        failed_paths.sort_by(|a, b| a.path.cmp(&b.path));
        RunStatsSnapshot {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: *lock(&self.finished_at),
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            low_confidence: self.low_confidence.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            failed_paths,
        }
    }

    /// Write the current snapshot to `path`.
    pub fn persist(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, &self.snapshot())
    }
}

/// Read a persisted snapshot, if any.
pub fn load_snapshot(path: &Path) -> Result<Option<RunStatsSnapshot>> {
    vaultsort_store::persist::read_json(path)
}
