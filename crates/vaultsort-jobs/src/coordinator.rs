//! Batch coordinator: dispatches notes across a bounded worker pool.
//!
//! Per input:
//! 1. inputs whose persisted stage is terminal are skipped (unless forced)
//! 2. unchanged inputs short-circuit `Pending → Completed` with no network
//! 3. otherwise a worker checks the cache, classifies on a miss under the
//!    per-task timeout, routes low-confidence results to review, links the
//!    note, and caches the result
//!
//! Every dispatched task records exactly one ledger entry after its terminal
//! transition. Stages are persisted after every transition and stats after
//! every task, so an interrupted run resumes where it stopped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use vaultsort_core::defaults::EVENT_CHANNEL_CAPACITY;
use vaultsort_core::{
    AuxiliaryContext, BatchConfig, Error, Fingerprint, NoteLinker, PipelineConfig, Result,
    ReviewItem, ReviewSink, TaskInput, TaskStage,
};
use vaultsort_inference::{Classifier, ClassifyInput};
use vaultsort_store::{CacheStats, ChangeTracker, ProgressStore, ResultCache, TrackerStats};

use crate::linker::NoopLinker;
use crate::review::MemoryReviewSink;
use crate::stats::{RunStats, RunStatsSnapshot};

/// Why an input was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fingerprint matches a successful ledger record.
    Unchanged,
    /// A previous run already left the task terminal.
    AlreadyCompleted,
}

/// Event emitted by the coordinator.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    BatchStarted {
        run_id: Uuid,
        input_count: usize,
    },
    TaskStarted {
        path: String,
    },
    TaskSkipped {
        path: String,
        reason: SkipReason,
    },
    TaskCompleted {
        path: String,
        category: String,
        cache_hit: bool,
    },
    TaskFailed {
        path: String,
        error: String,
        timed_out: bool,
    },
    ReviewQueued {
        path: String,
        confidence: f64,
    },
    BatchFinished {
        run_id: Uuid,
        stats: RunStatsSnapshot,
        stopped: bool,
    },
}

/// Requests a graceful stop: no new tasks start, in-flight tasks finish.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one [`BatchCoordinator::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub stats: RunStatsSnapshot,
    /// Whether the run ended early through the stop handle.
    pub stopped: bool,
    pub cache: CacheStats,
    pub tracker: TrackerStats,
}

/// Worker-pool scheduler for classification tasks.
pub struct BatchCoordinator {
    batch: BatchConfig,
    confidence_threshold: f64,
    cache: Arc<ResultCache>,
    tracker: Arc<ChangeTracker>,
    progress: Arc<ProgressStore>,
    classifier: Arc<Classifier>,
    review: Arc<dyn ReviewSink>,
    linker: Arc<dyn NoteLinker>,
    context: Arc<AuxiliaryContext>,
    stats_path: Option<PathBuf>,
    event_tx: broadcast::Sender<BatchEvent>,
    stop: StopHandle,
}

impl BatchCoordinator {
    pub fn builder(config: &PipelineConfig, classifier: Arc<Classifier>) -> BatchCoordinatorBuilder {
        BatchCoordinatorBuilder::new(config, classifier)
    }

    /// Get a receiver for batch events.
    pub fn events(&self) -> broadcast::Receiver<BatchEvent> {
        self.event_tx.subscribe()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    pub fn progress(&self) -> &Arc<ProgressStore> {
        &self.progress
    }

    /// Process `inputs` to completion or until a stop is requested.
    #[instrument(skip_all, fields(subsystem = "jobs", component = "coordinator", op = "run"))]
    pub async fn run(&self, inputs: Vec<TaskInput>) -> Result<RunReport> {
        let run_id = Uuid::now_v7();
        let stats = Arc::new(RunStats::new(run_id));
        let start = Instant::now();
        let force = self.batch.force_reprocess;
        let concurrency = self.batch.concurrency.max(1);

        self.tracker.begin_run();
        let resumable = self.progress.pending_resume().len();
        info!(
            %run_id,
            input_count = inputs.len(),
            concurrency,
            force,
            resumable,
            "Batch started"
        );
        let _ = self.event_tx.send(BatchEvent::BatchStarted {
            run_id,
            input_count: inputs.len(),
        });

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        let worker = self.clone_refs(stats.clone());

        for input in inputs {
            if self.stop.is_stopped() {
                info!("Stop requested, not dispatching further tasks");
                break;
            }

            let key = input.key();
            if !force && self.progress.is_terminal(&key) {
                debug!(path = %key, stage = %self.progress.stage(&key), "Already terminal, skipping");
                worker.skip(&key, SkipReason::AlreadyCompleted);
                continue;
            }

            let fingerprint = input.fingerprint();
            let changed = self.tracker.has_changed(&key, &fingerprint);
            if !changed && !force {
                // The ledger already answers for unchanged notes; only a stale
                // record left by an interrupted run is removed.
                worker.forget(&key);
                worker.skip(&key, SkipReason::Unchanged);
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return Err(Error::Internal("worker semaphore closed".to_string())),
            };
            // The stop may arrive while waiting for a free worker.
            if self.stop.is_stopped() {
                info!("Stop requested, not dispatching further tasks");
                break;
            }

            let task = worker.clone();
            tasks.spawn(async move {
                task.execute(input, fingerprint, permit).await;
            });

            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }

        let stopped = self.stop.is_stopped();
        stats.finish();
        worker.persist_stats();
        if let Err(e) = self.cache.save() {
            error!(error = %e, "Failed to save result cache");
        }
        if let Err(e) = self.tracker.flush() {
            error!(error = %e, "Failed to flush ledger");
        }
        if !stopped && self.batch.clear_progress_on_completion {
            if let Err(e) = self.progress.clear() {
                warn!(error = %e, "Failed to clear progress");
            }
        }

        let snapshot = stats.snapshot();
        info!(
            %run_id,
            processed = snapshot.processed,
            skipped = snapshot.skipped,
            failed = snapshot.failed,
            cache_hits = snapshot.cache_hits,
            retries = snapshot.retries,
            low_confidence = snapshot.low_confidence,
            stopped,
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch finished"
        );
        let _ = self.event_tx.send(BatchEvent::BatchFinished {
            run_id,
            stats: snapshot.clone(),
            stopped,
        });

        Ok(RunReport {
            run_id,
            stats: snapshot,
            stopped,
            cache: self.cache.stats(),
            tracker: self.tracker.stats(),
        })
    }

    fn clone_refs(&self, stats: Arc<RunStats>) -> TaskRef {
        TaskRef {
            cache: self.cache.clone(),
            tracker: self.tracker.clone(),
            progress: self.progress.clone(),
            classifier: self.classifier.clone(),
            review: self.review.clone(),
            linker: self.linker.clone(),
            context: self.context.clone(),
            stats,
            stats_path: self.stats_path.clone(),
            event_tx: self.event_tx.clone(),
            confidence_threshold: self.confidence_threshold,
            task_timeout: self.batch.task_timeout(),
        }
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = ?e, "Classification task panicked");
    }
}

/// What a finished task hands back for ledger and event bookkeeping.
struct TaskOutcome {
    category: String,
    cache_hit: bool,
    /// Fingerprint of the note as it now sits on disk.
    fingerprint: Fingerprint,
}

/// Reference bundle moved into each spawned task.
#[derive(Clone)]
struct TaskRef {
    cache: Arc<ResultCache>,
    tracker: Arc<ChangeTracker>,
    progress: Arc<ProgressStore>,
    classifier: Arc<Classifier>,
    review: Arc<dyn ReviewSink>,
    linker: Arc<dyn NoteLinker>,
    context: Arc<AuxiliaryContext>,
    stats: Arc<RunStats>,
    stats_path: Option<PathBuf>,
    event_tx: broadcast::Sender<BatchEvent>,
    confidence_threshold: f64,
    task_timeout: Duration,
}

impl TaskRef {
    async fn execute(self, input: TaskInput, fingerprint: Fingerprint, _permit: OwnedSemaphorePermit) {
        let start = Instant::now();
        let key = input.key();
        let size_bytes = input.content.len() as u64;

        info!(path = %key, fingerprint = fingerprint.short(), "Processing note");
        let _ = self.event_tx.send(BatchEvent::TaskStarted { path: key.clone() });
        self.begin(&key);

        let outcome = match tokio::time::timeout(
            self.task_timeout,
            self.process(&input, &key, &fingerprint),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => {
                warn!(path = %key, "Task exceeded timeout of {}s", self.task_timeout.as_secs());
                Err(Error::Timeout(self.task_timeout))
            }
        };

        match outcome {
            Ok(done) => {
                self.record_ledger(&key, done.fingerprint, size_bytes, true);
                self.stats.record_processed();
                info!(
                    path = %key,
                    category = %done.category,
                    cache_hit = done.cache_hit,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Note classified"
                );
                let _ = self.event_tx.send(BatchEvent::TaskCompleted {
                    path: key,
                    category: done.category,
                    cache_hit: done.cache_hit,
                });
            }
            Err(e) => {
                let reason = e.to_string();
                let timed_out = e.is_timeout();
                self.mark(&key, TaskStage::Failed, Some(reason.clone()));
                self.record_ledger(&key, fingerprint, size_bytes, false);
                self.stats.record_failure(&key, reason.clone(), timed_out);
                warn!(
                    path = %key,
                    error = %reason,
                    timed_out,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Note failed"
                );
                let _ = self.event_tx.send(BatchEvent::TaskFailed {
                    path: key,
                    error: reason,
                    timed_out,
                });
            }
        }
        self.persist_stats();
    }

    async fn process(&self, input: &TaskInput, key: &str, fingerprint: &Fingerprint) -> Result<TaskOutcome> {
        // Low-confidence entries count as misses here and in the cache stats.
        let threshold = self.confidence_threshold;
        if let Some(hit) = self.cache.get_if(fingerprint, |r| r.is_confident(threshold)) {
            debug!(path = %key, category = %hit.category, "Cache hit");
            self.stats.record_cache_hit();
            self.transition(key, TaskStage::Completed, None)?;
            return Ok(TaskOutcome {
                category: hit.category,
                cache_hit: true,
                fingerprint: fingerprint.clone(),
            });
        }
        self.stats.record_cache_miss();

        self.transition(key, TaskStage::Analyzing, None)?;
        let classified = self
            .classifier
            .classify(&ClassifyInput::from(input), &self.context)
            .await?;
        self.stats.record_retries(classified.retries());
        let result = classified.result;

        if classified.needs_review {
            self.stats.record_low_confidence();
            let item = ReviewItem::low_confidence(key, result.clone(), self.confidence_threshold);
            match self.review.submit(item).await {
                Ok(()) => {
                    let _ = self.event_tx.send(BatchEvent::ReviewQueued {
                        path: key.to_string(),
                        confidence: result.confidence,
                    });
                }
                Err(e) => warn!(path = %key, error = %e, "Failed to queue review item"),
            }
        }

        self.transition(key, TaskStage::Linking, None)?;
        let rewritten = self.linker.link(input, &result).await?;
        let category = result.category.clone();
        self.cache.put(fingerprint.clone(), result);
        self.transition(key, TaskStage::Completed, None)?;

        Ok(TaskOutcome {
            category,
            cache_hit: false,
            fingerprint: rewritten.unwrap_or_else(|| fingerprint.clone()),
        })
    }

    fn transition(&self, key: &str, next: TaskStage, error: Option<String>) -> Result<()> {
        match self.progress.transition(key, next, error) {
            Err(e @ Error::InvalidTransition { .. }) => Err(e),
            Err(e) => {
                // State stays in memory; only the file write failed.
                warn!(path = %key, stage = %next, error = %e, "Failed to persist task stage");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn begin(&self, key: &str) {
        if let Err(e) = self.progress.begin(key) {
            warn!(path = %key, error = %e, "Failed to persist task start");
        }
    }

    fn forget(&self, key: &str) {
        if let Err(e) = self.progress.forget(key) {
            warn!(path = %key, error = %e, "Failed to drop progress record");
        }
    }

    fn mark(&self, key: &str, next: TaskStage, error: Option<String>) {
        if let Err(e) = self.transition(key, next, error) {
            warn!(path = %key, stage = %next, error = %e, "Task stage not updated");
        }
    }

    /// Skips are counted but not persisted one by one; the end-of-run
    /// snapshot covers them.
    fn skip(&self, key: &str, reason: SkipReason) {
        self.stats.record_skipped();
        debug!(path = %key, ?reason, "Skipping note");
        let _ = self.event_tx.send(BatchEvent::TaskSkipped {
            path: key.to_string(),
            reason,
        });
    }

    fn record_ledger(&self, key: &str, fingerprint: Fingerprint, size_bytes: u64, succeeded: bool) {
        if let Err(e) = self.tracker.record(key, fingerprint, size_bytes, succeeded) {
            error!(path = %key, error = %e, "Failed to persist ledger record");
        }
    }

    fn persist_stats(&self) {
        if let Some(path) = self.stats_path.as_deref() {
            if let Err(e) = self.stats.persist(path) {
                warn!(path = %path.display(), error = %e, "Failed to persist run stats");
            }
        }
    }
}

/// Builder for a [`BatchCoordinator`].
///
/// Stores default to in-memory instances, the review sink to
/// [`MemoryReviewSink`], and the linker to [`NoopLinker`].
pub struct BatchCoordinatorBuilder {
    batch: BatchConfig,
    confidence_threshold: f64,
    classifier: Arc<Classifier>,
    cache: Option<Arc<ResultCache>>,
    tracker: Option<Arc<ChangeTracker>>,
    progress: Option<Arc<ProgressStore>>,
    review: Option<Arc<dyn ReviewSink>>,
    linker: Option<Arc<dyn NoteLinker>>,
    context: AuxiliaryContext,
    stats_path: Option<PathBuf>,
    cache_config: vaultsort_core::CacheConfig,
}

impl BatchCoordinatorBuilder {
    pub fn new(config: &PipelineConfig, classifier: Arc<Classifier>) -> Self {
        Self {
            batch: config.batch.clone(),
            confidence_threshold: config.classifier.confidence_threshold,
            classifier,
            cache: None,
            tracker: None,
            progress: None,
            review: None,
            linker: None,
            context: AuxiliaryContext::default(),
            stats_path: None,
            cache_config: config.cache.clone(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<ChangeTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressStore>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_review(mut self, review: Arc<dyn ReviewSink>) -> Self {
        self.review = Some(review);
        self
    }

    pub fn with_linker(mut self, linker: Arc<dyn NoteLinker>) -> Self {
        self.linker = Some(linker);
        self
    }

    pub fn with_context(mut self, context: AuxiliaryContext) -> Self {
        self.context = context;
        self
    }

    /// Persist a stats snapshot here after every task.
    pub fn with_stats_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stats_path = Some(path.into());
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn build(self) -> BatchCoordinator {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        BatchCoordinator {
            batch: self.batch,
            confidence_threshold: self.confidence_threshold,
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(ResultCache::from_config(&self.cache_config))),
            tracker: self
                .tracker
                .unwrap_or_else(|| Arc::new(ChangeTracker::in_memory())),
            progress: self
                .progress
                .unwrap_or_else(|| Arc::new(ProgressStore::in_memory())),
            classifier: self.classifier,
            review: self
                .review
                .unwrap_or_else(|| Arc::new(MemoryReviewSink::new())),
            linker: self.linker.unwrap_or_else(|| Arc::new(NoopLinker)),
            context: Arc::new(self.context),
            stats_path: self.stats_path,
            event_tx,
            stop: StopHandle::default(),
        }
    }
}
