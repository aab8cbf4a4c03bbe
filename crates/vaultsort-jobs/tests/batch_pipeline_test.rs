//! End-to-end batch runs against the mock provider.

use std::sync::Arc;

use vaultsort_core::{ClassificationResult, Fingerprint, PipelineConfig, TaskInput, TaskStage};
use vaultsort_inference::mock::{MockProvider, MockReply};
use vaultsort_inference::Classifier;
use vaultsort_jobs::stats::load_snapshot;
use vaultsort_jobs::{
    scan_vault, BatchCoordinator, BatchEvent, FrontmatterLinker, MemoryReviewSink, SkipReason,
    VaultFilter,
};
use vaultsort_store::{ChangeTracker, ProgressStore, ResultCache};

fn note(name: &str, body: &str) -> TaskInput {
    TaskInput::new(format!("/vault/{}", name), body)
}

fn classifier(provider: &MockProvider, config: &PipelineConfig) -> Arc<Classifier> {
    Arc::new(Classifier::from_config(Arc::new(provider.clone()), config))
}

#[tokio::test(start_paused = true)]
async fn test_pool_of_two_with_one_hanging_input() {
    let mut config = PipelineConfig::default();
    config.batch.concurrency = 2;
    config.batch.task_timeout_secs = 1;

    let provider = MockProvider::new().with_reply_for("HANG-ME", MockReply::Hang);
    let tracker = Arc::new(ChangeTracker::in_memory());
    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config))
        .with_tracker(tracker.clone())
        .build();

    let inputs = vec![
        note("a.md", "alpha"),
        note("b.md", "bravo"),
        note("c.md", "HANG-ME"),
        note("d.md", "delta"),
        note("e.md", "echo"),
    ];
    let report = coordinator.run(inputs).await.unwrap();

    assert_eq!(report.stats.processed, 4);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.timed_out, 1);
    assert_eq!(report.stats.total(), 5);
    assert_eq!(report.stats.failed_paths[0].path, "/vault/c.md");

    let hung = tracker.get("/vault/c.md").unwrap();
    assert!(!hung.succeeded);
    assert_eq!(hung.fingerprint, Fingerprint::of(b"HANG-ME"));
    for name in ["a", "b", "d", "e"] {
        assert!(tracker.get(&format!("/vault/{}.md", name)).unwrap().succeeded);
    }
}

#[tokio::test]
async fn test_second_run_skips_unchanged() {
    let config = PipelineConfig::default();
    let provider = MockProvider::new();
    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config)).build();
    let inputs = vec![note("a.md", "alpha"), note("b.md", "bravo"), note("c.md", "charlie")];

    let first = coordinator.run(inputs.clone()).await.unwrap();
    assert_eq!(first.stats.processed, 3);
    assert_eq!(provider.call_count(), 3);

    let mut events = coordinator.events();
    let second = coordinator.run(inputs).await.unwrap();
    assert_eq!(second.stats.skipped, 3);
    assert_eq!(second.stats.processed, 0);
    assert_eq!(second.tracker.unchanged_count, 3);
    assert_eq!(provider.call_count(), 3);

    let mut unchanged = 0;
    while let Ok(event) = events.try_recv() {
        if let BatchEvent::TaskSkipped { reason, .. } = event {
            assert_eq!(reason, SkipReason::Unchanged);
            unchanged += 1;
        }
    }
    assert_eq!(unchanged, 3);
}

#[tokio::test]
async fn test_changed_content_is_reprocessed() {
    let config = PipelineConfig::default();
    let provider = MockProvider::new();
    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config)).build();

    coordinator.run(vec![note("a.md", "v1")]).await.unwrap();
    let report = coordinator.run(vec![note("a.md", "v2")]).await.unwrap();
    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.tracker.changed_count, 1);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn test_confident_cache_hit_skips_provider() {
    let config = PipelineConfig::default();
    let provider = MockProvider::new();
    let cache = Arc::new(ResultCache::from_config(&config.cache));
    cache.put(Fingerprint::of(b"alpha"), ClassificationResult::new("Rust", 0.95));

    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config))
        .with_cache(cache)
        .build();
    let mut events = coordinator.events();
    let report = coordinator.run(vec![note("a.md", "alpha")]).await.unwrap();

    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.stats.cache_hits, 1);
    assert_eq!(report.stats.cache_misses, 0);
    assert_eq!(provider.call_count(), 0);
    assert!(coordinator.tracker().get("/vault/a.md").unwrap().succeeded);

    let mut saw_hit = false;
    while let Ok(event) = events.try_recv() {
        if let BatchEvent::TaskCompleted { category, cache_hit, .. } = event {
            assert_eq!(category, "Rust");
            saw_hit = cache_hit;
        }
    }
    assert!(saw_hit);
}

#[tokio::test]
async fn test_low_confidence_cache_hit_is_reclassified() {
    let config = PipelineConfig::default();
    let provider = MockProvider::new();
    let cache = Arc::new(ResultCache::from_config(&config.cache));
    cache.put(Fingerprint::of(b"alpha"), ClassificationResult::new("Unsure", 0.2));

    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config))
        .with_cache(cache.clone())
        .build();
    let report = coordinator.run(vec![note("a.md", "alpha")]).await.unwrap();

    assert_eq!(report.stats.cache_hits, 0);
    assert_eq!(report.stats.cache_misses, 1);
    // The cache's own counters agree with the run's.
    assert_eq!(report.cache.hit_count, 0);
    assert_eq!(report.cache.miss_count, 1);
    assert_eq!(provider.call_count(), 1);
    assert_eq!(cache.get(&Fingerprint::of(b"alpha")).unwrap().category, "Inbox");
}

#[tokio::test]
async fn test_low_confidence_routes_to_review() {
    let config = PipelineConfig::default();
    let provider = MockProvider::new().with_response(r#"{"category":"Maybe","confidence":0.3}"#);
    let review = Arc::new(MemoryReviewSink::new());
    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config))
        .with_review(review.clone())
        .build();

    let report = coordinator.run(vec![note("a.md", "alpha")]).await.unwrap();

    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.stats.low_confidence, 1);
    assert_eq!(review.len(), 1);
    let item = &review.items()[0];
    assert_eq!(item.path, "/vault/a.md");
    assert_eq!(item.result.category, "Maybe");
    assert!(item.reason.contains("0.30"));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let mut config = PipelineConfig::default();
    config.classifier.backoff_base_ms = 100;
    let provider = MockProvider::new().with_script(vec![
        MockReply::Transient("503".into()),
        MockReply::Transient("503".into()),
    ]);
    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config)).build();

    let report = coordinator.run(vec![note("a.md", "alpha")]).await.unwrap();
    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.stats.retries, 2);
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_the_task() {
    let mut config = PipelineConfig::default();
    config.classifier.backoff_base_ms = 100;
    let provider =
        MockProvider::new().with_reply_for("flaky", MockReply::Transient("connection reset".into()));
    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config)).build();

    let report = coordinator.run(vec![note("a.md", "flaky")]).await.unwrap();
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.timed_out, 0);
    assert!(report.stats.failed_paths[0].reason.contains("3 attempt(s)"));
    assert!(coordinator.cache().is_empty());
}

#[tokio::test]
async fn test_resume_reattempts_non_terminal_stages() {
    let dir = tempfile::tempdir().unwrap();
    let progress_path = dir.path().join("progress.json");
    {
        let previous = ProgressStore::open(&progress_path).unwrap();
        previous.begin("/vault/a.md").unwrap();
        previous.transition("/vault/a.md", TaskStage::Analyzing, None).unwrap();
        previous.begin("/vault/b.md").unwrap();
        previous.transition("/vault/b.md", TaskStage::Completed, None).unwrap();
    }

    let config = PipelineConfig::default();
    let provider = MockProvider::new();
    let progress = Arc::new(ProgressStore::open(&progress_path).unwrap());
    assert_eq!(progress.pending_resume(), vec!["/vault/a.md".to_string()]);

    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config))
        .with_progress(progress.clone())
        .build();
    let report = coordinator
        .run(vec![note("a.md", "alpha"), note("b.md", "bravo"), note("c.md", "charlie")])
        .await
        .unwrap();

    assert_eq!(report.stats.processed, 2);
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(provider.calls_matching("bravo"), 0);
    assert_eq!(provider.calls_matching("alpha"), 1);
    // A clean finish clears progress, file included.
    assert!(progress.is_empty());
    assert!(!progress_path.exists());
}

#[tokio::test]
async fn test_stopped_run_keeps_progress() {
    let dir = tempfile::tempdir().unwrap();
    let progress_path = dir.path().join("progress.json");
    let config = PipelineConfig::default();
    let provider = MockProvider::new();
    let progress = Arc::new(ProgressStore::open(&progress_path).unwrap());
    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config))
        .with_progress(progress.clone())
        .build();

    let stop = coordinator.stop_handle();
    let mut events = coordinator.events();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if matches!(event, BatchEvent::TaskCompleted { .. }) {
                stop.stop();
            }
            if matches!(event, BatchEvent::BatchFinished { .. }) {
                break;
            }
        }
    });

    let inputs: Vec<TaskInput> = (0..20)
        .map(|i| note(&format!("n{:02}.md", i), &format!("body {}", i)))
        .collect();
    let report = coordinator.run(inputs).await.unwrap();
    watcher.await.unwrap();

    assert!(report.stopped);
    assert!(report.stats.processed >= 1);
    assert!(report.stats.total() < 20);
    assert_eq!(
        progress.get("/vault/n00.md").unwrap().stage,
        TaskStage::Completed
    );
    assert!(progress_path.exists());
}

#[tokio::test]
async fn test_vault_run_persists_state_and_rewrites_notes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    std::fs::write(root.join("Ownership.md"), "# Ownership\nEvery value has one owner.\n").unwrap();
    std::fs::write(root.join("Bread.md"), "---\ntitle: Bread\n---\nFlour and water.\n").unwrap();

    let mut config = PipelineConfig::default();
    config.vault.root = root.clone();
    let provider =
        MockProvider::new().with_response(r#"{"category":"Notes","confidence":0.8,"tags":["auto"]}"#);

    let open_coordinator = |config: &PipelineConfig| {
        BatchCoordinator::builder(config, classifier(&provider, config))
            .with_tracker(Arc::new(
                ChangeTracker::open_with(config.ledger_path(), &config.ledger).unwrap(),
            ))
            .with_cache(Arc::new(
                ResultCache::load(&config.cache_path(), &config.cache).unwrap(),
            ))
            .with_progress(Arc::new(ProgressStore::open(config.progress_path()).unwrap()))
            .with_linker(Arc::new(FrontmatterLinker::new(config.moc_dir())))
            .with_stats_path(config.stats_path())
            .build()
    };

    let filter = VaultFilter::from_config(&config);
    let inputs = scan_vault(&root, &filter).unwrap();
    assert_eq!(inputs.len(), 2);
    let report = open_coordinator(&config).run(inputs).await.unwrap();
    assert_eq!(report.stats.processed, 2);

    let bread = std::fs::read_to_string(root.join("Bread.md")).unwrap();
    assert!(bread.contains("title: Bread"));
    assert!(bread.contains("moc: '[[Notes]]'") || bread.contains("moc: \"[[Notes]]\""));
    assert!(bread.ends_with("Flour and water.\n"));
    let moc = std::fs::read_to_string(root.join("MOCs").join("Notes.md")).unwrap();
    assert!(moc.contains("- [[Bread]]"));
    assert!(moc.contains("- [[Ownership]]"));

    let stats = load_snapshot(&config.stats_path()).unwrap().unwrap();
    assert_eq!(stats.processed, 2);
    assert!(stats.finished_at.is_some());
    assert!(config.ledger_path().exists());
    assert!(config.cache_path().exists());

    // Rewritten notes were recorded with their new fingerprints, and the
    // MOC directory is not scanned, so a fresh process skips everything.
    let inputs = scan_vault(&root, &filter).unwrap();
    assert_eq!(inputs.len(), 2);
    let report = open_coordinator(&config).run(inputs).await.unwrap();
    assert_eq!(report.stats.skipped, 2);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn test_edit_after_scan_survives_and_fails_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    std::fs::write(root.join("Note.md"), "original body\n").unwrap();

    let mut config = PipelineConfig::default();
    config.vault.root = root.clone();
    let provider = MockProvider::new().with_response(r#"{"category":"Inbox","confidence":0.9}"#);
    let tracker = Arc::new(ChangeTracker::in_memory());
    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config))
        .with_tracker(tracker.clone())
        .with_linker(Arc::new(FrontmatterLinker::new(config.moc_dir())))
        .build();

    let inputs = scan_vault(&root, &VaultFilter::from_config(&config)).unwrap();
    let key = inputs[0].key();
    std::fs::write(root.join("Note.md"), "original body\nuser edit\n").unwrap();

    let report = coordinator.run(inputs).await.unwrap();
    assert_eq!(report.stats.failed, 1);
    assert_eq!(
        std::fs::read_to_string(root.join("Note.md")).unwrap(),
        "original body\nuser edit\n"
    );
    let record = tracker.get(&key).unwrap();
    assert!(!record.succeeded);
    assert!(coordinator.cache().is_empty());
}

#[tokio::test]
async fn test_unchanged_skips_leave_no_progress_records() {
    let dir = tempfile::tempdir().unwrap();
    let progress_path = dir.path().join("progress.json");
    let mut config = PipelineConfig::default();
    config.batch.clear_progress_on_completion = false;

    let inputs: Vec<TaskInput> = (0..50)
        .map(|i| note(&format!("n{:02}.md", i), &format!("body {}", i)))
        .collect();
    let tracker = Arc::new(ChangeTracker::in_memory());
    for input in &inputs {
        tracker
            .record(&input.key(), input.fingerprint(), input.content.len() as u64, true)
            .unwrap();
    }
    {
        // A stale record from an interrupted run is dropped, not resumed.
        let previous = ProgressStore::open(&progress_path).unwrap();
        previous.begin("/vault/n07.md").unwrap();
        previous.transition("/vault/n07.md", TaskStage::Analyzing, None).unwrap();
    }

    let provider = MockProvider::new();
    let progress = Arc::new(ProgressStore::open(&progress_path).unwrap());
    let coordinator = BatchCoordinator::builder(&config, classifier(&provider, &config))
        .with_tracker(tracker)
        .with_progress(progress.clone())
        .build();
    let report = coordinator.run(inputs).await.unwrap();

    assert_eq!(report.stats.skipped, 50);
    assert_eq!(provider.call_count(), 0);
    assert!(progress.is_empty());
    assert!(ProgressStore::open(&progress_path).unwrap().is_empty());
}
