//! `vaultsort` command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vaultsort_core::{ClassificationProvider, NoteLinker, PipelineConfig};
use vaultsort_inference::{build_provider, Classifier};
use vaultsort_jobs::stats::load_snapshot;
use vaultsort_jobs::{
    collect_context, list_note_paths, scan_vault, BatchCoordinator, BatchEvent,
    DirectoryReviewSink, FrontmatterLinker, MemoryReviewSink, NoopLinker, RunReport, VaultFilter,
};
use vaultsort_store::{ChangeTracker, ProgressStore, ResultCache};

#[derive(Parser)]
#[command(name = "vaultsort", version, about = "Classify Markdown notes into Maps of Content")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "VAULTSORT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Vault root (overrides the config file).
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the vault and classify new or changed notes.
    Run {
        /// Reprocess every note, ignoring the ledger and previous progress.
        #[arg(long)]
        force: bool,
        /// Worker pool size.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Classify without touching notes or persisted state.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print cache, ledger, and last-run statistics.
    Stats,
    /// Drop ledger records for notes that no longer exist.
    Prune,
    /// Check that the provider is reachable.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_env();
    if let Some(root) = cli.vault {
        config.vault.root = root;
    }

    match cli.command {
        Command::Run {
            force,
            concurrency,
            dry_run,
        } => {
            if force {
                config.batch.force_reprocess = true;
            }
            if let Some(n) = concurrency {
                config.batch.concurrency = n;
            }
            config.resolve_root().context("Invalid vault root")?;
            config.validate().context("Invalid configuration")?;
            run(config, dry_run).await
        }
        Command::Stats => {
            config.resolve_root().context("Invalid vault root")?;
            config.validate().context("Invalid configuration")?;
            stats(&config)
        }
        Command::Prune => {
            config.resolve_root().context("Invalid vault root")?;
            config.validate().context("Invalid configuration")?;
            prune(&config).await
        }
        Command::Health => {
            config.validate().context("Invalid configuration")?;
            health(&config).await
        }
    }
}

/// Initialize tracing.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, daily rotation)
///   RUST_LOG    - standard env filter (default: "vaultsort=info")
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vaultsort=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("vaultsort.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else {
        // Logs go to stderr; stdout carries the run summary.
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

async fn run(config: PipelineConfig, dry_run: bool) -> anyhow::Result<()> {
    let provider = build_provider(&config.provider).context("Failed to build provider")?;
    info!(
        provider = provider.name(),
        model = provider.model_name(),
        dry_run,
        "Provider ready"
    );
    let classifier = Arc::new(Classifier::from_config(provider, &config));

    let filter = VaultFilter::from_config(&config);
    let root = config.vault.root.clone();
    let inputs = tokio::task::spawn_blocking(move || scan_vault(&root, &filter))
        .await
        .context("Vault scan task failed")?
        .context("Failed to scan vault")?;
    let context = collect_context(&inputs, config.moc_dir().as_deref());

    let builder = BatchCoordinator::builder(&config, classifier).with_context(context);
    let builder = if dry_run {
        // Work on in-memory copies so nothing on disk changes.
        let tracker = ChangeTracker::in_memory();
        tracker.import(ChangeTracker::open(config.ledger_path())?.export());
        let cache = ResultCache::from_config(&config.cache);
        cache.import(ResultCache::load(&config.cache_path(), &config.cache)?.export());
        builder
            .with_tracker(Arc::new(tracker))
            .with_cache(Arc::new(cache))
            .with_progress(Arc::new(ProgressStore::in_memory()))
            .with_review(Arc::new(MemoryReviewSink::new()))
            .with_linker(Arc::new(NoopLinker))
    } else {
        let linker: Arc<dyn NoteLinker> = if config.linker.enabled {
            Arc::new(FrontmatterLinker::new(config.moc_dir()))
        } else {
            Arc::new(NoopLinker)
        };
        builder
            .with_tracker(Arc::new(ChangeTracker::open_with(
                config.ledger_path(),
                &config.ledger,
            )?))
            .with_cache(Arc::new(ResultCache::load(
                &config.cache_path(),
                &config.cache,
            )?))
            .with_progress(Arc::new(ProgressStore::open(config.progress_path())?))
            .with_review(Arc::new(DirectoryReviewSink::new(config.review_dir())))
            .with_linker(linker)
            .with_stats_path(config.stats_path())
    };
    let coordinator = builder.build();

    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight notes");
            stop.stop();
        }
    });

    let mut events = coordinator.events();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BatchEvent::TaskCompleted {
                    path,
                    category,
                    cache_hit,
                }) => {
                    let source = if cache_hit { " (cached)" } else { "" };
                    println!("ok      {} -> {}{}", path, category, source);
                }
                Ok(BatchEvent::TaskFailed { path, error, .. }) => {
                    println!("failed  {}: {}", path, error);
                }
                Ok(BatchEvent::ReviewQueued { path, confidence }) => {
                    println!("review  {} (confidence {:.2})", path, confidence);
                }
                Ok(BatchEvent::BatchFinished { .. }) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!(missed = n, "Progress printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let report = coordinator.run(inputs).await?;
    let _ = printer.await;
    print_report(&report, dry_run);
    Ok(())
}

fn print_report(report: &RunReport, dry_run: bool) {
    let s = &report.stats;
    println!();
    println!("Run {}{}", report.run_id, if dry_run { " (dry run)" } else { "" });
    if report.stopped {
        println!("  stopped early on request");
    }
    println!("  processed:      {}", s.processed);
    println!("  skipped:        {}", s.skipped);
    println!("  failed:         {}", s.failed);
    println!("  cache hits:     {}", s.cache_hits);
    println!("  cache misses:   {}", s.cache_misses);
    println!("  retries:        {}", s.retries);
    println!("  low confidence: {}", s.low_confidence);
    println!("  timed out:      {}", s.timed_out);
    println!(
        "  cache:          {} entries, {} bytes, hit rate {:.1}%",
        report.cache.entries,
        report.cache.size_bytes,
        report.cache.hit_rate() * 100.0
    );
    println!(
        "  ledger:         {} tracked, skip rate {:.1}%",
        report.tracker.tracked_count,
        report.tracker.skip_rate * 100.0
    );
    if !s.failed_paths.is_empty() {
        println!("Failed notes:");
        for failed in &s.failed_paths {
            println!("  {}: {}", failed.path, failed.reason);
        }
    }
}

fn stats(config: &PipelineConfig) -> anyhow::Result<()> {
    let cache = ResultCache::load(&config.cache_path(), &config.cache)?;
    let tracker = ChangeTracker::open(config.ledger_path())?;
    let cache_stats = cache.stats();
    let failed = tracker.export().iter().filter(|r| !r.succeeded).count();

    println!("Cache ({})", config.cache_path().display());
    println!(
        "  entries: {} / {}",
        cache_stats.entries, cache_stats.max_entries
    );
    println!(
        "  bytes:   {} / {}",
        cache_stats.size_bytes, cache_stats.max_size_bytes
    );
    println!("Ledger ({})", config.ledger_path().display());
    println!("  tracked: {}", tracker.len());
    println!("  failed:  {}", failed);

    match load_snapshot(&config.stats_path()) {
        Ok(Some(last)) => {
            println!("Last run {} (started {})", last.run_id, last.started_at.to_rfc3339());
            println!(
                "  processed {}, skipped {}, failed {}, cache hits {}, retries {}",
                last.processed, last.skipped, last.failed, last.cache_hits, last.retries
            );
            if last.finished_at.is_none() {
                println!("  run did not finish");
            }
        }
        Ok(None) => println!("No previous run recorded"),
        Err(e) => warn!(error = %e, "Cannot read last run stats"),
    }
    Ok(())
}

async fn prune(config: &PipelineConfig) -> anyhow::Result<()> {
    let filter = VaultFilter::from_config(config);
    let root = config.vault.root.clone();
    let paths = tokio::task::spawn_blocking(move || list_note_paths(&root, &filter))
        .await
        .context("Vault scan task failed")?
        .context("Failed to list vault notes")?;

    let tracker = ChangeTracker::open_with(config.ledger_path(), &config.ledger)?;
    let removed = tracker.prune(paths.iter().map(|p| p.to_string_lossy().into_owned()))?;
    println!(
        "Pruned {} ledger record(s); {} remain",
        removed,
        tracker.len()
    );
    Ok(())
}

async fn health(config: &PipelineConfig) -> anyhow::Result<()> {
    let provider = build_provider(&config.provider).context("Failed to build provider")?;
    let healthy = provider.health_check().await.unwrap_or_else(|e| {
        warn!(error = %e, "Health check errored");
        false
    });
    println!(
        "{} ({}) at {}: {}",
        provider.name(),
        provider.model_name(),
        config.provider.resolved_base_url(),
        if healthy { "healthy" } else { "unreachable" }
    );
    if !healthy {
        bail!("provider {} is not healthy", provider.name());
    }
    Ok(())
}
