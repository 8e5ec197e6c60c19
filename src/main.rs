use anyhow::{Context, Result};
use clap::Parser;
use futures::{pin_mut, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nzb_import_server::config::{AppConfig, CliConfig, FileConfig};
use nzb_import_server::health::{
    FileSystemVerifier, HealthRegistrar, HealthStore, HealthWorker, QueueRepairTrigger,
    SqliteHealthStore,
};
use nzb_import_server::import_queue::{
    ImportScheduler, QueueAdmin, QueuePriority, QueueStore, SqliteQueueStore, StagingImporter,
};
use nzb_import_server::maintenance::jobs::{
    HealthCleanupJob, QueueCleanupJob, StaleCheckingRecoveryJob,
};
use nzb_import_server::maintenance::JobRunner;
use nzb_import_server::progress::{ProgressBroadcaster, StreamFrame};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the queue and health databases.
    #[clap(value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory imported files are materialized into.
    #[clap(long, value_parser = parse_path)]
    pub completed_dir: Option<PathBuf>,

    /// Number of concurrent import workers.
    #[clap(long)]
    pub workers: Option<usize>,

    /// Disable health verification of imported files.
    #[clap(long)]
    pub no_health_check: bool,

    /// NZB files to enqueue at startup.
    #[clap(long, value_parser = parse_path, num_args = 1..)]
    pub enqueue: Vec<PathBuf>,

    /// Category for the NZB files passed with --enqueue.
    #[clap(long)]
    pub category: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            completed_dir: self.completed_dir.clone(),
            import_workers: self.workers,
            disable_health_check: self.no_health_check,
        }
    }
}

/// Log every progress frame until the broadcaster closes.
async fn log_progress(progress: ProgressBroadcaster, heartbeat: std::time::Duration) {
    let frames = progress.subscribe().into_frames(heartbeat);
    pin_mut!(frames);
    while let Some(frame) = frames.next().await {
        if matches!(frame, StreamFrame::Heartbeat) {
            continue;
        }
        match frame.to_sse() {
            Ok(sse) => debug!("progress: {}", sse.trim_end()),
            Err(e) => warn!("Failed to encode progress frame: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    info!("Starting import server (git {})", env!("GIT_HASH"));

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;
    std::fs::create_dir_all(&config.completed_dir).with_context(|| {
        format!(
            "Failed to create completed directory {:?}",
            config.completed_dir
        )
    })?;

    info!("Opening import queue database at {:?}...", config.queue_db_path());
    let queue_store: Arc<dyn QueueStore> =
        Arc::new(SqliteQueueStore::new(config.queue_db_path())?);
    info!("Opening health database at {:?}...", config.health_db_path());
    let health_store: Arc<dyn HealthStore> =
        Arc::new(SqliteHealthStore::new(config.health_db_path())?);

    let progress = ProgressBroadcaster::new(config.progress.subscriber_buffer);
    let importer = Arc::new(StagingImporter::new(config.completed_dir.clone()));

    let mut scheduler = ImportScheduler::new(
        queue_store.clone(),
        importer,
        progress.clone(),
        config.import_queue.clone(),
    );
    if config.health_check.enabled {
        scheduler = scheduler.with_completion_listener(Arc::new(HealthRegistrar::new(
            health_store.clone(),
            config.health_check.clone(),
        )));
    }
    let scheduler = Arc::new(scheduler);
    let admin = QueueAdmin::new(scheduler.clone());

    if !cli_args.enqueue.is_empty() {
        let paths: Vec<String> = cli_args
            .enqueue
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        let items =
            admin.enqueue_batch(&paths, cli_args.category.as_deref(), QueuePriority::Normal)?;
        info!("Enqueued {} NZB files", items.len());
    }

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(log_progress(
        progress.clone(),
        config.progress.heartbeat_interval(),
    )));
    tasks.push(tokio::spawn(scheduler.clone().run(shutdown.child_token())));

    if config.health_check.enabled {
        let worker = HealthWorker::new(
            health_store.clone(),
            Arc::new(FileSystemVerifier::default()),
            config.health_check.clone(),
        )
        .with_repair_trigger(Arc::new(QueueRepairTrigger::new(admin.clone())));
        tasks.push(tokio::spawn(Arc::new(worker).run(shutdown.child_token())));
    } else {
        info!("Health verification disabled");
    }

    let mut runner = JobRunner::new(shutdown.child_token());
    runner.register_job(Arc::new(QueueCleanupJob::new(
        queue_store.clone(),
        config.import_queue.completed_retention_days,
    )));
    if config.health_check.enabled {
        runner.register_job(Arc::new(HealthCleanupJob::new(
            health_store.clone(),
            config.health_check.record_retention_days,
        )));
        runner.register_job(Arc::new(StaleCheckingRecoveryJob::new(
            health_store.clone(),
            std::time::Duration::from_secs(config.health_check.checking_timeout_secs),
        )));
    }
    tasks.push(tokio::spawn(runner.run()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    shutdown.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            error!("Task failed during shutdown: {}", e);
        }
    }

    info!("Import server stopped");
    Ok(())
}
