//! Test pipeline lifecycle management
//!
//! Each test gets isolated databases in a temporary directory. The import
//! scheduler runs in the background; health cycles are driven explicitly
//! with [`TestPipeline::run_health_cycle`] so tests control their timing.

use super::collaborators::{CountingListener, ScriptedImporter, ScriptedVerifier};
use nzb_import_server::config::{HealthCheckSettings, ImportQueueSettings};
use nzb_import_server::health::{
    CycleReport, HealthRecord, HealthRegistrar, HealthStore, HealthWorker, QueueRepairTrigger,
    SqliteHealthStore,
};
use nzb_import_server::import_queue::{
    CompletionListener, ImportScheduler, QueueAdmin, QueueItem, QueuePriority, QueueStatus, QueueStore,
    SqliteQueueStore,
};
use nzb_import_server::progress::ProgressBroadcaster;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue settings that keep tests fast: one worker, short polling and no
/// retry backoff.
pub fn fast_queue_settings() -> ImportQueueSettings {
    ImportQueueSettings {
        workers: 1,
        poll_interval_ms: 10,
        initial_backoff_secs: 0,
        max_backoff_secs: 0,
        shutdown_timeout_secs: 5,
        ..Default::default()
    }
}

/// Poll `condition` until it holds, panicking with `what` on timeout.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A running pipeline with direct access to every component.
///
/// When dropped without [`TestPipeline::shutdown`], background tasks are
/// cancelled.
pub struct TestPipeline {
    pub queue_store: Arc<dyn QueueStore>,
    pub health_store: Arc<dyn HealthStore>,
    pub progress: ProgressBroadcaster,
    pub scheduler: Arc<ImportScheduler>,
    pub admin: QueueAdmin,
    pub health_worker: HealthWorker,
    pub importer: Arc<ScriptedImporter>,
    pub verifier: Arc<ScriptedVerifier>,
    pub completions: Arc<CountingListener>,

    shutdown: CancellationToken,
    scheduler_task: Option<JoinHandle<()>>,
    db_dir: PathBuf,

    // Private fields - keep resources alive until drop
    _temp_dir: Option<TempDir>,
}

impl TestPipeline {
    /// Start a pipeline with fast queue settings and default health settings.
    pub async fn start() -> Self {
        Self::start_with(fast_queue_settings(), HealthCheckSettings::default()).await
    }

    pub async fn start_with(
        queue_settings: ImportQueueSettings,
        health_settings: HealthCheckSettings,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_dir = temp_dir.path().to_path_buf();
        let mut pipeline =
            Self::start_in(&db_dir, queue_settings, health_settings, ScriptedImporter::new())
                .await;
        pipeline._temp_dir = Some(temp_dir);
        pipeline
    }

    /// Start a pipeline over existing databases in `db_dir`, as a restarted
    /// process would.
    pub async fn start_in(
        db_dir: &Path,
        queue_settings: ImportQueueSettings,
        health_settings: HealthCheckSettings,
        importer: Arc<ScriptedImporter>,
    ) -> Self {
        let queue_store: Arc<dyn QueueStore> = Arc::new(
            SqliteQueueStore::new(db_dir.join("import_queue.db"))
                .expect("Failed to open queue store"),
        );
        let health_store: Arc<dyn HealthStore> = Arc::new(
            SqliteHealthStore::new(db_dir.join("health.db")).expect("Failed to open health store"),
        );
        let progress = ProgressBroadcaster::new(256);

        let registrar: Arc<dyn CompletionListener> = Arc::new(HealthRegistrar::new(
            health_store.clone(),
            health_settings.clone(),
        ));
        let completions = CountingListener::new(Some(registrar));
        let scheduler = Arc::new(
            ImportScheduler::new(
                queue_store.clone(),
                importer.clone(),
                progress.clone(),
                queue_settings,
            )
            .with_completion_listener(completions.clone()),
        );
        let admin = QueueAdmin::new(scheduler.clone());

        let verifier = ScriptedVerifier::new();
        let health_worker =
            HealthWorker::new(health_store.clone(), verifier.clone(), health_settings)
                .with_repair_trigger(Arc::new(QueueRepairTrigger::new(admin.clone())));

        let shutdown = CancellationToken::new();
        let scheduler_task = tokio::spawn(scheduler.clone().run(shutdown.clone()));

        Self {
            queue_store,
            health_store,
            progress,
            scheduler,
            admin,
            health_worker,
            importer,
            verifier,
            completions,
            shutdown,
            scheduler_task: Some(scheduler_task),
            db_dir: db_dir.to_path_buf(),
            _temp_dir: None,
        }
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    pub fn enqueue(&self, source_path: &str) -> QueueItem {
        self.admin
            .enqueue(source_path, None, QueuePriority::Normal)
            .expect("Failed to enqueue")
    }

    pub fn item(&self, id: i64) -> QueueItem {
        self.admin.get(id).expect("Queue item should exist")
    }

    pub fn record(&self, file_path: &str) -> HealthRecord {
        self.health_store
            .get_record(file_path)
            .expect("Failed to read health record")
            .expect("Health record should exist")
    }

    pub async fn wait_for_status(&self, id: i64, status: QueueStatus) -> QueueItem {
        wait_until(&format!("import {} to be {}", id, status), || {
            self.item(id).status == status
        })
        .await;
        self.item(id)
    }

    /// Wait until the completion listener has handled `count` imports.
    pub async fn wait_for_completions(&self, count: usize) {
        wait_until(&format!("{} completions", count), || {
            self.completions.handled() >= count
        })
        .await;
    }

    /// Wait until the listener has handled `count` terminal failures.
    pub async fn wait_for_failures(&self, count: usize) {
        wait_until(&format!("{} failures", count), || {
            self.completions.failures() >= count
        })
        .await;
    }

    pub async fn wait_until_in_flight(&self, id: i64) {
        wait_until(&format!("import {} to be in flight", id), || {
            self.scheduler.is_in_flight(id)
        })
        .await;
    }

    pub async fn run_health_cycle(&self) -> CycleReport {
        self.health_worker
            .run_cycle()
            .await
            .expect("Health cycle failed")
    }

    /// Stop the scheduler and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.scheduler_task.take() {
            tokio::time::timeout(WAIT_TIMEOUT, task)
                .await
                .expect("Scheduler did not stop")
                .expect("Scheduler task panicked");
        }
    }
}

impl Drop for TestPipeline {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
