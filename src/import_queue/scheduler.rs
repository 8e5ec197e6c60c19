//! Import scheduler: a fixed pool of workers that claim pending queue items,
//! run the import work unit and record the outcome.
//!
//! Exclusion between workers comes from the store's atomic claim. The
//! scheduler itself only tracks the items its own workers are running, so
//! that they can be cancelled and so stale-claim recovery leaves them alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error_messages;
use super::models::{ImportFailure, QueueItem, QueueStatus};
use super::retry_policy::RetryPolicy;
use super::store::QueueStore;
use super::work_unit::{ImportContext, ImportOutcome, ImportWorkUnit};
use crate::config::ImportQueueSettings;
use crate::progress::{ImportPhase, ProgressBroadcaster, ProgressEvent};

/// Pause between claim attempts after the store returned an error.
const STORE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Notified after an item reached a terminal outcome and it was recorded.
pub trait CompletionListener: Send + Sync {
    fn import_completed(&self, item: &QueueItem, outcome: &ImportOutcome) -> anyhow::Result<()>;

    /// The item failed with no retries left.
    fn import_failed(&self, _item: &QueueItem, _error_message: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Worker pool and process-wide scheduling state.
pub struct ImportScheduler {
    store: Arc<dyn QueueStore>,
    work_unit: Arc<dyn ImportWorkUnit>,
    progress: ProgressBroadcaster,
    completion_listener: Option<Arc<dyn CompletionListener>>,
    settings: ImportQueueSettings,
    retry_policy: RetryPolicy,
    paused: AtomicBool,
    /// queue item id -> token of the worker running it
    in_flight: Mutex<HashMap<i64, CancellationToken>>,
    post_processing: Arc<Semaphore>,
    wakeup: Notify,
}

impl ImportScheduler {
    pub fn new(
        store: Arc<dyn QueueStore>,
        work_unit: Arc<dyn ImportWorkUnit>,
        progress: ProgressBroadcaster,
        settings: ImportQueueSettings,
    ) -> Self {
        Self {
            store,
            work_unit,
            progress,
            completion_listener: None,
            retry_policy: RetryPolicy::new(&settings),
            post_processing: Arc::new(Semaphore::new(settings.post_processing_workers.max(1))),
            settings,
            paused: AtomicBool::new(false),
            in_flight: Mutex::new(HashMap::new()),
            wakeup: Notify::new(),
        }
    }

    pub fn with_completion_listener(mut self, listener: Arc<dyn CompletionListener>) -> Self {
        self.completion_listener = Some(listener);
        self
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn progress(&self) -> &ProgressBroadcaster {
        &self.progress
    }

    pub fn settings(&self) -> &ImportQueueSettings {
        &self.settings
    }

    // =========================================================================
    // Scheduling state
    // =========================================================================

    /// Stop claiming new items. Running items are not affected.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Import queue paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Import queue resumed");
        }
        self.wake_workers();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Wake idle workers so newly eligible items are claimed without waiting
    /// for the poll interval.
    pub fn wake_workers(&self) {
        self.wakeup.notify_waiters();
    }

    /// Signal the worker running `id`. Returns false if no worker of this
    /// scheduler is running it.
    pub fn cancel_in_flight(&self, id: i64) -> bool {
        match self.in_flight.lock().unwrap().get(&id) {
            Some(token) => {
                info!("Cancelling in-flight import {}", id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_in_flight(&self, id: i64) -> bool {
        self.in_flight.lock().unwrap().contains_key(&id)
    }

    pub fn in_flight_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.in_flight.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Requeue `processing` items claimed before `claimed_before` that no
    /// worker of this scheduler is running.
    pub fn recover_stale_claims(&self, claimed_before: i64) -> anyhow::Result<Vec<i64>> {
        let requeued = self
            .store
            .requeue_stale(claimed_before, &self.in_flight_ids())?;
        for id in &requeued {
            warn!("Requeued stale import {}", id);
            self.progress
                .publish(ProgressEvent::new(*id, QueueStatus::Pending).with_message("requeued"));
        }
        if !requeued.is_empty() {
            self.wake_workers();
        }
        Ok(requeued)
    }

    // =========================================================================
    // Main loop
    // =========================================================================

    /// Run the worker pool until `shutdown` is cancelled.
    ///
    /// On shutdown: stop claiming, cancel in-flight work, wait up to the
    /// configured timeout for workers to return their items, then close the
    /// progress streams.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            "Import scheduler starting ({} workers, {} post-processing)",
            self.settings.workers, self.settings.post_processing_workers
        );

        // No worker of this process is running anything yet, so every
        // processing row was left behind by a previous run.
        match self.recover_stale_claims(chrono::Utc::now().timestamp() + 1) {
            Ok(ids) if !ids.is_empty() => info!("Recovered {} interrupted imports", ids.len()),
            Ok(_) => {}
            Err(e) => error!("Failed to recover interrupted imports: {}", e),
        }

        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.workers {
            let scheduler = self.clone();
            let token = shutdown.child_token();
            workers.spawn(async move { scheduler.worker_loop(worker_id, token).await });
        }
        let recovery = tokio::spawn({
            let scheduler = self.clone();
            let token = shutdown.child_token();
            async move { scheduler.stale_recovery_loop(token).await }
        });

        shutdown.cancelled().await;
        info!("Import scheduler shutting down");
        self.post_processing.close();

        let drained = tokio::time::timeout(self.settings.shutdown_timeout(), async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Import workers did not stop within {}s, aborting",
                self.settings.shutdown_timeout_secs
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
            self.release_abandoned();
        }
        let _ = recovery.await;

        self.progress.close();
        info!("Import scheduler stopped");
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        debug!("Import worker {} started", worker_id);

        while !shutdown.is_cancelled() {
            if self.is_paused() {
                self.idle(&shutdown, self.settings.poll_interval()).await;
                continue;
            }

            match self.store.claim_next_item() {
                Ok(Some(item)) => {
                    debug!("Worker {} claimed import {}", worker_id, item.id);
                    self.process_item(item, &shutdown).await;
                }
                Ok(None) => self.idle(&shutdown, self.settings.poll_interval()).await,
                Err(e) => {
                    error!("Worker {} failed to claim next import: {}", worker_id, e);
                    self.idle(&shutdown, STORE_ERROR_BACKOFF).await;
                }
            }
        }

        debug!("Import worker {} stopped", worker_id);
    }

    async fn idle(&self, shutdown: &CancellationToken, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wakeup.notified() => {}
            _ = shutdown.cancelled() => {}
        }
    }

    async fn stale_recovery_loop(&self, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.settings.stale_check_interval_secs.max(1));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => break,
            }
            let cutoff = chrono::Utc::now().timestamp()
                - self.settings.stale_claim_threshold_secs as i64;
            if let Err(e) = self.recover_stale_claims(cutoff) {
                error!("Stale claim recovery failed: {}", e);
            }
        }
    }

    // =========================================================================
    // Item execution
    // =========================================================================

    /// Run one claimed item to an outcome. Never panics on item failure.
    pub(crate) async fn process_item(&self, item: QueueItem, shutdown: &CancellationToken) {
        let token = shutdown.child_token();
        self.in_flight
            .lock()
            .unwrap()
            .insert(item.id, token.clone());
        self.progress.publish(
            ProgressEvent::new(item.id, QueueStatus::Processing)
                .with_phase(ImportPhase::Downloading),
        );

        let ctx = ImportContext::new(
            item.id,
            token.clone(),
            self.progress.clone(),
            self.post_processing.clone(),
        );
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.work_unit.import(&item, &ctx) => Some(result),
        };

        // Still registered while the outcome is written, so stale-claim
        // recovery cannot requeue the item underneath us
        match result {
            None => self.handle_cancelled(&item),
            Some(Ok(outcome)) => self.handle_success(&item, outcome),
            Some(Err(failure)) => self.handle_failure(&item, failure),
        }
        self.in_flight.lock().unwrap().remove(&item.id);
    }

    fn handle_cancelled(&self, item: &QueueItem) {
        match self.store.release_claim(item.id) {
            Ok(true) => info!("Import {} cancelled, returned to pending", item.id),
            Ok(false) => warn!("Import {} cancelled but was no longer processing", item.id),
            Err(e) => error!("Failed to release cancelled import {}: {}", item.id, e),
        }
        self.progress.publish(
            ProgressEvent::new(item.id, QueueStatus::Pending).with_message("cancelled"),
        );
    }

    fn handle_success(&self, item: &QueueItem, outcome: ImportOutcome) {
        match self
            .store
            .mark_completed(item.id, &outcome.storage_path, outcome.file_size)
        {
            Ok(true) => {}
            Ok(false) => {
                warn!("Import {} finished but was no longer processing", item.id);
                return;
            }
            Err(e) => {
                error!("Failed to record completion of import {}: {}", item.id, e);
                return;
            }
        }

        info!(
            "Import {} completed: {} ({} bytes)",
            item.id, outcome.storage_path, outcome.file_size
        );
        self.progress.publish(
            ProgressEvent::new(item.id, QueueStatus::Completed)
                .with_percentage(100.0)
                .with_phase(ImportPhase::Finalizing),
        );

        if let Some(listener) = &self.completion_listener {
            if let Err(e) = listener.import_completed(item, &outcome) {
                error!(
                    "Failed to register {} for health checks: {}",
                    outcome.storage_path, e
                );
            }
        }
    }

    fn handle_failure(&self, item: &QueueItem, failure: ImportFailure) {
        let failure = error_messages::reclassify(failure);
        let retry_count = item.retry_count + 1;
        let message = error_messages::humanize(&failure.message);

        if self
            .retry_policy
            .should_retry(&failure, retry_count, item.max_retries)
        {
            let next_attempt_at = self.retry_policy.next_attempt_at(retry_count);
            match self
                .store
                .schedule_retry(item.id, retry_count, next_attempt_at, &message)
            {
                Ok(_) => warn!(
                    "Import {} failed (attempt {}/{}), retrying in {}s: {}",
                    item.id,
                    retry_count,
                    item.max_retries,
                    self.retry_policy.backoff_secs(retry_count),
                    failure.message
                ),
                Err(e) => error!("Failed to schedule retry of import {}: {}", item.id, e),
            }
            self.progress.publish(
                ProgressEvent::new(item.id, QueueStatus::Pending).with_message(message),
            );
        } else {
            let recorded = match self.store.mark_failed(item.id, retry_count, &message) {
                Ok(true) => {
                    error!(
                        "Import {} failed permanently after {} attempts: {}",
                        item.id, retry_count, failure.message
                    );
                    true
                }
                Ok(false) => {
                    warn!("Import {} failed but was no longer processing", item.id);
                    false
                }
                Err(e) => {
                    error!("Failed to mark import {} as failed: {}", item.id, e);
                    false
                }
            };
            self.progress.publish(
                ProgressEvent::new(item.id, QueueStatus::Failed).with_message(message.clone()),
            );

            if let (true, Some(listener)) = (recorded, &self.completion_listener) {
                if let Err(e) = listener.import_failed(item, &message) {
                    error!("Failed to report failure of import {}: {}", item.id, e);
                }
            }
        }
    }

    /// Return items whose worker was aborted to the queue.
    fn release_abandoned(&self) {
        let abandoned: Vec<i64> = self.in_flight.lock().unwrap().drain().map(|(id, _)| id).collect();
        for id in abandoned {
            match self.store.release_claim(id) {
                Ok(_) => warn!("Released abandoned import {}", id),
                Err(e) => error!("Failed to release abandoned import {}: {}", id, e),
            }
        }
    }
}
