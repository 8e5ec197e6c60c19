//! Bridge between corrupted health verdicts and the import queue.
//!
//! [`QueueRepairTrigger`] re-submits the source NZB of a corrupted file.
//! [`HealthRegistrar`] closes the loop: when an import completes, records
//! waiting on that NZB are reset for verification and the new file is
//! registered. When it fails for good, the waiting records are verified
//! again so their repair budget decides whether they end up corrupted.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use super::models::{HealthRecord, NewHealthCheck};
use super::store::HealthStore;
use crate::config::HealthCheckSettings;
use crate::import_queue::{
    CompletionListener, ImportOutcome, QueueAdmin, QueueError, QueueItem, QueuePriority,
};

/// Re-imports the source of a corrupted file.
pub trait RepairTrigger: Send + Sync {
    /// Returns the id of the queue item that will perform the repair, new or
    /// reused.
    fn repair(&self, file_path: &str, source_nzb_path: &str, priority: QueuePriority)
        -> Result<i64>;
}

/// Repair trigger backed by the import queue.
///
/// Reuses the latest item for the same NZB when there is one: an item still
/// queued or running gets its priority raised, a finished item is re-opened
/// through the regular retry path. Otherwise a new item is enqueued.
pub struct QueueRepairTrigger {
    admin: QueueAdmin,
}

impl QueueRepairTrigger {
    pub fn new(admin: QueueAdmin) -> Self {
        Self { admin }
    }
}

impl RepairTrigger for QueueRepairTrigger {
    fn repair(
        &self,
        file_path: &str,
        source_nzb_path: &str,
        priority: QueuePriority,
    ) -> Result<i64> {
        let latest = self.admin.find_latest_by_source(source_nzb_path)?;

        if let Some(item) = latest {
            if !item.status.is_terminal() {
                self.admin.raise_priority(item.id, priority)?;
                info!(
                    "Repair of {} reuses queued import {} ({})",
                    file_path, item.id, item.status
                );
                return Ok(item.id);
            }
            match self.admin.retry(item.id) {
                Ok(_) => {
                    self.admin.raise_priority(item.id, priority)?;
                    info!("Repair of {} re-opened import {}", file_path, item.id);
                    return Ok(item.id);
                }
                // Changed state under us; fall through to a fresh item
                Err(QueueError::InvalidState { .. }) | Err(QueueError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let item = self.admin.enqueue(source_nzb_path, None, priority)?;
        info!("Repair of {} enqueued as import {}", file_path, item.id);
        Ok(item.id)
    }
}

/// Registers completed imports for verification.
pub struct HealthRegistrar {
    store: Arc<dyn HealthStore>,
    settings: HealthCheckSettings,
}

impl HealthRegistrar {
    pub fn new(store: Arc<dyn HealthStore>, settings: HealthCheckSettings) -> Self {
        Self { store, settings }
    }

    /// Insert or reset a record to `pending`, due now.
    pub fn add_file_to_health_check(
        &self,
        file_path: &str,
        priority: QueuePriority,
        source_nzb_path: Option<&str>,
    ) -> Result<HealthRecord> {
        let mut check = NewHealthCheck::new(
            file_path,
            priority,
            self.settings.max_retries as i32,
            self.settings.max_repair_retries as i32,
        );
        if let Some(source) = source_nzb_path {
            check = check.with_source(source);
        }
        let record = self.store.add_file_to_health_check(&check)?;
        info!("Scheduled health check for {}", file_path);
        Ok(record)
    }

    /// Manual retry of a corrupted or repair-triggered record.
    pub fn retry_check(&self, file_path: &str, reset_retries: bool) -> Result<bool> {
        let reset = self.store.reset_for_recheck(file_path, reset_retries)?;
        if reset {
            info!("Health check of {} requeued manually", file_path);
        } else {
            warn!("Health check of {} cannot be requeued in its current state", file_path);
        }
        Ok(reset)
    }
}

impl CompletionListener for HealthRegistrar {
    fn import_completed(&self, item: &QueueItem, outcome: &ImportOutcome) -> Result<()> {
        for path in self.store.reset_repaired_by_source(&item.source_path)? {
            info!(
                "Repair import {} completed, {} will be verified again",
                item.id, path
            );
        }
        self.add_file_to_health_check(
            &outcome.storage_path,
            item.priority,
            Some(&item.source_path),
        )?;
        Ok(())
    }

    fn import_failed(&self, item: &QueueItem, error_message: &str) -> Result<()> {
        let details = format!("repair import failed: {}", error_message);
        for path in self
            .store
            .requeue_failed_repairs(&item.source_path, &details)?
        {
            warn!(
                "Repair import {} failed, {} will be verified again",
                item.id, path
            );
        }
        Ok(())
    }
}
