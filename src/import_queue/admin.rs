//! Administrative operations on the import queue.
//!
//! These are the entry points used by the outer surfaces (API handlers, CLI)
//! to enqueue, retry, cancel, pause and delete items. Operational failures
//! surface as [`QueueError::Store`], distinct from missing items and items in
//! the wrong state.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::models::*;
use super::scheduler::ImportScheduler;
use crate::progress::ProgressEvent;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue item not found: {0}")]
    NotFound(i64),

    #[error("Queue item {id} is {status}, cannot {action}")]
    InvalidState {
        id: i64,
        status: QueueStatus,
        action: &'static str,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl From<QueueError> for BulkOutcome {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(_) => BulkOutcome::NotFound,
            QueueError::InvalidState { status, .. } => BulkOutcome::Rejected { status },
            other => BulkOutcome::Error {
                message: other.to_string(),
            },
        }
    }
}

/// Administrative facade over the scheduler and its store.
#[derive(Clone)]
pub struct QueueAdmin {
    scheduler: Arc<ImportScheduler>,
}

impl QueueAdmin {
    pub fn new(scheduler: Arc<ImportScheduler>) -> Self {
        Self { scheduler }
    }

    fn max_retries(&self) -> i32 {
        self.scheduler.settings().max_retries as i32
    }

    fn publish(&self, id: i64, status: QueueStatus) {
        self.scheduler
            .progress()
            .publish(ProgressEvent::new(id, status));
    }

    fn invalid(item: &QueueItem, action: &'static str) -> QueueError {
        QueueError::InvalidState {
            id: item.id,
            status: item.status,
            action,
        }
    }

    /// Re-read an item after a conditional update touched no row, to tell
    /// "gone" from "wrong state".
    fn explain_rejection(&self, id: i64, action: &'static str) -> QueueError {
        match self.scheduler.store().get_item(id) {
            Ok(Some(item)) => Self::invalid(&item, action),
            Ok(None) => QueueError::NotFound(id),
            Err(e) => QueueError::Store(e),
        }
    }

    // =========================================================================
    // Enqueue and inspection
    // =========================================================================

    pub fn enqueue(
        &self,
        source_path: &str,
        category: Option<&str>,
        priority: QueuePriority,
    ) -> Result<QueueItem, QueueError> {
        let new_item = Self::new_item(source_path, category, priority, self.max_retries())?;
        let item = self.scheduler.store().insert_item(&new_item)?;
        info!(
            "Enqueued import {} ({}, priority {:?})",
            item.id, item.source_path, item.priority
        );
        self.publish(item.id, QueueStatus::Pending);
        self.scheduler.wake_workers();
        Ok(item)
    }

    /// Enqueue several NZBs under one generated batch id.
    ///
    /// Paths are validated before anything is inserted.
    pub fn enqueue_batch(
        &self,
        source_paths: &[String],
        category: Option<&str>,
        priority: QueuePriority,
    ) -> Result<Vec<QueueItem>, QueueError> {
        if source_paths.is_empty() {
            return Err(QueueError::InvalidRequest("empty batch".to_string()));
        }
        let batch_id = uuid::Uuid::new_v4().to_string();
        let new_items = source_paths
            .iter()
            .map(|path| {
                Self::new_item(path, category, priority, self.max_retries())
                    .map(|item| item.with_batch(batch_id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut items = Vec::with_capacity(new_items.len());
        for new_item in &new_items {
            let item = self.scheduler.store().insert_item(new_item)?;
            self.publish(item.id, QueueStatus::Pending);
            items.push(item);
        }
        info!("Enqueued batch {} with {} imports", batch_id, items.len());
        self.scheduler.wake_workers();
        Ok(items)
    }

    fn new_item(
        source_path: &str,
        category: Option<&str>,
        priority: QueuePriority,
        max_retries: i32,
    ) -> Result<NewQueueItem, QueueError> {
        let source_path = source_path.trim();
        if source_path.is_empty() {
            return Err(QueueError::InvalidRequest(
                "source path must not be empty".to_string(),
            ));
        }
        let item = NewQueueItem::new(source_path, priority, max_retries);
        Ok(match category.map(str::trim).filter(|c| !c.is_empty()) {
            Some(category) => item.with_category(category),
            None => item,
        })
    }

    pub fn get(&self, id: i64) -> Result<QueueItem, QueueError> {
        self.scheduler
            .store()
            .get_item(id)?
            .ok_or(QueueError::NotFound(id))
    }

    pub fn list(&self, query: &QueueQuery) -> Result<Vec<QueueItem>, QueueError> {
        Ok(self.scheduler.store().list_items(query)?)
    }

    /// Most recent item created for `source_path`, in any status.
    pub fn find_latest_by_source(&self, source_path: &str) -> Result<Option<QueueItem>, QueueError> {
        Ok(self.scheduler.store().find_latest_by_source(source_path)?)
    }

    /// Raise an item's priority for its next claim. Lower priorities are
    /// ignored and a running item keeps running.
    pub fn raise_priority(&self, id: i64, priority: QueuePriority) -> Result<QueueItem, QueueError> {
        if self.scheduler.store().raise_priority(id, priority)? {
            info!("Raised priority of import {} to {:?}", id, priority);
            self.scheduler.wake_workers();
        }
        self.get(id)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(self.scheduler.store().get_stats()?)
    }

    // =========================================================================
    // State changes
    // =========================================================================

    /// Re-open a failed, completed or pending item:
    /// `→ retrying → pending`, keeping its retry count.
    pub fn retry(&self, id: i64) -> Result<QueueItem, QueueError> {
        let item = self.get(id)?;
        if !item.status.is_retryable() {
            return Err(Self::invalid(&item, "retry"));
        }

        let store = self.scheduler.store();
        if !store.begin_retry(id)? {
            return Err(self.explain_rejection(id, "retry"));
        }
        self.publish(id, QueueStatus::Retrying);

        if !store.finish_retry(id)? {
            return Err(self.explain_rejection(id, "retry"));
        }
        self.publish(id, QueueStatus::Pending);
        self.scheduler.wake_workers();

        info!("Import {} requeued for retry", id);
        self.get(id)
    }

    /// Signal the worker running `id`. The item returns to pending once the
    /// work unit has stopped.
    pub fn cancel(&self, id: i64) -> Result<CancelOutcome, QueueError> {
        if self.scheduler.cancel_in_flight(id) {
            return Ok(CancelOutcome::Cancelled);
        }
        let item = self.get(id)?;
        Ok(match item.status {
            QueueStatus::Processing => CancelOutcome::NotOwned,
            status => CancelOutcome::NotProcessing(status),
        })
    }

    /// Suspend new claims process-wide.
    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    /// Hold a single pending item back from claims.
    pub fn pause_item(&self, id: i64) -> Result<QueueItem, QueueError> {
        if !self.scheduler.store().set_paused(id, true)? {
            return Err(self.explain_rejection(id, "pause"));
        }
        self.publish(id, QueueStatus::Paused);
        self.get(id)
    }

    pub fn resume_item(&self, id: i64) -> Result<QueueItem, QueueError> {
        if !self.scheduler.store().set_paused(id, false)? {
            return Err(self.explain_rejection(id, "resume"));
        }
        self.publish(id, QueueStatus::Pending);
        self.scheduler.wake_workers();
        self.get(id)
    }

    /// Delete an item. Processing items are never deleted.
    pub fn delete(&self, id: i64) -> Result<(), QueueError> {
        match self.scheduler.store().delete_item(id)? {
            ItemDeletion::Deleted => {
                self.scheduler.progress().forget(id);
                info!("Deleted import {}", id);
                Ok(())
            }
            ItemDeletion::NotFound => Err(QueueError::NotFound(id)),
            ItemDeletion::Rejected(status) => Err(QueueError::InvalidState {
                id,
                status,
                action: "delete",
            }),
        }
    }

    // =========================================================================
    // Bulk operations
    // =========================================================================

    /// Each id is evaluated on its own; successes are not rolled back when a
    /// later id fails.
    pub fn bulk_delete(&self, ids: &[i64]) -> BulkReport {
        self.bulk(ids, |id| self.delete(id))
    }

    pub fn bulk_restart(&self, ids: &[i64]) -> BulkReport {
        self.bulk(ids, |id| self.retry(id).map(|_| ()))
    }

    pub fn bulk_cancel(&self, ids: &[i64]) -> BulkReport {
        self.bulk(ids, |id| match self.cancel(id)? {
            CancelOutcome::Cancelled => Ok(()),
            CancelOutcome::NotProcessing(status) => Err(QueueError::InvalidState {
                id,
                status,
                action: "cancel",
            }),
            CancelOutcome::NotOwned => Err(QueueError::InvalidState {
                id,
                status: QueueStatus::Processing,
                action: "cancel",
            }),
        })
    }

    fn bulk(&self, ids: &[i64], op: impl Fn(i64) -> Result<(), QueueError>) -> BulkReport {
        let mut report = BulkReport::default();
        for &id in ids {
            let outcome = match op(id) {
                Ok(()) => BulkOutcome::Succeeded,
                Err(e) => e.into(),
            };
            report.record(id, outcome);
        }
        info!(
            "Bulk operation on {} imports: {} succeeded, {} rejected, {} not found, {} errors",
            report.summary.requested,
            report.summary.succeeded,
            report.summary.rejected,
            report.summary.not_found,
            report.summary.errors
        );
        report
    }
}
