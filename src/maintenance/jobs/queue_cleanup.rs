//! Completed import cleanup.
//!
//! Deletes completed queue items once they are older than the retention
//! window. Failed items are kept so they can still be retried.

use crate::import_queue::QueueStore;
use crate::maintenance::{BackgroundJob, JobContext, JobError, JobSchedule};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct QueueCleanupJob {
    queue_store: Arc<dyn QueueStore>,
    retention_days: u64,
}

impl QueueCleanupJob {
    pub fn new(queue_store: Arc<dyn QueueStore>, retention_days: u64) -> Self {
        Self {
            queue_store,
            retention_days,
        }
    }

    fn cutoff(&self, now: i64) -> i64 {
        now - (self.retention_days as i64 * 24 * 60 * 60)
    }
}

impl BackgroundJob for QueueCleanupJob {
    fn id(&self) -> &'static str {
        "queue_cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete completed imports older than the retention window"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::StartupAndInterval(Duration::from_secs(60 * 60))
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let cutoff = self.cutoff(chrono::Utc::now().timestamp());
        let deleted = self.queue_store.delete_completed_before(cutoff)?;

        if deleted > 0 {
            info!(
                "Deleted {} completed imports older than {} days",
                deleted, self.retention_days
            );
        }
        Ok(())
    }
}
