//! Health record cleanup.
//!
//! Removes healthy records whose file no longer exists on disk (the file was
//! deleted or moved out of the library) and corrupted records nobody has
//! touched within the retention window.

use crate::health::{HealthStatus, HealthStore};
use crate::maintenance::{BackgroundJob, JobContext, JobError, JobSchedule};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const PAGE_SIZE: usize = 500;

pub struct HealthCleanupJob {
    health_store: Arc<dyn HealthStore>,
    retention_days: u64,
}

impl HealthCleanupJob {
    pub fn new(health_store: Arc<dyn HealthStore>, retention_days: u64) -> Self {
        Self {
            health_store,
            retention_days,
        }
    }

    fn missing_healthy_files(&self, ctx: &JobContext) -> Result<Vec<String>, JobError> {
        let mut missing = Vec::new();
        let mut offset = 0;
        loop {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let page = self
                .health_store
                .list_records(Some(HealthStatus::Healthy), PAGE_SIZE, offset)?;
            missing.extend(
                page.iter()
                    .filter(|r| !Path::new(&r.file_path).exists())
                    .map(|r| r.file_path.clone()),
            );
            if page.len() < PAGE_SIZE {
                return Ok(missing);
            }
            offset += page.len();
        }
    }
}

impl BackgroundJob for HealthCleanupJob {
    fn id(&self) -> &'static str {
        "health_cleanup"
    }

    fn description(&self) -> &'static str {
        "Remove health records of deleted files and expired corrupted records"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(Duration::from_secs(24 * 60 * 60))
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let missing = self.missing_healthy_files(ctx)?;
        let mut removed = 0;
        for file_path in &missing {
            if self.health_store.delete_record(file_path)? {
                debug!("Removed health record for missing file {}", file_path);
                removed += 1;
            }
        }

        let cutoff = chrono::Utc::now().timestamp() - (self.retention_days as i64 * 24 * 60 * 60);
        let expired = self
            .health_store
            .delete_stale(HealthStatus::Corrupted, cutoff)?;

        if removed > 0 || expired > 0 {
            info!(
                "Health cleanup: {} records of missing files, {} expired corrupted records",
                removed, expired
            );
        }
        Ok(())
    }
}
