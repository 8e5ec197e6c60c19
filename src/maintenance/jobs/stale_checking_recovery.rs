//! Requeues health records stuck in `checking`.
//!
//! A record stays in `checking` only while a worker cycle holds it. Records
//! older than the checking timeout belong to a cycle that died and are put
//! back to `pending`.

use crate::health::HealthStore;
use crate::maintenance::{BackgroundJob, JobContext, JobError, JobSchedule};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct StaleCheckingRecoveryJob {
    health_store: Arc<dyn HealthStore>,
    checking_timeout: Duration,
}

impl StaleCheckingRecoveryJob {
    pub fn new(health_store: Arc<dyn HealthStore>, checking_timeout: Duration) -> Self {
        Self {
            health_store,
            checking_timeout,
        }
    }
}

impl BackgroundJob for StaleCheckingRecoveryJob {
    fn id(&self) -> &'static str {
        "stale_checking_recovery"
    }

    fn description(&self) -> &'static str {
        "Return abandoned health checks to pending"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(Duration::from_secs(10 * 60))
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let cutoff = chrono::Utc::now().timestamp() - self.checking_timeout.as_secs() as i64;
        let recovered = self.health_store.recover_stale_checking(cutoff)?;
        for file_path in &recovered {
            warn!("Health check of {} was abandoned, requeued", file_path);
        }
        if !recovered.is_empty() {
            info!("Recovered {} abandoned health checks", recovered.len());
        }
        Ok(())
    }
}
