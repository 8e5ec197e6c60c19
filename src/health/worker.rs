//! Health verification worker.
//!
//! Runs on a fixed interval. Each cycle claims a bounded batch of due
//! records, verifies them concurrently within a time box and resolves every
//! claimed record: healthy, rescheduled, or corrupted (with a repair when the
//! policy allows one).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::models::{HealthRecord, VerificationVerdict};
use super::repair::RepairTrigger;
use super::store::HealthStore;
use super::verifier::FileVerifier;
use crate::config::HealthCheckSettings;
use crate::import_queue::QueuePriority;

/// Counts of what one verification cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub claimed: usize,
    pub healthy: usize,
    /// Partially available files, moved straight to corrupted
    pub partial: usize,
    /// Unavailable files that exhausted their verification retries
    pub corrupted: usize,
    pub rescheduled: usize,
    pub repairs_triggered: usize,
    pub repairs_exhausted: usize,
    /// Repairs that could not be requested; the record is checked again later
    pub repair_errors: usize,
    /// Records whose verification did not finish within the cycle timeout
    pub timed_out: usize,
    /// Verdicts dropped because the record changed while being checked
    pub discarded: usize,
}

pub struct HealthWorker {
    store: Arc<dyn HealthStore>,
    verifier: Arc<dyn FileVerifier>,
    repair_trigger: Option<Arc<dyn RepairTrigger>>,
    settings: HealthCheckSettings,
}

impl HealthWorker {
    pub fn new(
        store: Arc<dyn HealthStore>,
        verifier: Arc<dyn FileVerifier>,
        settings: HealthCheckSettings,
    ) -> Self {
        Self {
            store,
            verifier,
            repair_trigger: None,
            settings,
        }
    }

    pub fn with_repair_trigger(mut self, trigger: Arc<dyn RepairTrigger>) -> Self {
        self.repair_trigger = Some(trigger);
        self
    }

    /// Run cycles until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.settings.check_interval_secs.max(1));
        info!(
            "Health worker starting (interval={}s, batch={}, concurrency={})",
            interval.as_secs(),
            self.settings.batch_size,
            self.settings.max_concurrent_checks
        );

        // Anything still checking was interrupted by the previous shutdown
        match self
            .store
            .recover_stale_checking(chrono::Utc::now().timestamp() + 1)
        {
            Ok(paths) if !paths.is_empty() => {
                info!("Recovered {} interrupted health checks", paths.len())
            }
            Ok(_) => {}
            Err(e) => error!("Failed to recover interrupted health checks: {}", e),
        }

        loop {
            tokio::select! {
                result = self.run_cycle() => match result {
                    Ok(report) if report.claimed > 0 => info!(
                        "Health cycle: {} checked, {} healthy, {} partial, {} corrupted, {} rescheduled, {} repairs",
                        report.claimed,
                        report.healthy,
                        report.partial,
                        report.corrupted,
                        report.rescheduled,
                        report.repairs_triggered
                    ),
                    Ok(_) => debug!("Health cycle: nothing due"),
                    Err(e) => error!("Health cycle failed: {}", e),
                },
                _ = shutdown.cancelled() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Health worker stopped");
    }

    /// Claim, verify and resolve one batch of due records.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let records = self.store.claim_batch(self.settings.batch_size)?;
        let mut report = CycleReport {
            claimed: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        let mut unresolved: HashMap<String, HealthRecord> = records
            .iter()
            .map(|r| (r.file_path.clone(), r.clone()))
            .collect();

        let verifier = self.verifier.clone();
        let mut verifications = stream::iter(records)
            .map(|record| {
                let verifier = verifier.clone();
                async move {
                    let verdict = verifier.verify(&record).await;
                    (record, verdict)
                }
            })
            .buffer_unordered(self.settings.max_concurrent_checks.max(1));

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.settings.cycle_timeout_secs);
        loop {
            match tokio::time::timeout_at(deadline, verifications.next()).await {
                Ok(Some((record, verdict))) => {
                    unresolved.remove(&record.file_path);
                    self.resolve_logged(&record, verdict, &mut report);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Health cycle exceeded {}s, {} checks unfinished",
                        self.settings.cycle_timeout_secs,
                        unresolved.len()
                    );
                    break;
                }
            }
        }
        drop(verifications);

        for record in unresolved.into_values() {
            report.timed_out += 1;
            let verdict = VerificationVerdict::Unavailable {
                reason: "verification timed out".to_string(),
            };
            self.resolve_logged(&record, verdict, &mut report);
        }

        Ok(report)
    }

    fn resolve_logged(
        &self,
        record: &HealthRecord,
        verdict: VerificationVerdict,
        report: &mut CycleReport,
    ) {
        if let Err(e) = self.resolve(record, verdict, report) {
            // Left in checking; stale recovery will requeue it
            error!("Failed to record health verdict for {}: {}", record.file_path, e);
        }
    }

    fn resolve(
        &self,
        record: &HealthRecord,
        verdict: VerificationVerdict,
        report: &mut CycleReport,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let path = record.file_path.as_str();

        match verdict {
            VerificationVerdict::Healthy => {
                let next = now + self.settings.healthy_recheck_interval_secs as i64;
                if !self.store.mark_healthy(path, next)? {
                    report.discarded += 1;
                    return Ok(());
                }
                report.healthy += 1;
                debug!("{} is healthy", path);
            }
            VerificationVerdict::Partial { details } => {
                let details = format!("partial: {}", details);
                if !self.store.mark_corrupted(path, &details)? {
                    report.discarded += 1;
                    return Ok(());
                }
                report.partial += 1;
                warn!("{} is partially available: {}", path, details);
                self.apply_repair_policy(record, report)?;
            }
            VerificationVerdict::Unavailable { reason } if record.retry_count < record.max_retries => {
                let retry_count = record.retry_count + 1;
                let next = now + self.settings.retry_backoff_secs as i64;
                if !self.store.schedule_recheck(path, retry_count, next, &reason)? {
                    report.discarded += 1;
                    return Ok(());
                }
                report.rescheduled += 1;
                info!(
                    "{} unavailable (attempt {}/{}), rechecking in {}s: {}",
                    path, retry_count, record.max_retries, self.settings.retry_backoff_secs, reason
                );
            }
            VerificationVerdict::Unavailable { reason } => {
                if !self.store.mark_corrupted(path, &reason)? {
                    report.discarded += 1;
                    return Ok(());
                }
                report.corrupted += 1;
                warn!("{} is corrupted: {}", path, reason);
                self.apply_repair_policy(record, report)?;
            }
        }
        Ok(())
    }

    fn apply_repair_policy(&self, record: &HealthRecord, report: &mut CycleReport) -> Result<()> {
        let Some(trigger) = &self.repair_trigger else {
            return Ok(());
        };
        let Some(source) = record.source_nzb_path.as_deref() else {
            warn!("{} has no source NZB, cannot repair", record.file_path);
            return Ok(());
        };
        if record.repair_retry_count >= record.max_repair_retries {
            report.repairs_exhausted += 1;
            warn!(
                "{} stays corrupted: {} repairs already attempted",
                record.file_path, record.repair_retry_count
            );
            return Ok(());
        }

        // Marked before asking: the repair import may settle before
        // `repair` returns
        let attempt = record.repair_retry_count + 1;
        if !self.store.mark_repair_triggered(&record.file_path, attempt)? {
            report.discarded += 1;
            return Ok(());
        }

        match trigger.repair(&record.file_path, source, QueuePriority::High) {
            Ok(item_id) => {
                report.repairs_triggered += 1;
                info!(
                    "Repair {}/{} of {} queued as import {}",
                    attempt, record.max_repair_retries, record.file_path, item_id
                );
            }
            Err(e) => {
                report.repair_errors += 1;
                let next =
                    chrono::Utc::now().timestamp() + self.settings.retry_backoff_secs as i64;
                error!(
                    "Failed to trigger repair of {}, checking again in {}s: {}",
                    record.file_path, self.settings.retry_backoff_secs, e
                );
                let details = format!("repair request failed: {}", e);
                self.store.cancel_repair(
                    &record.file_path,
                    record.repair_retry_count,
                    next,
                    &details,
                )?;
            }
        }
        Ok(())
    }
}
