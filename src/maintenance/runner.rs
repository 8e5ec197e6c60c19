use super::context::JobContext;
use super::job::{BackgroundJob, JobError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs registered maintenance jobs on their interval schedules.
pub struct JobRunner {
    jobs: HashMap<&'static str, Arc<dyn BackgroundJob>>,

    next_runs: HashMap<&'static str, Instant>,

    /// Currently running jobs with their task handles.
    running_handles: HashMap<&'static str, JoinHandle<()>>,

    job_cancel_tokens: HashMap<&'static str, CancellationToken>,

    shutdown_token: CancellationToken,
}

impl JobRunner {
    pub fn new(shutdown_token: CancellationToken) -> Self {
        Self {
            jobs: HashMap::new(),
            next_runs: HashMap::new(),
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            shutdown_token,
        }
    }

    /// Register a job with the runner.
    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        info!("Registering job: {} - {}", job.id(), job.description());
        self.jobs.insert(job.id(), job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Execute a job immediately and wait for its result.
    pub async fn run_job_now(&self, job_id: &str) -> Result<(), JobError> {
        let job = self.jobs.get(job_id).cloned().ok_or(JobError::NotFound)?;
        let ctx = JobContext::new(self.shutdown_token.child_token());
        tokio::task::spawn_blocking(move || job.execute(&ctx))
            .await
            .map_err(|e| JobError::ExecutionFailed(format!("Task panic: {}", e)))?
    }

    /// Main runner loop.
    pub async fn run(mut self) {
        info!("Starting job runner with {} registered jobs", self.jobs.len());

        let now = Instant::now();
        for (job_id, job) in &self.jobs {
            let schedule = job.schedule();
            let first_run = if schedule.runs_on_startup() {
                now
            } else {
                now + schedule.interval()
            };
            self.next_runs.insert(*job_id, first_run);
        }

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_job();
            debug!("Job runner sleeping for {:?}", sleep_duration);

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs();
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Job runner received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job runner stopped");
    }

    fn time_until_next_job(&self) -> Duration {
        let now = Instant::now();
        self.next_runs
            .iter()
            .filter(|(job_id, _)| !self.running_handles.contains_key(*job_id))
            .map(|(_, next_run)| next_run.saturating_duration_since(now))
            .min()
            .unwrap_or(Duration::from_secs(60))
    }

    fn run_due_jobs(&mut self) {
        let now = Instant::now();
        let due: Vec<&'static str> = self
            .next_runs
            .iter()
            .filter(|(job_id, next_run)| {
                **next_run <= now && !self.running_handles.contains_key(*job_id)
            })
            .map(|(job_id, _)| *job_id)
            .collect();

        for job_id in due {
            self.spawn_job(job_id);
        }
    }

    fn spawn_job(&mut self, job_id: &'static str) {
        let Some(job) = self.jobs.get(job_id).cloned() else {
            error!("Attempted to spawn unknown job: {}", job_id);
            return;
        };

        self.next_runs
            .insert(job_id, Instant::now() + job.schedule().interval());

        let cancel_token = self.shutdown_token.child_token();
        self.job_cancel_tokens.insert(job_id, cancel_token.clone());
        let ctx = JobContext::new(cancel_token);

        info!("Starting job: {}", job_id);
        let handle = tokio::spawn(async move {
            let start_time = std::time::Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            match result {
                Ok(Ok(())) => info!("Job {} completed successfully in {:?}", job_id, elapsed),
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id, elapsed)
                }
                Ok(Err(e)) => error!("Job {} failed after {:?}: {}", job_id, elapsed, e),
                Err(e) => error!("Job {} panicked after {:?}: {}", job_id, elapsed, e),
            }
        });

        self.running_handles.insert(job_id, handle);
    }

    async fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<&'static str> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| *job_id)
            .collect();

        for job_id in completed {
            if let Some(handle) = self.running_handles.remove(job_id) {
                let _ = handle.await;
            }
            self.job_cancel_tokens.remove(job_id);
        }
    }

    async fn shutdown(&mut self) {
        for (job_id, token) in &self.job_cancel_tokens {
            debug!("Cancelling job: {}", job_id);
            token.cancel();
        }

        for (job_id, handle) in self.running_handles.drain() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!("Job {} did not stop within {:?}", job_id, SHUTDOWN_TIMEOUT);
            }
        }

        self.job_cancel_tokens.clear();
        info!("Job runner shutdown complete");
    }
}
