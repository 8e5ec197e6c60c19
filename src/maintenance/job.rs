use super::context::JobContext;
use std::time::Duration;

/// Schedule for when a job should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSchedule {
    /// Run at fixed intervals, first run one interval after startup
    Interval(Duration),
    /// Run once at startup, then at fixed intervals
    StartupAndInterval(Duration),
}

impl JobSchedule {
    pub fn interval(&self) -> Duration {
        match self {
            JobSchedule::Interval(interval) | JobSchedule::StartupAndInterval(interval) => {
                *interval
            }
        }
    }

    pub fn runs_on_startup(&self) -> bool {
        matches!(self, JobSchedule::StartupAndInterval(_))
    }
}

/// Errors that can occur during job execution.
#[derive(Debug)]
pub enum JobError {
    NotFound,
    ExecutionFailed(String),
    Cancelled,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::NotFound => write!(f, "Job not found"),
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

impl From<anyhow::Error> for JobError {
    fn from(e: anyhow::Error) -> Self {
        JobError::ExecutionFailed(e.to_string())
    }
}

/// Trait for background maintenance jobs.
///
/// Jobs are executed synchronously in a blocking context. Long-running
/// work should check `ctx.is_cancelled()` and return
/// `JobError::Cancelled` when it is set.
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    fn schedule(&self) -> JobSchedule;

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}
