//! Background maintenance: periodic cleanup and recovery jobs executed by a
//! small interval runner.

mod context;
mod job;
pub mod jobs;
mod runner;

pub use context::JobContext;
pub use job::{BackgroundJob, JobError, JobSchedule};
pub use runner::JobRunner;
