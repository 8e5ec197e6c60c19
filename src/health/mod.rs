//! Library health verification and repair.
//!
//! Imported files are registered in a [`HealthStore`], periodically
//! re-verified by the [`HealthWorker`], and re-imported through the import
//! queue when they turn out to be corrupted.

mod models;
mod repair;
mod schema;
mod store;
mod verifier;
mod worker;

pub use models::{
    HealthRecord, HealthStats, HealthStatus, NewHealthCheck, VerificationVerdict,
};
pub use repair::{HealthRegistrar, QueueRepairTrigger, RepairTrigger};
pub use schema::HEALTH_VERSIONED_SCHEMAS;
pub use store::{HealthStore, SqliteHealthStore};
pub use verifier::{FileSystemVerifier, FileVerifier};
pub use worker::{CycleReport, HealthWorker};
