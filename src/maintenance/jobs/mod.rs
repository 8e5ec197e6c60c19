//! Maintenance job implementations.

pub mod health_cleanup;
pub mod queue_cleanup;
pub mod stale_checking_recovery;

pub use health_cleanup::HealthCleanupJob;
pub use queue_cleanup::QueueCleanupJob;
pub use stale_checking_recovery::StaleCheckingRecoveryJob;
