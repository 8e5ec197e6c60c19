//! NZB Import Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod health;
pub mod import_queue;
pub mod maintenance;
pub mod progress;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use health::{HealthWorker, SqliteHealthStore};
pub use import_queue::{ImportScheduler, QueueAdmin, SqliteQueueStore};
pub use progress::ProgressBroadcaster;
