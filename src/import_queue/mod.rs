//! Durable NZB import queue.
//!
//! Items are claimed by a fixed pool of scheduler workers in priority order,
//! imported by an [`ImportWorkUnit`] and moved to `completed` or `failed`,
//! with automatic retries and backoff for transient failures.

pub mod admin;
pub mod error_messages;
mod models;
mod retry_policy;
mod schema;
pub mod scheduler;
mod store;
pub mod work_unit;

pub use admin::{QueueAdmin, QueueError};
pub use models::*;
pub use retry_policy::RetryPolicy;
pub use schema::IMPORT_QUEUE_VERSIONED_SCHEMAS;
pub use scheduler::{CompletionListener, ImportScheduler};
pub use store::{QueueStore, SqliteQueueStore};
pub use work_unit::{ImportContext, ImportOutcome, ImportWorkUnit, StagingImporter};
