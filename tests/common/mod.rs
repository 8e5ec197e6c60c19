//! Common test infrastructure
//!
//! Builds a complete import pipeline (queue store, scheduler, admin, health
//! store, health worker, progress broadcaster) over temporary SQLite
//! databases, with scripted collaborators standing in for the real work
//! unit and verifier.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestPipeline;
//! use nzb_import_server::import_queue::QueueStatus;
//!
//! #[tokio::test]
//! async fn test_import() {
//!     let pipeline = TestPipeline::start().await;
//!     let item = pipeline.enqueue("/nzb/movie.nzb");
//!     pipeline.wait_for_status(item.id, QueueStatus::Completed).await;
//!     pipeline.shutdown().await;
//! }
//! ```

#![allow(dead_code)]

mod collaborators;
mod pipeline;

pub use collaborators::{CountingListener, Script, ScriptedImporter, ScriptedVerifier};
pub use pipeline::{fast_queue_settings, wait_until, TestPipeline};
