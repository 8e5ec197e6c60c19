//! End-to-end tests for health verification and repair
//!
//! Imports run through the real scheduler; verification verdicts come from
//! a scripted verifier and repairs go back through the import queue.

mod common;

use common::{fast_queue_settings, TestPipeline};
use nzb_import_server::import_queue::ImportFailure;
use nzb_import_server::config::HealthCheckSettings;
use nzb_import_server::health::{
    HealthRegistrar, HealthStatus, HealthStore, NewHealthCheck, VerificationVerdict,
};
use nzb_import_server::import_queue::{QueuePriority, QueueQuery, QueueStatus};
use std::sync::Arc;

fn health_settings() -> HealthCheckSettings {
    HealthCheckSettings {
        max_retries: 2,
        max_repair_retries: 2,
        retry_backoff_secs: 0,
        ..Default::default()
    }
}

async fn start() -> TestPipeline {
    TestPipeline::start_with(fast_queue_settings(), health_settings()).await
}

/// Import `source` and wait until its file is registered for verification.
async fn import(pipeline: &TestPipeline, source: &str, completions: usize) -> String {
    let item = pipeline.enqueue(source);
    pipeline.wait_for_status(item.id, QueueStatus::Completed).await;
    pipeline.wait_for_completions(completions).await;
    pipeline.item(item.id).storage_path.unwrap()
}

fn partial() -> VerificationVerdict {
    VerificationVerdict::Partial {
        details: "12 of 300 segments missing".to_string(),
    }
}

#[tokio::test]
async fn test_healthy_file_is_rescheduled() {
    let pipeline = start().await;
    let file = import(&pipeline, "/nzb/fine.nzb", 1).await;

    let report = pipeline.run_health_cycle().await;
    assert_eq!(report.claimed, 1);
    assert_eq!(report.healthy, 1);

    let record = pipeline.record(&file);
    assert_eq!(record.status, HealthStatus::Healthy);
    assert!(record.scheduled_check_at > chrono::Utc::now().timestamp() + 60);

    // Not due again until the healthy interval passes
    assert_eq!(pipeline.run_health_cycle().await.claimed, 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_repair_loop_terminates_at_max_repair_retries() {
    let pipeline = start().await;
    let file = import(&pipeline, "/nzb/show.nzb", 1).await;
    pipeline.verifier.set(&file, partial());

    for attempt in 1..=2 {
        let report = pipeline.run_health_cycle().await;
        assert_eq!(report.partial, 1);
        assert_eq!(report.repairs_triggered, 1);

        let record = pipeline.record(&file);
        assert_eq!(record.status, HealthStatus::RepairTriggered);
        assert_eq!(record.repair_retry_count, attempt);

        // The repair import finishes and sends the file back to verification
        pipeline.wait_for_completions(attempt as usize + 1).await;
        assert_eq!(pipeline.record(&file).status, HealthStatus::Pending);
    }

    let report = pipeline.run_health_cycle().await;
    assert_eq!(report.repairs_triggered, 0);
    assert_eq!(report.repairs_exhausted, 1);

    let record = pipeline.record(&file);
    assert_eq!(record.status, HealthStatus::Corrupted);
    assert_eq!(record.repair_retry_count, 2);
    assert!(record.error_details.unwrap().contains("segments missing"));

    // Corrupted records are not claimed again
    assert_eq!(pipeline.run_health_cycle().await.claimed, 0);

    // One queue item was reused for every repair, at elevated priority
    assert_eq!(pipeline.importer.attempts("/nzb/show.nzb"), 3);
    let items = pipeline.admin.list(&QueueQuery::default()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].priority, QueuePriority::High);
    assert_eq!(items[0].status, QueueStatus::Completed);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_failing_repair_imports_end_corrupted() {
    let queue_settings = fast_queue_settings();
    let pipeline = TestPipeline::start_with(queue_settings.clone(), health_settings()).await;
    let file = import(&pipeline, "/nzb/gone.nzb", 1).await;
    pipeline.verifier.set(&file, partial());
    // Every re-import hits missing articles
    pipeline
        .importer
        .always_fail("/nzb/gone.nzb", ImportFailure::transient("article is not found"));

    for attempt in 1..=2 {
        let report = pipeline.run_health_cycle().await;
        assert_eq!(report.repairs_triggered, 1);
        assert_eq!(pipeline.record(&file).repair_retry_count, attempt);

        // The failed repair sends the file back to verification
        pipeline.wait_for_failures(attempt as usize).await;
        let record = pipeline.record(&file);
        assert_eq!(record.status, HealthStatus::Pending);
        assert!(record
            .error_details
            .unwrap()
            .starts_with("repair import failed"));
    }

    let report = pipeline.run_health_cycle().await;
    assert_eq!(report.repairs_exhausted, 1);
    let record = pipeline.record(&file);
    assert_eq!(record.status, HealthStatus::Corrupted);
    assert_eq!(record.repair_retry_count, 2);

    let items = pipeline.admin.list(&QueueQuery::default()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, QueueStatus::Failed);
    assert_eq!(pipeline.importer.attempts("/nzb/gone.nzb"), 3);

    // Settled: nothing left to verify
    assert_eq!(pipeline.run_health_cycle().await.claimed, 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_file_is_retried_before_repair() {
    let pipeline = start().await;
    let file = import(&pipeline, "/nzb/flaky.nzb", 1).await;
    pipeline.verifier.set(
        &file,
        VerificationVerdict::Unavailable {
            reason: "provider timeout".to_string(),
        },
    );

    for attempt in 1..=2 {
        let report = pipeline.run_health_cycle().await;
        assert_eq!(report.rescheduled, 1);
        let record = pipeline.record(&file);
        assert_eq!(record.status, HealthStatus::Pending);
        assert_eq!(record.retry_count, attempt);
    }

    let report = pipeline.run_health_cycle().await;
    assert_eq!(report.corrupted, 1);
    assert_eq!(report.repairs_triggered, 1);

    // The re-import fixes the file
    pipeline.verifier.set(&file, VerificationVerdict::Healthy);
    pipeline.wait_for_completions(2).await;

    let report = pipeline.run_health_cycle().await;
    assert_eq!(report.healthy, 1);
    let record = pipeline.record(&file);
    assert_eq!(record.status, HealthStatus::Healthy);
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.repair_retry_count, 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_manual_check_injection_uses_priority() {
    let settings = HealthCheckSettings {
        batch_size: 1,
        ..health_settings()
    };
    let pipeline = TestPipeline::start_with(fast_queue_settings(), settings).await;

    for (path, priority) in [
        ("/library/low.mkv", QueuePriority::Low),
        ("/library/high.mkv", QueuePriority::High),
    ] {
        pipeline
            .health_store
            .add_file_to_health_check(&NewHealthCheck::new(path, priority, 2, 2))
            .unwrap();
    }

    assert_eq!(pipeline.run_health_cycle().await.healthy, 1);
    assert_eq!(
        pipeline.record("/library/high.mkv").status,
        HealthStatus::Healthy
    );
    assert_eq!(
        pipeline.record("/library/low.mkv").status,
        HealthStatus::Pending
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_manual_retry_reopens_exhausted_record() {
    let settings = HealthCheckSettings {
        max_repair_retries: 0,
        ..health_settings()
    };
    let pipeline = TestPipeline::start_with(fast_queue_settings(), settings.clone()).await;
    let file = import(&pipeline, "/nzb/broken.nzb", 1).await;
    pipeline.verifier.set(&file, partial());

    let report = pipeline.run_health_cycle().await;
    assert_eq!(report.repairs_exhausted, 1);
    assert_eq!(pipeline.record(&file).status, HealthStatus::Corrupted);

    let registrar = HealthRegistrar::new(Arc::clone(&pipeline.health_store), settings);
    assert!(registrar.retry_check(&file, true).unwrap());
    assert_eq!(pipeline.record(&file).status, HealthStatus::Pending);

    pipeline.verifier.set(&file, VerificationVerdict::Healthy);
    assert_eq!(pipeline.run_health_cycle().await.healthy, 1);

    // Unknown files are reported, not created
    assert!(!registrar.retry_check("/library/unknown.mkv", false).unwrap());

    pipeline.shutdown().await;
}
