//! Data models for the import queue.
//!
//! Defines queue items, statuses, priorities, failures and the reports
//! returned by administrative operations.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Status of an import queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed, // terminal
    Failed,    // terminal until an explicit retry
    Retrying,
    Paused,
}

impl QueueStatus {
    /// Returns true if this is a terminal state (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }

    /// Returns true while a worker or an explicit retry owns the item.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, QueueStatus::Processing | QueueStatus::Retrying)
    }

    /// Returns true if an explicit retry may re-open an item in this state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueStatus::Failed | QueueStatus::Completed | QueueStatus::Pending
        )
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Retrying => "retrying",
            QueueStatus::Paused => "paused",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "completed" => Some(QueueStatus::Completed),
            "failed" => Some(QueueStatus::Failed),
            "retrying" => Some(QueueStatus::Retrying),
            "paused" => Some(QueueStatus::Paused),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Priority level for queue items.
///
/// Ordering is explicit: `High > Normal > Low`. The stored integer is the
/// rank, so `ORDER BY priority DESC` yields the claim order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    Low,
    #[default]
    Normal,
    High,
}

impl QueuePriority {
    pub fn rank(&self) -> i32 {
        match self {
            QueuePriority::Low => 0,
            QueuePriority::Normal => 1,
            QueuePriority::High => 2,
        }
    }

    pub fn from_rank(value: i32) -> Option<Self> {
        match value {
            0 => Some(QueuePriority::Low),
            1 => Some(QueuePriority::Normal),
            2 => Some(QueuePriority::High),
            _ => None,
        }
    }
}

impl Ord for QueuePriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for QueuePriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Classification of a failed import attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportErrorKind {
    Transient, // provider/network trouble - retry
    Permanent, // malformed NZB, content missing upstream - NO retry
}

impl ImportErrorKind {
    /// Returns true if this kind of failure should consume a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ImportErrorKind::Transient)
    }
}

/// Typed failure returned by an import work unit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ImportFailure {
    pub kind: ImportErrorKind,
    pub message: String,
}

impl ImportFailure {
    pub fn new(kind: ImportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ImportErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ImportErrorKind::Permanent, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// One unit of import work tracked from ingestion to completion/failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    /// Store-assigned identifier
    pub id: i64,
    /// Location of the NZB file
    pub source_path: String,
    pub category: Option<String>,
    /// Groups items added together
    pub batch_id: Option<String>,
    pub priority: QueuePriority,
    pub status: QueueStatus,
    /// Number of failed attempts so far
    pub retry_count: i32,
    pub max_retries: i32,
    /// When the item was added to the queue (Unix timestamp)
    pub created_at: i64,
    pub updated_at: i64,
    /// Set on the first claim
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Earliest time an automatic retry may be claimed
    pub next_attempt_at: Option<i64>,
    /// Operator-friendly error message
    pub error_message: Option<String>,
    pub storage_path: Option<String>,
    pub file_size: Option<i64>,
}

/// Parameters for a new queue item. The store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    pub source_path: String,
    pub category: Option<String>,
    pub batch_id: Option<String>,
    pub priority: QueuePriority,
    pub max_retries: i32,
}

impl NewQueueItem {
    pub fn new(source_path: impl Into<String>, priority: QueuePriority, max_retries: i32) -> Self {
        Self {
            source_path: source_path.into(),
            category: None,
            batch_id: None,
            priority,
            max_retries,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }
}

/// Sort order for queue listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueSort {
    /// Claim order: priority, then insertion order
    #[default]
    Priority,
    Newest,
    Oldest,
}

impl QueueSort {
    pub(crate) fn order_by(&self) -> &'static str {
        match self {
            QueueSort::Priority => "priority DESC, created_at ASC, id ASC",
            QueueSort::Newest => "created_at DESC, id DESC",
            QueueSort::Oldest => "created_at ASC, id ASC",
        }
    }
}

/// Filter, pagination and sort for `list_items`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueQuery {
    pub status: Option<QueueStatus>,
    pub category: Option<String>,
    pub batch_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub sort: QueueSort,
}

impl Default for QueueQuery {
    fn default() -> Self {
        Self {
            status: None,
            category: None,
            batch_id: None,
            limit: 100,
            offset: 0,
            sort: QueueSort::default(),
        }
    }
}

impl QueueQuery {
    pub fn with_status(mut self, status: QueueStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn sorted(mut self, sort: QueueSort) -> Self {
        self.sort = sort;
        self
    }
}

/// Result of an atomic delete attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemDeletion {
    Deleted,
    NotFound,
    /// The item exists but may not be deleted in its current status
    Rejected(QueueStatus),
}

/// Outcome of a single cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The running work unit was signalled
    Cancelled,
    /// The item exists but was not processing; nothing to do
    NotProcessing(QueueStatus),
    /// The item is processing but no worker of this process is running it:
    /// just claimed, or held by another process. Stale-claim recovery
    /// releases it if it is abandoned.
    NotOwned,
}

/// Per-id outcome of a bulk operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BulkOutcome {
    Succeeded,
    NotFound,
    Rejected { status: QueueStatus },
    Error { message: String },
}

/// Aggregate counts for a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub requested: usize,
    pub succeeded: usize,
    pub rejected: usize,
    pub not_found: usize,
    pub errors: usize,
}

/// Per-id outcomes plus aggregate counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkReport {
    pub outcomes: BTreeMap<i64, BulkOutcome>,
    pub summary: BulkSummary,
}

impl BulkReport {
    pub fn record(&mut self, id: i64, outcome: BulkOutcome) {
        self.outcomes.insert(id, outcome);
        self.summary = BulkSummary {
            requested: self.outcomes.len(),
            succeeded: self.ids_where(|o| matches!(o, BulkOutcome::Succeeded)).len(),
            rejected: self
                .ids_where(|o| matches!(o, BulkOutcome::Rejected { .. }))
                .len(),
            not_found: self.ids_where(|o| matches!(o, BulkOutcome::NotFound)).len(),
            errors: self
                .ids_where(|o| matches!(o, BulkOutcome::Error { .. }))
                .len(),
        };
    }

    pub fn succeeded(&self) -> Vec<i64> {
        self.ids_where(|o| matches!(o, BulkOutcome::Succeeded))
    }

    pub fn rejected(&self) -> Vec<i64> {
        self.ids_where(|o| matches!(o, BulkOutcome::Rejected { .. }))
    }

    pub fn not_found(&self) -> Vec<i64> {
        self.ids_where(|o| matches!(o, BulkOutcome::NotFound))
    }

    fn ids_where(&self, predicate: impl Fn(&BulkOutcome) -> bool) -> Vec<i64> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Number of queue items per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub retrying: i64,
    pub paused: i64,
}

impl QueueStats {
    pub(crate) fn add(&mut self, status: QueueStatus, count: i64) {
        match status {
            QueueStatus::Pending => self.pending += count,
            QueueStatus::Processing => self.processing += count,
            QueueStatus::Completed => self.completed += count,
            QueueStatus::Failed => self.failed += count,
            QueueStatus::Retrying => self.retrying += count,
            QueueStatus::Paused => self.paused += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed + self.retrying + self.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_status_is_terminal() {
        assert!(!QueueStatus::Pending.is_terminal());
        assert!(!QueueStatus::Processing.is_terminal());
        assert!(!QueueStatus::Retrying.is_terminal());
        assert!(!QueueStatus::Paused.is_terminal());
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());
    }

    #[test]
    fn test_queue_status_retry_eligibility() {
        assert!(QueueStatus::Failed.is_retryable());
        assert!(QueueStatus::Completed.is_retryable());
        assert!(QueueStatus::Pending.is_retryable());
        assert!(!QueueStatus::Processing.is_retryable());
        assert!(!QueueStatus::Paused.is_retryable());
    }

    #[test]
    fn test_queue_status_db_conversion() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Failed,
            QueueStatus::Retrying,
            QueueStatus::Paused,
        ] {
            assert_eq!(QueueStatus::from_db_str(status.as_db_str()), Some(status));
        }
        assert_eq!(QueueStatus::from_db_str("IN_PROGRESS"), None);
    }

    #[test]
    fn test_queue_priority_total_order() {
        assert!(QueuePriority::High > QueuePriority::Normal);
        assert!(QueuePriority::Normal > QueuePriority::Low);

        let mut priorities = vec![
            QueuePriority::Normal,
            QueuePriority::Low,
            QueuePriority::High,
        ];
        priorities.sort_by(|a, b| b.cmp(a));
        assert_eq!(
            priorities,
            vec![QueuePriority::High, QueuePriority::Normal, QueuePriority::Low]
        );
    }

    #[test]
    fn test_queue_priority_rank_conversion() {
        assert_eq!(QueuePriority::from_rank(0), Some(QueuePriority::Low));
        assert_eq!(QueuePriority::from_rank(2), Some(QueuePriority::High));
        assert_eq!(QueuePriority::from_rank(3), None);
        assert_eq!(QueuePriority::default(), QueuePriority::Normal);
    }

    #[test]
    fn test_import_failure_kinds() {
        assert!(ImportFailure::transient("connection reset").is_retryable());
        assert!(!ImportFailure::permanent("malformed nzb").is_retryable());
        assert_eq!(
            ImportFailure::transient("boom").to_string(),
            "boom".to_string()
        );
    }

    #[test]
    fn test_queue_status_serialization() {
        let json = serde_json::to_string(&QueueStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let priority = serde_json::to_string(&QueuePriority::High).unwrap();
        assert_eq!(priority, "\"high\"");
    }

    #[test]
    fn test_bulk_report_counts() {
        let mut report = BulkReport::default();
        report.record(1, BulkOutcome::Succeeded);
        report.record(2, BulkOutcome::Rejected {
            status: QueueStatus::Processing,
        });
        report.record(3, BulkOutcome::Succeeded);
        report.record(4, BulkOutcome::NotFound);

        assert_eq!(report.succeeded(), vec![1, 3]);
        assert_eq!(report.rejected(), vec![2]);
        assert_eq!(report.not_found(), vec![4]);
        assert_eq!(
            report.summary,
            BulkSummary {
                requested: 4,
                succeeded: 2,
                rejected: 1,
                not_found: 1,
                errors: 0,
            }
        );
    }

    #[test]
    fn test_bulk_outcome_serialization() {
        let json = serde_json::to_value(BulkOutcome::Rejected {
            status: QueueStatus::Processing,
        })
        .unwrap();
        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["status"], "processing");
    }

    #[test]
    fn test_queue_query_builders() {
        let query = QueueQuery::default()
            .with_status(QueueStatus::Failed)
            .with_category("tv")
            .page(10, 20)
            .sorted(QueueSort::Newest);

        assert_eq!(query.status, Some(QueueStatus::Failed));
        assert_eq!(query.category.as_deref(), Some("tv"));
        assert_eq!(query.limit, 10);
        assert_eq!(query.offset, 20);
        assert_eq!(query.sort.order_by(), "created_at DESC, id DESC");
    }
}
