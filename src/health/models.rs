//! Health record models.

use serde::{Deserialize, Serialize};

use crate::import_queue::QueuePriority;

/// Verification status of a materialized file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Pending,
    Checking,
    Healthy,
    Corrupted,
    RepairTriggered,
}

impl HealthStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            HealthStatus::Pending => "pending",
            HealthStatus::Checking => "checking",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Corrupted => "corrupted",
            HealthStatus::RepairTriggered => "repair_triggered",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(HealthStatus::Pending),
            "checking" => Some(HealthStatus::Checking),
            "healthy" => Some(HealthStatus::Healthy),
            "corrupted" => Some(HealthStatus::Corrupted),
            "repair_triggered" => Some(HealthStatus::RepairTriggered),
            _ => None,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Verification state of one materialized file, keyed by path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub file_path: String,
    pub library_path: Option<String>,
    /// NZB the file was imported from; required for repairs
    pub source_nzb_path: Option<String>,
    pub status: HealthStatus,
    pub priority: QueuePriority,
    /// Consecutive failed verification attempts
    pub retry_count: i32,
    pub max_retries: i32,
    pub repair_retry_count: i32,
    pub max_repair_retries: i32,
    pub scheduled_check_at: i64,
    pub last_checked_at: Option<i64>,
    pub error_details: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Request to (re)register a file for verification.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHealthCheck {
    pub file_path: String,
    pub library_path: Option<String>,
    pub source_nzb_path: Option<String>,
    pub priority: QueuePriority,
    pub max_retries: i32,
    pub max_repair_retries: i32,
}

impl NewHealthCheck {
    pub fn new(
        file_path: impl Into<String>,
        priority: QueuePriority,
        max_retries: i32,
        max_repair_retries: i32,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            library_path: None,
            source_nzb_path: None,
            priority,
            max_retries,
            max_repair_retries,
        }
    }

    pub fn with_source(mut self, source_nzb_path: impl Into<String>) -> Self {
        self.source_nzb_path = Some(source_nzb_path.into());
        self
    }

    pub fn with_library_path(mut self, library_path: impl Into<String>) -> Self {
        self.library_path = Some(library_path.into());
        self
    }
}

/// What a verifier concluded about one file.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationVerdict {
    Healthy,
    /// Some content is present but parts are missing or truncated.
    Partial { details: String },
    /// The content could not be reached at all.
    Unavailable { reason: String },
}

/// Number of health records per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthStats {
    pub pending: i64,
    pub checking: i64,
    pub healthy: i64,
    pub corrupted: i64,
    pub repair_triggered: i64,
}

impl HealthStats {
    pub(crate) fn add(&mut self, status: HealthStatus, count: i64) {
        match status {
            HealthStatus::Pending => self.pending += count,
            HealthStatus::Checking => self.checking += count,
            HealthStatus::Healthy => self.healthy += count,
            HealthStatus::Corrupted => self.corrupted += count,
            HealthStatus::RepairTriggered => self.repair_triggered += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.checking + self.healthy + self.corrupted + self.repair_triggered
    }
}
