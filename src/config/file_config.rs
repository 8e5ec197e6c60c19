use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub completed_dir: Option<String>,

    // Feature configs
    pub import_queue: Option<ImportQueueConfig>,
    pub health_check: Option<HealthCheckConfig>,
    pub progress: Option<ProgressConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ImportQueueConfig {
    pub workers: Option<usize>,
    pub post_processing_workers: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub stale_claim_threshold_secs: Option<u64>,
    pub stale_check_interval_secs: Option<u64>,
    pub completed_retention_days: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: Option<bool>,
    pub check_interval_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub max_concurrent_checks: Option<usize>,
    pub cycle_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_secs: Option<u64>,
    pub healthy_recheck_interval_secs: Option<u64>,
    pub max_repair_retries: Option<u32>,
    pub checking_timeout_secs: Option<u64>,
    pub record_retention_days: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ProgressConfig {
    pub subscriber_buffer: Option<usize>,
    pub heartbeat_interval_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
