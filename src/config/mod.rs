mod file_config;

pub use file_config::{FileConfig, HealthCheckConfig, ImportQueueConfig, ProgressConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub completed_dir: Option<PathBuf>,
    pub import_workers: Option<usize>,
    pub disable_health_check: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub completed_dir: PathBuf,

    // Feature configs (with defaults)
    pub import_queue: ImportQueueSettings,
    pub health_check: HealthCheckSettings,
    pub progress: ProgressSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "db_dir must be given as the first argument or in the config file"
                )
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let completed_dir = file
            .completed_dir
            .map(PathBuf::from)
            .or_else(|| cli.completed_dir.clone())
            .unwrap_or_else(|| db_dir.join("completed"));

        let defaults = ImportQueueSettings::default();
        let queue_file = file.import_queue.unwrap_or_default();
        let import_queue = ImportQueueSettings {
            workers: queue_file
                .workers
                .or(cli.import_workers)
                .unwrap_or(defaults.workers),
            post_processing_workers: queue_file
                .post_processing_workers
                .unwrap_or(defaults.post_processing_workers),
            poll_interval_ms: queue_file
                .poll_interval_ms
                .unwrap_or(defaults.poll_interval_ms),
            max_retries: queue_file.max_retries.unwrap_or(defaults.max_retries),
            initial_backoff_secs: queue_file
                .initial_backoff_secs
                .unwrap_or(defaults.initial_backoff_secs),
            max_backoff_secs: queue_file
                .max_backoff_secs
                .unwrap_or(defaults.max_backoff_secs),
            backoff_multiplier: queue_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            stale_claim_threshold_secs: queue_file
                .stale_claim_threshold_secs
                .unwrap_or(defaults.stale_claim_threshold_secs),
            stale_check_interval_secs: queue_file
                .stale_check_interval_secs
                .unwrap_or(defaults.stale_check_interval_secs),
            completed_retention_days: queue_file
                .completed_retention_days
                .unwrap_or(defaults.completed_retention_days),
            shutdown_timeout_secs: queue_file
                .shutdown_timeout_secs
                .unwrap_or(defaults.shutdown_timeout_secs),
        };
        if import_queue.workers == 0 {
            bail!("import_queue.workers must be at least 1");
        }
        if import_queue.post_processing_workers == 0 {
            bail!("import_queue.post_processing_workers must be at least 1");
        }

        let defaults = HealthCheckSettings::default();
        let health_file = file.health_check.unwrap_or_default();
        let health_check = HealthCheckSettings {
            enabled: health_file.enabled.unwrap_or(!cli.disable_health_check),
            check_interval_secs: health_file
                .check_interval_secs
                .unwrap_or(defaults.check_interval_secs),
            batch_size: health_file.batch_size.unwrap_or(defaults.batch_size),
            max_concurrent_checks: health_file
                .max_concurrent_checks
                .unwrap_or(defaults.max_concurrent_checks),
            cycle_timeout_secs: health_file
                .cycle_timeout_secs
                .unwrap_or(defaults.cycle_timeout_secs),
            max_retries: health_file.max_retries.unwrap_or(defaults.max_retries),
            retry_backoff_secs: health_file
                .retry_backoff_secs
                .unwrap_or(defaults.retry_backoff_secs),
            healthy_recheck_interval_secs: health_file
                .healthy_recheck_interval_secs
                .unwrap_or(defaults.healthy_recheck_interval_secs),
            max_repair_retries: health_file
                .max_repair_retries
                .unwrap_or(defaults.max_repair_retries),
            checking_timeout_secs: health_file
                .checking_timeout_secs
                .unwrap_or(defaults.checking_timeout_secs),
            record_retention_days: health_file
                .record_retention_days
                .unwrap_or(defaults.record_retention_days),
        };

        let defaults = ProgressSettings::default();
        let progress_file = file.progress.unwrap_or_default();
        let progress = ProgressSettings {
            subscriber_buffer: progress_file
                .subscriber_buffer
                .unwrap_or(defaults.subscriber_buffer)
                .max(1),
            heartbeat_interval_secs: progress_file
                .heartbeat_interval_secs
                .unwrap_or(defaults.heartbeat_interval_secs),
        };

        Ok(Self {
            db_dir,
            completed_dir,
            import_queue,
            health_check,
            progress,
        })
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.db_dir.join("import_queue.db")
    }

    pub fn health_db_path(&self) -> PathBuf {
        self.db_dir.join("health.db")
    }
}

#[derive(Debug, Clone)]
pub struct ImportQueueSettings {
    pub workers: usize,
    pub post_processing_workers: usize,
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
    /// `processing` items whose claim is older than this are requeued.
    pub stale_claim_threshold_secs: u64,
    pub stale_check_interval_secs: u64,
    pub completed_retention_days: u64,
    pub shutdown_timeout_secs: u64,
}

impl ImportQueueSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ImportQueueSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            post_processing_workers: 1,
            poll_interval_ms: 1000,
            max_retries: 3,
            initial_backoff_secs: 30,
            max_backoff_secs: 3600,
            backoff_multiplier: 2.0,
            stale_claim_threshold_secs: 3600,
            stale_check_interval_secs: 300,
            completed_retention_days: 7,
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckSettings {
    pub enabled: bool,
    pub check_interval_secs: u64,
    /// Maximum records claimed per cycle.
    pub batch_size: usize,
    pub max_concurrent_checks: usize,
    /// Upper bound for a whole verification cycle.
    pub cycle_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub healthy_recheck_interval_secs: u64,
    pub max_repair_retries: u32,
    /// `checking` records older than this are considered abandoned.
    pub checking_timeout_secs: u64,
    pub record_retention_days: u64,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 60,
            batch_size: 10,
            max_concurrent_checks: 4,
            cycle_timeout_secs: 300,
            max_retries: 2,
            retry_backoff_secs: 300,
            healthy_recheck_interval_secs: 7 * 24 * 60 * 60,
            max_repair_retries: 3,
            checking_timeout_secs: 3600,
            record_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressSettings {
    pub subscriber_buffer: usize,
    pub heartbeat_interval_secs: u64,
}

impl ProgressSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            heartbeat_interval_secs: 30,
        }
    }
}
