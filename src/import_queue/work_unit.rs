//! The import work unit executed by scheduler workers.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::models::{ImportFailure, QueueItem, QueueStatus};
use crate::progress::{ImportPhase, ProgressBroadcaster, ProgressEvent};

/// What a successful import materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub storage_path: String,
    pub file_size: i64,
}

/// Handle given to a work unit for one attempt on one item.
#[derive(Clone)]
pub struct ImportContext {
    item_id: i64,
    cancel: CancellationToken,
    progress: ProgressBroadcaster,
    post_processing: Arc<Semaphore>,
}

impl ImportContext {
    pub fn new(
        item_id: i64,
        cancel: CancellationToken,
        progress: ProgressBroadcaster,
        post_processing: Arc<Semaphore>,
    ) -> Self {
        Self {
            item_id,
            cancel,
            progress,
            post_processing,
        }
    }

    pub fn item_id(&self) -> i64 {
        self.item_id
    }

    /// Token cancelled when the item is cancelled or the scheduler stops.
    /// Long-running I/O should select on it.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Publish progress for this item.
    pub fn report(&self, phase: ImportPhase, bytes_done: u64, bytes_total: Option<u64>) {
        self.progress.publish(
            ProgressEvent::new(self.item_id, QueueStatus::Processing)
                .with_bytes(bytes_done, bytes_total)
                .with_phase(phase),
        );
    }

    /// Wait for a post-processing slot. Hold the permit for the duration of
    /// the post-processing stage.
    pub async fn post_processing(&self) -> Result<OwnedSemaphorePermit, ImportFailure> {
        let permit = self
            .post_processing
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ImportFailure::transient("post-processing pool is shut down"))?;
        self.progress.publish(
            ProgressEvent::new(self.item_id, QueueStatus::Processing)
                .with_phase(ImportPhase::PostProcessing),
        );
        Ok(permit)
    }
}

/// One import attempt for a queue item.
///
/// Implementations return a typed failure instead of panicking. The future
/// may be dropped at any await point when the item is cancelled.
#[async_trait]
pub trait ImportWorkUnit: Send + Sync {
    async fn import(
        &self,
        item: &QueueItem,
        ctx: &ImportContext,
    ) -> Result<ImportOutcome, ImportFailure>;
}

/// Work unit that validates an NZB and stages it into the completed
/// directory, under a subdirectory named after the item's category.
pub struct StagingImporter {
    completed_dir: PathBuf,
}

impl StagingImporter {
    pub fn new(completed_dir: impl Into<PathBuf>) -> Self {
        Self {
            completed_dir: completed_dir.into(),
        }
    }

    fn target_dir(&self, item: &QueueItem) -> PathBuf {
        let category = item
            .category
            .as_deref()
            .filter(|c| !c.is_empty() && !c.contains(['/', '\\']) && *c != "..")
            .unwrap_or("default");
        self.completed_dir.join(category)
    }
}

fn validate_nzb(data: &[u8]) -> Result<usize, ImportFailure> {
    let text = String::from_utf8_lossy(data);
    if !text.contains("<nzb") {
        return Err(ImportFailure::permanent(
            "malformed NZB: missing <nzb> root element",
        ));
    }
    let segments = text.matches("<segment ").count() + text.matches("<segment>").count();
    if segments == 0 {
        return Err(ImportFailure::permanent("NZB contains no segments"));
    }
    Ok(segments)
}

fn write_staged(target_dir: &Path, file_name: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(target_dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(target_dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    let target = target_dir.join(file_name);
    tmp.persist(&target).map_err(|e| e.error)?;
    Ok(target)
}

#[async_trait]
impl ImportWorkUnit for StagingImporter {
    async fn import(
        &self,
        item: &QueueItem,
        ctx: &ImportContext,
    ) -> Result<ImportOutcome, ImportFailure> {
        let source = PathBuf::from(&item.source_path);
        let data = tokio::fs::read(&source).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ImportFailure::permanent(format!("NZB file not found: {}", source.display()))
            }
            _ => ImportFailure::transient(format!(
                "Failed to read {}: {}",
                source.display(),
                e
            )),
        })?;

        let segments = validate_nzb(&data)?;
        let total = data.len() as u64;
        ctx.report(ImportPhase::Downloading, total, Some(total));
        debug!("Item {} references {} segments", item.id, segments);

        let _permit = ctx.post_processing().await?;

        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("item-{}.nzb", item.id));
        let target_dir = self.target_dir(item);

        let target = tokio::task::spawn_blocking(move || write_staged(&target_dir, &file_name, &data))
            .await
            .map_err(|e| ImportFailure::transient(format!("Staging task failed: {}", e)))?
            .map_err(|e| ImportFailure::transient(format!("Failed to stage NZB: {}", e)))?;

        ctx.report(ImportPhase::Finalizing, total, Some(total));

        Ok(ImportOutcome {
            storage_path: target.to_string_lossy().into_owned(),
            file_size: total as i64,
        })
    }
}
