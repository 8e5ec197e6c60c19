//! File verification.

use async_trait::async_trait;

use super::models::{HealthRecord, VerificationVerdict};

/// Checks whether a materialized file is still retrievable.
#[async_trait]
pub trait FileVerifier: Send + Sync {
    async fn verify(&self, record: &HealthRecord) -> VerificationVerdict;
}

/// Verifier that checks the file is present on disk with a plausible size.
///
/// A missing path is reported as unavailable, so it goes through the
/// verification retry budget before being declared corrupted. A file that
/// exists but is smaller than `min_size` is partial.
pub struct FileSystemVerifier {
    min_size: u64,
}

impl FileSystemVerifier {
    pub fn new(min_size: u64) -> Self {
        Self { min_size }
    }
}

impl Default for FileSystemVerifier {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl FileVerifier for FileSystemVerifier {
    async fn verify(&self, record: &HealthRecord) -> VerificationVerdict {
        let metadata = match tokio::fs::metadata(&record.file_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return VerificationVerdict::Unavailable {
                    reason: format!("file not found: {}", record.file_path),
                }
            }
            Err(e) => {
                return VerificationVerdict::Unavailable {
                    reason: format!("cannot read {}: {}", record.file_path, e),
                }
            }
        };

        if !metadata.is_file() {
            return VerificationVerdict::Partial {
                details: format!("{} is not a regular file", record.file_path),
            };
        }
        if metadata.len() < self.min_size {
            return VerificationVerdict::Partial {
                details: format!(
                    "{} is truncated ({} bytes, expected at least {})",
                    record.file_path,
                    metadata.len(),
                    self.min_size
                ),
            };
        }

        VerificationVerdict::Healthy
    }
}
