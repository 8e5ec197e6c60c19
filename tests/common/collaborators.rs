//! Scripted stand-ins for the import work unit, the file verifier and the
//! completion listener.

use async_trait::async_trait;
use nzb_import_server::health::{HealthRecord, VerificationVerdict};
use nzb_import_server::import_queue::{
    CompletionListener, ImportContext, ImportFailure, ImportOutcome, ImportWorkUnit, QueueItem,
};
use nzb_import_server::progress::ImportPhase;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What one import attempt of a source does.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(ImportFailure),
    /// Block until the item is cancelled
    Hang,
}

/// Work unit driven by per-source scripts. Sources without a script left
/// succeed. Every attempt is logged in claim order.
#[derive(Default)]
pub struct ScriptedImporter {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedImporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue scripts for the next attempts of `source_path`.
    pub fn script(&self, source_path: &str, scripts: impl IntoIterator<Item = Script>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(source_path.to_string())
            .or_default()
            .extend(scripts);
    }

    /// Every attempt of `source_path` fails with `failure`.
    pub fn always_fail(&self, source_path: &str, failure: ImportFailure) {
        self.script(source_path, std::iter::repeat(Script::Fail(failure)).take(64));
    }

    pub fn attempt_log(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempts(&self, source_path: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|s| *s == source_path)
            .count()
    }

    /// Library path an import of `source_path` materializes.
    pub fn storage_path_for(source_path: &str) -> String {
        let stem = std::path::Path::new(source_path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        format!("/library/{}.mkv", stem)
    }
}

#[async_trait]
impl ImportWorkUnit for ScriptedImporter {
    async fn import(
        &self,
        item: &QueueItem,
        ctx: &ImportContext,
    ) -> Result<ImportOutcome, ImportFailure> {
        self.attempts.lock().unwrap().push(item.source_path.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&item.source_path)
            .and_then(|s| s.pop_front())
            .unwrap_or(Script::Succeed);

        match script {
            Script::Succeed => {
                ctx.report(ImportPhase::Downloading, 512, Some(1024));
                let _permit = ctx.post_processing().await?;
                ctx.report(ImportPhase::Finalizing, 1024, Some(1024));
                Ok(ImportOutcome {
                    storage_path: Self::storage_path_for(&item.source_path),
                    file_size: 1024,
                })
            }
            Script::Fail(failure) => Err(failure),
            Script::Hang => {
                ctx.cancellation_token().cancelled().await;
                Err(ImportFailure::transient("interrupted"))
            }
        }
    }
}

/// Verifier returning a settable verdict per path, healthy by default.
#[derive(Default)]
pub struct ScriptedVerifier {
    verdicts: Mutex<HashMap<String, VerificationVerdict>>,
    checks: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, file_path: &str, verdict: VerificationVerdict) {
        self.verdicts
            .lock()
            .unwrap()
            .insert(file_path.to_string(), verdict);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl nzb_import_server::health::FileVerifier for ScriptedVerifier {
    async fn verify(&self, record: &HealthRecord) -> VerificationVerdict {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.verdicts
            .lock()
            .unwrap()
            .get(&record.file_path)
            .cloned()
            .unwrap_or(VerificationVerdict::Healthy)
    }
}

/// Wraps the real listener and counts the completions and terminal failures
/// it has fully handled.
pub struct CountingListener {
    inner: Option<Arc<dyn CompletionListener>>,
    handled: AtomicUsize,
    failures: AtomicUsize,
}

impl CountingListener {
    pub fn new(inner: Option<Arc<dyn CompletionListener>>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            handled: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        })
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl CompletionListener for CountingListener {
    fn import_completed(&self, item: &QueueItem, outcome: &ImportOutcome) -> anyhow::Result<()> {
        let result = match &self.inner {
            Some(inner) => inner.import_completed(item, outcome),
            None => Ok(()),
        };
        self.handled.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn import_failed(&self, item: &QueueItem, error_message: &str) -> anyhow::Result<()> {
        let result = match &self.inner {
            Some(inner) => inner.import_failed(item, error_message),
            None => Ok(()),
        };
        self.failures.fetch_add(1, Ordering::SeqCst);
        result
    }
}
