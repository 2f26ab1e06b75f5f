//! Background processing worker
//!
//! Runs metadata extraction, sanitization and hashing on the blocking pool
//! and reports back only through `WorkerMessage`s tagged with the job id.
//! The orchestrator never touches the worker's state directly.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::hashing::{ContentHasher, HashError};
use crate::manifest::ProcessingManifest;
use crate::metadata::MetadataExtractor;
use crate::pipeline::{Progress, ProgressStep};
use crate::sanitize::ManifestSanitizer;
use crate::source::SubmissionFile;

/// Minimum percentage step between hashing progress reports
const PROGRESS_STEP_PERCENT: u64 = 5;

// ============================================================================
// Job identity and cancellation
// ============================================================================

/// Cooperative cancellation flag shared with a running job
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Identity of one background run; messages from other ids are stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Progress(Progress),
    Complete(ProcessingManifest),
    Failed(String),
}

/// Event plus the id of the job that produced it
#[derive(Debug, Clone)]
pub struct WorkerMessage {
    pub job: JobId,
    pub event: WorkerEvent,
}

// ============================================================================
// Worker
// ============================================================================

/// The CPU-bound stages of one processing run
#[derive(Debug, Clone)]
pub struct ProcessingWorker {
    extractor: MetadataExtractor,
    sanitizer: ManifestSanitizer,
    hasher: ContentHasher,
}

impl ProcessingWorker {
    pub fn new(
        extractor: MetadataExtractor,
        sanitizer: ManifestSanitizer,
        hasher: ContentHasher,
    ) -> Self {
        Self {
            extractor,
            sanitizer,
            hasher,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            MetadataExtractor::from_config(&config.metadata),
            ManifestSanitizer::from_config(&config.sanitizer),
            ContentHasher::from_config(&config.hashing),
        )
    }

    /// Run all stages synchronously, reporting progress in declared order
    pub fn run(
        &self,
        file: &SubmissionFile,
        cancel: &CancelFlag,
        mut report: impl FnMut(Progress),
    ) -> Result<ProcessingManifest, HashError> {
        report(Progress::new(ProgressStep::Starting, "Reading file..."));
        if cancel.is_cancelled() {
            return Err(HashError::Cancelled);
        }

        report(Progress::new(ProgressStep::Metadata, "Extracting metadata..."));
        let raw = self.extractor.extract(file);
        let metadata = self.sanitizer.sanitize(&raw);
        if cancel.is_cancelled() {
            return Err(HashError::Cancelled);
        }

        report(Progress::new(ProgressStep::Hashing, "Computing SHA-256..."));
        let total = file.size();
        let mut last_percent = 0u64;
        let hash = self.hasher.hash_file(file, cancel, |done| {
            if total == 0 {
                return;
            }
            let percent = (done.min(total) * 100) / total;
            if percent >= last_percent + PROGRESS_STEP_PERCENT && percent < 100 {
                last_percent = percent;
                report(Progress::new(
                    ProgressStep::Hashing,
                    format!("Computing SHA-256... {}%", percent),
                ));
            }
        })?;

        Ok(ProcessingManifest::new(hash, metadata, total, file.name()))
    }

    /// Start a run on the blocking pool; results arrive on `tx`
    pub fn spawn(
        &self,
        job: JobId,
        file: SubmissionFile,
        cancel: CancelFlag,
        tx: UnboundedSender<WorkerMessage>,
    ) -> JoinHandle<()> {
        let worker = self.clone();
        let progress_tx = tx.clone();

        let blocking = tokio::task::spawn_blocking(move || {
            tracing::debug!(job_id = %job, file_name = %file.name(), "Worker started");
            let result = worker.run(&file, &cancel, |progress| {
                let _ = progress_tx.send(WorkerMessage {
                    job,
                    event: WorkerEvent::Progress(progress),
                });
            });

            let event = match result {
                Ok(manifest) => WorkerEvent::Complete(manifest),
                Err(HashError::Cancelled) => {
                    tracing::debug!(job_id = %job, "Worker cancelled");
                    return;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job, error = %e, "Worker failed");
                    WorkerEvent::Failed(format!("Processing failed: {}", e))
                }
            };
            let _ = progress_tx.send(WorkerMessage { job, event });
        });

        tokio::spawn(async move {
            if let Err(e) = blocking.await {
                tracing::error!(job_id = %job, error = %e, "Worker task join error");
                let _ = tx.send(WorkerMessage {
                    job,
                    event: WorkerEvent::Failed(format!("Background worker failed: {}", e)),
                });
            }
        })
    }
}

impl Default for ProcessingWorker {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}
