//! Ingest State Machine
//!
//! Owns one selected file at a time and drives it through
//! `Idle -> Processing -> Uploading -> Success | Error`.
//!
//! CPU-bound stages run in a `ProcessingWorker` on the blocking pool; the
//! upload runs in its own task. Both report back over channels, and every
//! message carries the `JobId` of the run that produced it. Messages from any
//! other run are dropped, so a cancelled or superseded job can never move the
//! state of a newer one.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::inspect::{LayerCheckResult, LayerInspector};
use crate::manifest::ProcessingManifest;
use crate::source::SubmissionFile;
use crate::transport::{ServerVerification, SubmissionTransport, TransportError};
use crate::worker::{CancelFlag, JobId, ProcessingWorker, WorkerEvent, WorkerMessage};

// ============================================================================
// States and progress
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestState {
    Idle,
    Processing,
    Uploading,
    Success,
    Error,
}

impl IngestState {
    /// Forward transitions, plus the return to `Idle` on reselection or cancel
    pub fn can_transition_to(self, next: IngestState) -> bool {
        use IngestState::*;

        matches!(
            (self, next),
            (Idle, Processing)
                | (Processing, Uploading)
                | (Processing, Error)
                | (Uploading, Success)
                | (Uploading, Error)
                | (_, Idle)
        )
    }

    /// A processing/upload cycle is in flight
    pub fn is_busy(self) -> bool {
        matches!(self, IngestState::Processing | IngestState::Uploading)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStep {
    Idle,
    Starting,
    Metadata,
    Hashing,
    Uploading,
    Done,
    Error,
}

/// Step tag plus display message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub step: ProgressStep,
    pub message: String,
}

impl Progress {
    pub fn new(step: ProgressStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
        }
    }

    pub fn idle() -> Self {
        Self::new(ProgressStep::Idle, "")
    }
}

/// Published view of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSnapshot {
    pub state: IngestState,
    pub progress: Progress,
    pub file_name: Option<String>,
}

/// Result of selecting a file
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    /// Ready to process; large files carry a non-blocking advisory
    Admitted { advisory: Option<String> },
    /// Multi-layer content found; `confirm_pending` admits the file
    ConfirmationRequired(LayerCheckResult),
}

/// Manifest and server verification of a successful ingest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReceipt {
    pub manifest: ProcessingManifest,
    pub verification: ServerVerification,
}

struct UploadMessage {
    job: JobId,
    result: Result<ServerVerification, TransportError>,
}

struct ActiveJob {
    id: JobId,
    cancel: CancelFlag,
    upload: Option<AbortHandle>,
}

enum Incoming {
    Worker(WorkerMessage),
    Upload(UploadMessage),
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct IngestPipeline {
    config: IngestConfig,
    inspector: LayerInspector,
    worker: ProcessingWorker,
    transport: Arc<dyn SubmissionTransport>,

    snapshot: IngestSnapshot,
    state_tx: watch::Sender<IngestSnapshot>,

    worker_tx: UnboundedSender<WorkerMessage>,
    worker_rx: UnboundedReceiver<WorkerMessage>,
    upload_tx: UnboundedSender<UploadMessage>,
    upload_rx: UnboundedReceiver<UploadMessage>,

    file: Option<SubmissionFile>,
    pending: Option<(SubmissionFile, LayerCheckResult)>,
    active: Option<ActiveJob>,

    manifest: Option<ProcessingManifest>,
    receipt: Option<IngestReceipt>,
    last_error: Option<String>,
}

impl IngestPipeline {
    pub fn new(config: IngestConfig, transport: Arc<dyn SubmissionTransport>) -> Self {
        let snapshot = IngestSnapshot {
            state: IngestState::Idle,
            progress: Progress::idle(),
            file_name: None,
        };
        let (state_tx, _) = watch::channel(snapshot.clone());
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();

        Self {
            inspector: LayerInspector::from_config(&config.inspection),
            worker: ProcessingWorker::from_config(&config),
            config,
            transport,
            snapshot,
            state_tx,
            worker_tx,
            worker_rx,
            upload_tx,
            upload_rx,
            file: None,
            pending: None,
            active: None,
            manifest: None,
            receipt: None,
            last_error: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> IngestState {
        self.snapshot.state
    }

    pub fn progress(&self) -> &Progress {
        &self.snapshot.progress
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        self.snapshot.clone()
    }

    /// Receiver that sees every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<IngestSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn selected_file(&self) -> Option<&SubmissionFile> {
        self.file.as_ref()
    }

    pub fn active_job(&self) -> Option<JobId> {
        self.active.as_ref().map(|job| job.id)
    }

    pub fn manifest(&self) -> Option<&ProcessingManifest> {
        self.manifest.as_ref()
    }

    pub fn receipt(&self) -> Option<&IngestReceipt> {
        self.receipt.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// IIIF manifest URL of the last successful ingest
    pub fn iiif_manifest_url(&self) -> Option<String> {
        let receipt = self.receipt.as_ref()?;
        let base = self.config.api_base().ok()?;
        Some(receipt.verification.iiif_manifest_url(&base))
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Replace the selected file, cancelling any run in flight
    pub async fn select_file(&mut self, file: SubmissionFile) -> SelectionOutcome {
        self.detach_active("file reselected");
        self.file = None;
        self.pending = None;
        self.manifest = None;
        self.receipt = None;
        self.last_error = None;
        self.snapshot.file_name = Some(file.name().to_string());
        self.transition(IngestState::Idle, Progress::idle());

        let inspector = self.inspector.clone();
        let candidate = file.clone();
        let check = tokio::task::spawn_blocking(move || inspector.check(&candidate))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Layer inspection task failed, assuming flattened");
                LayerCheckResult::default()
            });

        if check.has_layers {
            tracing::info!(file_name = %file.name(), "Awaiting confirmation for multi-layer file");
            self.pending = Some((file, check.clone()));
            return SelectionOutcome::ConfirmationRequired(check);
        }

        let advisory = if check.is_large_file { check.message } else { None };
        tracing::info!(file_name = %file.name(), size = file.size(), "File admitted");
        self.file = Some(file);
        SelectionOutcome::Admitted { advisory }
    }

    /// Admit the file awaiting multi-layer confirmation
    pub fn confirm_pending(&mut self) -> bool {
        match self.pending.take() {
            Some((file, _)) => {
                tracing::info!(file_name = %file.name(), "Multi-layer file confirmed");
                self.file = Some(file);
                true
            }
            None => false,
        }
    }

    pub fn discard_pending(&mut self) {
        if self.pending.take().is_some() {
            self.snapshot.file_name = None;
            self.publish();
        }
    }

    // ========================================================================
    // Processing
    // ========================================================================

    /// Start a run for the admitted file; `false` when rejected
    pub fn start_processing(&mut self) -> bool {
        if self.active.is_some() || self.state() != IngestState::Idle {
            tracing::debug!(state = ?self.state(), "Start rejected, pipeline not idle");
            return false;
        }
        let Some(file) = self.file.clone() else {
            tracing::debug!("Start rejected, no admitted file");
            return false;
        };

        let id = JobId::new();
        let cancel = CancelFlag::new();
        self.manifest = None;
        self.receipt = None;
        self.last_error = None;

        tracing::info!(job_id = %id, file_name = %file.name(), "Processing started");
        self.transition(
            IngestState::Processing,
            Progress::new(ProgressStep::Starting, "Preparing..."),
        );

        // the worker task detaches; completion arrives as a message
        drop(self.worker.spawn(id, file, cancel.clone(), self.worker_tx.clone()));
        self.active = Some(ActiveJob {
            id,
            cancel,
            upload: None,
        });
        true
    }

    /// Stop the current run and return to `Idle` with the file still admitted
    pub fn cancel(&mut self) {
        if self.detach_active("cancelled") {
            self.transition(
                IngestState::Idle,
                Progress::new(ProgressStep::Idle, "Cancelled"),
            );
        }
    }

    /// Apply the next message of the active run
    ///
    /// Returns `None` when no run is active. Stale messages are skipped.
    pub async fn next_event(&mut self) -> Option<IngestSnapshot> {
        loop {
            let active_id = self.active.as_ref()?.id;

            let incoming = tokio::select! {
                Some(message) = self.worker_rx.recv() => Incoming::Worker(message),
                Some(message) = self.upload_rx.recv() => Incoming::Upload(message),
                else => return None,
            };

            let job = match &incoming {
                Incoming::Worker(message) => message.job,
                Incoming::Upload(message) => message.job,
            };
            if job != active_id {
                tracing::debug!(job_id = %job, active = %active_id, "Dropping stale message");
                continue;
            }

            match incoming {
                Incoming::Worker(message) => self.apply_worker_event(message.event),
                Incoming::Upload(message) => self.apply_upload_result(message.result),
            }
            return Some(self.snapshot());
        }
    }

    /// Drive the active run to a terminal state
    pub async fn run_to_completion(&mut self) -> IngestState {
        while self.next_event().await.is_some() {}
        self.state()
    }

    /// Select, process and upload one file end to end
    ///
    /// Multi-layer files are admitted only when `confirm_layers` is set.
    pub async fn ingest(
        &mut self,
        file: SubmissionFile,
        confirm_layers: bool,
    ) -> crate::Result<IngestReceipt> {
        if let SelectionOutcome::ConfirmationRequired(check) = self.select_file(file).await {
            if !confirm_layers {
                self.discard_pending();
                return Err(IngestError::ConfirmationRequired(
                    check.message.unwrap_or_default(),
                ));
            }
            self.confirm_pending();
        }

        if !self.start_processing() {
            return Err(IngestError::Busy);
        }

        match self.run_to_completion().await {
            IngestState::Success => self
                .receipt
                .clone()
                .ok_or_else(|| IngestError::Failed("Ingest finished without a receipt".to_string())),
            _ => Err(IngestError::Failed(
                self.last_error
                    .clone()
                    .unwrap_or_else(|| "Ingest did not complete".to_string()),
            )),
        }
    }

    fn apply_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress(progress) => {
                if self.state() == IngestState::Processing {
                    self.snapshot.progress = progress;
                    self.publish();
                }
            }
            WorkerEvent::Complete(manifest) => self.begin_upload(manifest),
            WorkerEvent::Failed(reason) => self.fail(reason),
        }
    }

    fn begin_upload(&mut self, manifest: ProcessingManifest) {
        let Some(file) = self.file.clone() else {
            self.fail("No file selected".to_string());
            return;
        };
        let Some(active) = self.active.as_mut() else {
            return;
        };

        tracing::info!(
            job_id = %active.id,
            hash = %manifest.hash,
            metadata_keys = manifest.metadata.len(),
            "Processing complete, uploading"
        );

        let job = active.id;
        let transport = self.transport.clone();
        let tx = self.upload_tx.clone();
        let upload_manifest = manifest.clone();
        let submit = tokio::spawn(async move { transport.submit(&file, &upload_manifest).await });
        active.upload = Some(submit.abort_handle());

        // a panicking transport must still produce a message for this job
        tokio::spawn(async move {
            let result = match submit.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => return,
                Err(e) => {
                    tracing::error!(job_id = %job, error = %e, "Upload task join error");
                    Err(TransportError::Request(format!("Upload task failed: {}", e)))
                }
            };
            let _ = tx.send(UploadMessage { job, result });
        });

        self.manifest = Some(manifest);
        self.transition(
            IngestState::Uploading,
            Progress::new(
                ProgressStep::Uploading,
                "Uploading SIP package for server verification...",
            ),
        );
    }

    fn apply_upload_result(&mut self, result: Result<ServerVerification, TransportError>) {
        match result {
            Ok(verification) => {
                let Some(manifest) = self.manifest.clone() else {
                    self.fail("No manifest for completed upload".to_string());
                    return;
                };
                tracing::info!(asset_id = %verification.asset_id, "Ingest succeeded");
                self.receipt = Some(IngestReceipt {
                    manifest,
                    verification,
                });
                self.active = None;
                self.transition(
                    IngestState::Success,
                    Progress::new(ProgressStep::Done, "Ingest complete. Server fixity check passed."),
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Upload failed");
                self.fail(e.user_message());
            }
        }
    }

    fn fail(&mut self, reason: String) {
        tracing::warn!(reason = %reason, "Pipeline entered error state");
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        self.last_error = Some(reason.clone());
        self.transition(IngestState::Error, Progress::new(ProgressStep::Error, reason));
    }

    /// Cancel and forget the active run; true if there was one
    fn detach_active(&mut self, why: &str) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        tracing::info!(job_id = %active.id, reason = why, "Detaching active run");
        active.cancel.cancel();
        if let Some(upload) = active.upload {
            upload.abort();
        }
        true
    }

    fn transition(&mut self, next: IngestState, progress: Progress) {
        let current = self.snapshot.state;
        if !current.can_transition_to(next) {
            tracing::error!(from = ?current, to = ?next, "Illegal state transition ignored");
            return;
        }
        if current != next {
            tracing::debug!(from = ?current, to = ?next, "State transition");
        }
        self.snapshot.state = next;
        self.snapshot.progress = progress;
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot.clone());
    }
}
