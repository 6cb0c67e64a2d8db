//! # Transfer Pipeline
//!
//! One cycle moves every task as far as it can go: sweep leftovers, upload scheduled
//! tasks, follow processing jobs, download ready results, store them and archive
//! finished tasks. Each phase honours the record's `DELAY`, counts failures and
//! archives with the matching aborted result once its retry limit is reached.
//!
//! Nothing in a cycle panics or aborts the process. A missing root halts only the
//! stages that need it and is reported in the [`CycleReport`].

use super::archiver::{clear_outbound, ArchiveOutcome, TaskArchiver};
use super::services::{JobState, ProcessingService, ResultSink};
use crate::constants::{events, files, timeouts};
use crate::events::EventPublisher;
use crate::logging::log_error;
use crate::models::{PhiRecord, TaskEntry, TaskResult, Timepoint};
use crate::state_machine::{
    is_due, BackoffPolicy, RetryLimits, ScheduledTask, StateMachineResult, TaskScope,
    TaskStateMachine, TaskStatus, TransferPhase, WorkerOperation,
};
use crate::storage::phi_store::RecordError;
use crate::storage::TaskId;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Upper bound on uploads and on downloads within one cycle
    pub max_tasks_per_cycle: usize,
    pub backoff: BackoffPolicy,
    pub limits: RetryLimits,
    pub stale_lock_age: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_tasks_per_cycle: 10,
            backoff: BackoffPolicy::default(),
            limits: RetryLimits::default(),
            stale_lock_age: timeouts::STALE_LOCK_AGE,
        }
    }
}

/// What a single cycle did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub swept: usize,
    pub stale_locks_removed: usize,
    pub uploaded: Vec<TaskId>,
    pub downloaded: Vec<TaskId>,
    pub stored: Vec<TaskId>,
    pub archived: Vec<(TaskId, TaskResult)>,
    pub failures: usize,
    /// Stage-level problems such as a missing root
    pub stage_errors: Vec<String>,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.swept == 0
            && self.stale_locks_removed == 0
            && self.uploaded.is_empty()
            && self.downloaded.is_empty()
            && self.stored.is_empty()
            && self.archived.is_empty()
            && self.failures == 0
    }
}

pub struct TransferPipeline {
    machine: TaskStateMachine,
    archiver: TaskArchiver,
    service: Arc<dyn ProcessingService>,
    sink: Arc<dyn ResultSink>,
    events: EventPublisher,
    settings: PipelineSettings,
}

impl std::fmt::Debug for TransferPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPipeline")
            .field("machine", &self.machine)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TransferPipeline {
    pub fn new(
        machine: TaskStateMachine,
        service: Arc<dyn ProcessingService>,
        sink: Arc<dyn ResultSink>,
        events: EventPublisher,
        settings: PipelineSettings,
    ) -> Self {
        let archiver = TaskArchiver::new(machine.store().clone(), events.clone());
        Self {
            machine,
            archiver,
            service,
            sink,
            events,
            settings,
        }
    }

    pub fn machine(&self) -> &TaskStateMachine {
        &self.machine
    }

    pub fn archiver(&self) -> &TaskArchiver {
        &self.archiver
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        if let Err(e) = self.maintenance_stage(&mut report).await {
            stage_error(&mut report, "maintenance", e);
        }
        if let Err(e) = self.upload_stage(&mut report).await {
            stage_error(&mut report, "upload", e);
        }
        if let Err(e) = self.processing_stage(&mut report).await {
            stage_error(&mut report, "processing", e);
        }
        if let Err(e) = self.storage_stage(&mut report).await {
            stage_error(&mut report, "storage", e);
        }

        if report.is_idle() {
            debug!("Transfer cycle found nothing to do");
        } else {
            info!(
                uploaded = report.uploaded.len(),
                downloaded = report.downloaded.len(),
                stored = report.stored.len(),
                archived = report.archived.len(),
                failures = report.failures,
                "🔄 CYCLE: Transfer cycle completed"
            );
        }

        report
    }

    /// Current tasks with `Processing` refined by the remote job state
    pub async fn task_overview(&self, scope: TaskScope) -> StateMachineResult<Vec<TaskEntry>> {
        let machine = self.machine.clone();
        let mut entries = tokio::task::spawn_blocking(move || machine.enumerate(scope)).await??;

        let processing: Vec<&mut TaskEntry> = entries
            .iter_mut()
            .filter(|entry| entry.status == TaskStatus::Processing)
            .collect();
        let states = join_all(
            processing
                .iter()
                .map(|entry| self.service.job_state(&entry.id)),
        )
        .await;

        for (entry, state) in processing.into_iter().zip(states) {
            match state {
                Ok(JobState::Running) => entry.status = TaskStatus::Running,
                Ok(JobState::Ready) => entry.status = TaskStatus::Ready,
                Ok(JobState::Failed) => entry.status = TaskStatus::ErrorProcessing,
                Err(e) => debug!(task_id = %entry.id, error = %e, "Job state unavailable"),
            }
        }

        Ok(entries)
    }

    async fn maintenance_stage(&self, report: &mut CycleReport) -> StateMachineResult<()> {
        let machine = self.machine.clone();
        let stale_lock_age = self.settings.stale_lock_age;
        let (swept, stale_locks_removed) =
            tokio::task::spawn_blocking(move || -> StateMachineResult<_> {
                let sweep = machine.sweep_incomplete()?;
                Ok((sweep.removed.len(), machine.sweep_stale_locks(stale_lock_age)?))
            })
            .await??;
        report.swept = swept;
        report.stale_locks_removed = stale_locks_removed;

        if report.swept > 0 || report.stale_locks_removed > 0 {
            self.events.publish(
                events::MAINTENANCE_SWEEP,
                None,
                json!({ "incomplete": report.swept, "stale_locks": report.stale_locks_removed }),
            );
        }
        Ok(())
    }

    async fn upload_stage(&self, report: &mut CycleReport) -> StateMachineResult<()> {
        let machine = self.machine.clone();
        let scheduled = tokio::task::spawn_blocking(move || machine.scheduled_tasks()).await??;

        let now = Utc::now();
        let mut due: Vec<ScheduledTask> = Vec::new();
        for task in scheduled {
            if due.len() >= self.settings.max_tasks_per_cycle {
                break;
            }
            if self.is_due(&task.id, now).await {
                due.push(task);
            }
        }

        for task in due {
            self.upload(task, report).await;
        }
        Ok(())
    }

    async fn upload(&self, task: ScheduledTask, report: &mut CycleReport) {
        let id = task.id.clone();
        let _active = self.machine.active_job().begin(id.clone(), WorkerOperation::Upload);

        self.save_timepoint(&id, Timepoint::UploadBegin, Some(task.payload.datasize_mb))
            .await;
        self.events.publish(
            events::TASK_UPLOAD_STARTED,
            Some(&id),
            json!({ "datasize_mb": task.payload.datasize_mb }),
        );

        match self.service.submit(&task).await {
            Ok(()) => {
                let roots = self.machine.roots().clone();
                let uploaded = id.clone();
                offload(move || clear_outbound(&roots, &uploaded)).await;
                self.save_timepoint(&id, Timepoint::UploadEnd, None).await;
                self.save_timepoint(&id, Timepoint::ProcessingCreated, None).await;
                info!(task_id = %id, "⬆️ UPLOAD: Task handed to processing service");
                self.events.publish(events::TASK_UPLOADED, Some(&id), json!({}));
                report.uploaded.push(id);
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "Upload failed");
                self.phase_failed(&id, TransferPhase::Upload, &e.to_string(), report)
                    .await;
            }
        }
    }

    async fn processing_stage(&self, report: &mut CycleReport) -> StateMachineResult<()> {
        let machine = self.machine.clone();
        let processing = tokio::task::spawn_blocking(move || machine.processing_tasks()).await??;

        let now = Utc::now();
        let mut downloads = 0;

        for id in processing {
            let state = match self.service.job_state(&id).await {
                Ok(state) => state,
                Err(e) => {
                    debug!(task_id = %id, error = %e, "Job state unavailable, checking next cycle");
                    continue;
                }
            };

            match state {
                JobState::Running => {
                    self.save_timepoint(&id, Timepoint::ProcessingBegin, None).await;
                }
                JobState::Ready => {
                    if downloads >= self.settings.max_tasks_per_cycle
                        || !self.is_due(&id, now).await
                    {
                        continue;
                    }
                    downloads += 1;
                    self.save_timepoint(&id, Timepoint::ProcessingEnd, None).await;
                    self.download(&id, report).await;
                }
                JobState::Failed => {
                    error!(task_id = %id, "Processing service reports job failed");
                    self.events
                        .publish(events::TASK_PROCESSING_FAILED, Some(&id), json!({}));
                    self.archive(&id, TaskResult::AbortedProcessing, report).await;
                }
            }
        }
        Ok(())
    }

    async fn download(&self, id: &TaskId, report: &mut CycleReport) {
        let _active = self.machine.active_job().begin(id.clone(), WorkerOperation::Download);
        let roots = self.machine.roots();
        let dir = roots.result_dir(id);
        let marker = roots.incomplete_marker_path(id);

        self.save_timepoint(id, Timepoint::DownloadBegin, None).await;
        self.events
            .publish(events::TASK_DOWNLOAD_STARTED, Some(id), json!({}));

        let prepared = match tokio::fs::create_dir_all(&dir).await {
            Ok(()) => tokio::fs::File::create(&marker).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = prepared {
            error!(task_id = %id, error = %e, "Unable to prepare result directory");
            self.phase_failed(id, TransferPhase::Download, &e.to_string(), report)
                .await;
            return;
        }

        if let Err(e) = self.service.download(id, &dir).await {
            warn!(task_id = %id, error = %e, "Download failed");
            // Left with its marker when removal fails; the next sweep retries
            if let Err(remove_error) = tokio::fs::remove_dir_all(&dir).await {
                if remove_error.kind() != io::ErrorKind::NotFound {
                    warn!(path = %dir.display(), error = %remove_error, "Unable to remove failed download");
                }
            }
            self.phase_failed(id, TransferPhase::Download, &e.to_string(), report)
                .await;
            return;
        }

        if let Err(e) = tokio::fs::remove_file(&marker).await {
            error!(task_id = %id, error = %e, "Unable to clear incomplete marker");
            self.phase_failed(id, TransferPhase::Download, &e.to_string(), report)
                .await;
            return;
        }

        self.save_timepoint(id, Timepoint::DownloadEnd, None).await;
        if let Some(costs) = self.service.job_costs(id).await {
            let store = self.machine.store().clone();
            let task_id = id.clone();
            let saved =
                offload(move || store.save_costs(&task_id, costs.cost, &costs.shortcode)).await;
            if let Some(Err(e)) = saved {
                warn!(task_id = %id, error = %e, "Unable to save job costs");
            }
        }

        info!(task_id = %id, "⬇️ DOWNLOAD: Result received");
        self.events.publish(events::TASK_DOWNLOADED, Some(id), json!({}));
        report.downloaded.push(id.clone());
    }

    async fn storage_stage(&self, report: &mut CycleReport) -> StateMachineResult<()> {
        let machine = self.machine.clone();
        let stored = tokio::task::spawn_blocking(move || machine.stored_results()).await??;
        let now = Utc::now();

        for id in stored {
            let Some(record) = self.load_record(&id).await else {
                continue;
            };
            if !is_due(&record.status, now) {
                continue;
            }
            self.store(&id, &record, report).await;
        }
        Ok(())
    }

    async fn store(&self, id: &TaskId, record: &PhiRecord, report: &mut CycleReport) {
        {
            let _active = self.machine.active_job().begin(id.clone(), WorkerOperation::Storage);
            self.save_timepoint(id, Timepoint::StorageBegin, None).await;

            let dir = self.machine.roots().result_dir(id);
            if let Err(e) = self.sink.store(id, &dir, record).await {
                warn!(task_id = %id, error = %e, "Storing result failed");
                self.phase_failed(id, TransferPhase::Storage, &e.to_string(), report)
                    .await;
                return;
            }

            self.save_timepoint(id, Timepoint::StorageEnd, None).await;
        }

        info!(task_id = %id, "💾 STORE: Result delivered");
        self.events.publish(events::TASK_STORED, Some(id), json!({}));
        report.stored.push(id.clone());
        self.archive(id, TaskResult::Success, report).await;
    }

    /// Count the failure, back off, and archive once the phase's limit is reached
    async fn phase_failed(
        &self,
        id: &TaskId,
        phase: TransferPhase,
        reason: &str,
        report: &mut CycleReport,
    ) {
        report.failures += 1;

        let event = match phase {
            TransferPhase::Upload => events::TASK_UPLOAD_FAILED,
            TransferPhase::Download => events::TASK_DOWNLOAD_FAILED,
            TransferPhase::Storage => events::TASK_STORAGE_FAILED,
        };
        self.events.publish(event, Some(id), json!({ "reason": reason }));

        let store = self.machine.store().clone();
        let task_id = id.clone();
        let backoff = self.settings.backoff;
        let recorded =
            offload(move || store.record_failure(&task_id, phase, &backoff, Utc::now())).await;
        let failures = match recorded {
            Some(Ok(failures)) => failures,
            Some(Err(e)) => {
                error!(task_id = %id, phase = %phase, error = %e, "Unable to record failure");
                return;
            }
            None => return,
        };

        if self.settings.limits.is_exhausted(phase, failures) {
            warn!(task_id = %id, phase = %phase, failures = failures, "Retry limit reached, aborting task");
            self.archive(id, phase.failure_result(), report).await;
        }
    }

    async fn archive(&self, id: &TaskId, result: TaskResult, report: &mut CycleReport) {
        let archiver = self.archiver.clone();
        let task_id = id.clone();
        match offload(move || archiver.archive(&task_id, result)).await {
            Some(Ok(ArchiveOutcome::Archived)) => report.archived.push((id.clone(), result)),
            Some(Ok(ArchiveOutcome::AlreadyArchived)) | None => {}
            Some(Err(e)) => error!(task_id = %id, error = %e, "Unable to archive task"),
        }
    }

    async fn is_due(&self, id: &TaskId, now: chrono::DateTime<Utc>) -> bool {
        self.load_record(id)
            .await
            .is_some_and(|record| is_due(&record.status, now))
    }

    /// Active record of `id`; integrity failures are reported on the event bus
    async fn load_record(&self, id: &TaskId) -> Option<PhiRecord> {
        let store = self.machine.store().clone();
        let task_id = id.clone();
        match offload(move || store.read(&task_id)).await? {
            Ok(record) => Some(record),
            Err(e @ (RecordError::IdentityMismatch { .. } | RecordError::Parse { .. })) => {
                error!(task_id = %id, error = %e, "PHI record failed integrity check, skipping");
                self.events.publish(
                    events::TASK_INTEGRITY_VIOLATION,
                    Some(id),
                    json!({ "record": files::PHI_EXTENSION }),
                );
                None
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "PHI record unavailable");
                None
            }
        }
    }

    async fn save_timepoint(&self, id: &TaskId, timepoint: Timepoint, datasize_mb: Option<u64>) {
        let store = self.machine.store().clone();
        let task_id = id.clone();
        let saved = offload(move || store.save_timepoint(&task_id, timepoint, datasize_mb)).await;
        if let Some(Err(e)) = saved {
            warn!(task_id = %id, timepoint = timepoint.key(), error = %e, "Unable to save timepoint");
        }
    }
}

/// Run record and filesystem work on the blocking pool. PHI record locks are waited
/// for by sleeping, which must never happen on a runtime worker thread.
async fn offload<T, F>(work: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(value) => Some(value),
        Err(e) => {
            error!(error = %e, "Blocking storage work did not complete");
            None
        }
    }
}

fn stage_error(report: &mut CycleReport, stage: &str, error: impl std::fmt::Display) {
    let error = error.to_string();
    log_error("transfer_pipeline", stage, &error, Some("stage halted for this cycle"));
    report.stage_errors.push(format!("{stage}: {error}"));
}
