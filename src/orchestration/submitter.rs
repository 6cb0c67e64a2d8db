//! # Task Submission
//!
//! Entry points for new tasks. Cloud submissions split the scan into payload and PHI
//! record, then publish a UUID-only descriptor. On-premise submissions go to a trusted
//! queue directory and keep ACC and patient name in the descriptor.

use super::archiver::TaskArchiver;
use super::splitter::{remove_files, PhiSplitter, SplitError};
use crate::constants::{events, files, BYTES_PER_MB};
use crate::events::EventPublisher;
use crate::models::{AdjustmentFile, CaseMetadata, ClientInfo, ReconSettings, TaskDescriptor, TaskResult};
use crate::publish::{AtomicPublisher, LockError, LockMarker, PublishError};
use crate::storage::roots::{adjustment_file_name, payload_file_name};
use crate::storage::{InvalidTaskId, RootError, RootKind, StorageRoots, TaskId};
use crate::transfer::{CopyError, CopyOutcome, ReliableCopy};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Descriptor file suffix understood by on-premise queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    #[default]
    Normal,
    Night,
    High,
}

impl TaskPriority {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Normal => files::TASK_EXTENSION,
            Self::Night => files::TASK_EXTENSION_NIGHT,
            Self::High => files::TASK_EXTENSION_PRIO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRequest {
    pub scan_file: PathBuf,
    pub adjustment_files: Vec<PathBuf>,
    pub metadata: CaseMetadata,
    pub settings: ReconSettings,
    pub client: ClientInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTask {
    pub id: TaskId,
    pub descriptor_path: PathBuf,
    pub datasize_mb: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Root(#[from] RootError),

    #[error("Invalid task id: {0}")]
    InvalidTaskId(#[from] InvalidTaskId),

    #[error("Queue directory does not exist: {}", .path.display())]
    QueueMissing { path: PathBuf },

    #[error("Filename already exists on server. Select different TaskID. ({})", .path.display())]
    AlreadySubmitted { path: PathBuf },

    #[error("Not enough disk space: {required} bytes required, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, Clone)]
pub struct TaskSubmitter {
    roots: StorageRoots,
    splitter: PhiSplitter,
    copy: ReliableCopy,
    publisher: AtomicPublisher,
    archiver: TaskArchiver,
    events: EventPublisher,
}

impl TaskSubmitter {
    pub fn new(
        roots: StorageRoots,
        splitter: PhiSplitter,
        copy: ReliableCopy,
        archiver: TaskArchiver,
        events: EventPublisher,
    ) -> Self {
        Self {
            roots,
            splitter,
            copy,
            publisher: AtomicPublisher::new(),
            archiver,
            events,
        }
    }

    /// Split and publish a cloud task.
    ///
    /// The outbound lock is held from before the first payload byte until the
    /// descriptor is complete, so the task reads as preparing throughout. If publishing
    /// fails the payload is removed and the PHI record archived as an aborted transfer.
    pub fn submit_cloud(&self, request: &SubmissionRequest) -> Result<SubmittedTask, SubmitError> {
        let outbound = self.roots.verify_root(RootKind::Outbound)?.to_path_buf();
        self.roots.verify_root(RootKind::Phi)?;

        let id = TaskId::generate();
        let lock = LockMarker::acquire(self.roots.outbound_lock_path(&id))?;

        let split = self.splitter.split_under(
            &lock,
            id.clone(),
            &request.scan_file,
            &request.adjustment_files,
            &request.metadata,
        )?;

        let adjustments = adjustment_entries(&split.payload_files[1..], &request.adjustment_files);
        let scan_name = payload_file_name(&id);
        let scan_size = fs::metadata(self.roots.payload_path(&scan_name))
            .map(|m| m.len())
            .unwrap_or(0);

        let descriptor = TaskDescriptor::for_cloud(
            &id,
            &request.settings,
            &request.client,
            scan_name,
            scan_size,
            &adjustments,
            Utc::now(),
        );

        let descriptor_path = match self.publisher.publish_descriptor_under(
            lock,
            &outbound,
            &id,
            files::TASK_EXTENSION,
            &descriptor,
        ) {
            Ok(path) => path,
            Err(publish_error) => {
                error!(task_id = %id, error = %publish_error, "Unable to publish task descriptor");
                let payload: Vec<_> = split
                    .payload_files
                    .iter()
                    .map(|name| self.roots.payload_path(name))
                    .collect();
                remove_files(&payload);
                if let Err(e) = self.archiver.archive(&id, TaskResult::AbortedTransfer) {
                    error!(task_id = %id, error = %e, "Unable to archive failed submission");
                }
                return Err(publish_error.into());
            }
        };

        let datasize_mb = split.payload_bytes / BYTES_PER_MB;
        info!(
            task_id = %id,
            files = split.payload_files.len(),
            datasize_mb = datasize_mb,
            "🚀 SUBMIT: Cloud task scheduled"
        );
        self.events.publish(
            events::TASK_SUBMITTED,
            Some(&id),
            json!({ "mode": "cloud", "files": split.payload_files.len(), "datasize_mb": datasize_mb }),
        );

        Ok(SubmittedTask {
            id,
            descriptor_path,
            datasize_mb,
        })
    }

    /// Copy scan and adjustment files into an on-premise queue and publish a
    /// descriptor named after the sanitized `task_id`
    pub fn submit_on_premise(
        &self,
        request: &SubmissionRequest,
        queue_dir: &Path,
        task_id: &str,
        priority: TaskPriority,
    ) -> Result<SubmittedTask, SubmitError> {
        if !queue_dir.is_dir() {
            return Err(SubmitError::QueueMissing {
                path: queue_dir.to_path_buf(),
            });
        }

        let id = TaskId::parse(sanitize_task_id(task_id))?;

        let mut copied = Vec::new();
        let result = self.place_on_premise(request, queue_dir, &id, priority, &mut copied);

        match result {
            Ok(submitted) => {
                info!(
                    task_id = %id,
                    priority = ?priority,
                    "🚀 SUBMIT: On-premise task queued"
                );
                self.events.publish(
                    events::TASK_SUBMITTED,
                    Some(&id),
                    json!({ "mode": "on_premise", "files": copied.len() }),
                );
                Ok(submitted)
            }
            Err(e) => {
                error!(task_id = %id, error = %e, "On-premise submission failed");
                remove_files(&copied);
                Err(e)
            }
        }
    }

    fn place_on_premise(
        &self,
        request: &SubmissionRequest,
        queue_dir: &Path,
        id: &TaskId,
        priority: TaskPriority,
        copied: &mut Vec<PathBuf>,
    ) -> Result<SubmittedTask, SubmitError> {
        let scan_name = payload_file_name(id);
        let mut names = vec![scan_name.clone()];
        names.extend((0..request.adjustment_files.len()).map(|index| adjustment_file_name(id, index)));

        let sources = std::iter::once(&request.scan_file).chain(request.adjustment_files.iter());
        let mut total_bytes = 0;
        for (source, name) in sources.zip(&names) {
            let destination = queue_dir.join(name);
            match self.copy.copy(source, &destination)? {
                CopyOutcome::Copied { bytes } => {
                    total_bytes += bytes;
                    copied.push(destination);
                }
                CopyOutcome::AlreadyExists { destination } => {
                    return Err(SubmitError::AlreadySubmitted { path: destination })
                }
                CopyOutcome::InsufficientSpace {
                    required,
                    available,
                } => {
                    return Err(SubmitError::InsufficientSpace {
                        required,
                        available,
                    })
                }
            }
        }

        let adjustments = adjustment_entries(&names[1..], &request.adjustment_files);
        let scan_size = fs::metadata(queue_dir.join(&scan_name))
            .map(|m| m.len())
            .unwrap_or(0);

        let descriptor = TaskDescriptor::for_on_premise(
            request.metadata.acc.clone(),
            request.metadata.patient_name.clone(),
            &request.settings,
            &request.client,
            scan_name,
            scan_size,
            &adjustments,
            Utc::now(),
        );

        let descriptor_path =
            self.publisher
                .publish_descriptor(queue_dir, id, priority.extension(), &descriptor)?;

        Ok(SubmittedTask {
            id: id.clone(),
            descriptor_path,
            datasize_mb: total_bytes / BYTES_PER_MB,
        })
    }
}

/// Strip characters that would let a user-chosen id escape or confuse the queue
pub fn sanitize_task_id(task_id: &str) -> String {
    task_id
        .chars()
        .filter(|c| !matches!(c, '.' | '/' | '\\' | ':') && !c.is_whitespace())
        .collect()
}

fn adjustment_entries(placed: &[String], originals: &[PathBuf]) -> Vec<AdjustmentFile> {
    placed
        .iter()
        .zip(originals)
        .map(|(file_name, original)| AdjustmentFile {
            file_name: file_name.clone(),
            original_name: original
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })
        .collect()
}
