//! # Task Archiver
//!
//! Moves a task's PHI record into the archive root once the task reached a terminal
//! result. The record is the last artifact of a task and is never deleted.

use super::splitter::remove_files;
use crate::constants::events;
use crate::events::EventPublisher;
use crate::logging::log_task_operation;
use crate::models::{TaskDescriptor, TaskResult, Timepoint};
use crate::publish::LockMarker;
use crate::storage::phi_store::RecordError;
use crate::storage::roots::payload_file_name;
use crate::storage::{PhiStore, StorageRoots, TaskId};
use chrono::Utc;
use serde_json::json;
use std::fs;
use std::io;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Archived,
    /// Record was already in the archive; nothing was touched
    AlreadyArchived,
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Task {id} cannot be archived with non-terminal result {result:?}")]
    NotTerminal { id: TaskId, result: TaskResult },

    #[error("No PHI record for task {id}")]
    RecordMissing { id: TaskId },

    #[error(transparent)]
    Record(#[from] RecordError),
}

#[derive(Debug, Clone)]
pub struct TaskArchiver {
    store: PhiStore,
    events: EventPublisher,
}

impl TaskArchiver {
    pub fn new(store: PhiStore, events: EventPublisher) -> Self {
        Self { store, events }
    }

    /// Archive `id` with a terminal `result`.
    ///
    /// If the PHI record cannot be moved the task is left exactly as it was, outbound
    /// descriptor and payload included.
    ///
    /// Writing `RESULT` and the completion timepoint happens after the move and only
    /// logs on failure. Local results are removed unless storage was aborted, in which
    /// case they stay for manual recovery.
    pub fn archive(&self, id: &TaskId, result: TaskResult) -> Result<ArchiveOutcome, ArchiveError> {
        if !result.is_terminal() {
            return Err(ArchiveError::NotTerminal {
                id: id.clone(),
                result,
            });
        }

        let roots = self.store.roots();
        if !self.store.exists(id) {
            if roots.archive_record_path(id).is_file() {
                return Ok(ArchiveOutcome::AlreadyArchived);
            }
            return Err(ArchiveError::RecordMissing { id: id.clone() });
        }

        match self.store.move_to_archive(id) {
            // Outbound files go only once the record is safely archived
            Ok(_) => clear_outbound(roots, id),
            // Lost a race with a concurrent archiver
            Err(RecordError::NotFound { .. }) if roots.archive_record_path(id).is_file() => {
                return Ok(ArchiveOutcome::AlreadyArchived)
            }
            Err(error) => return Err(error.into()),
        }

        let now = Utc::now();
        if let Err(e) = self.store.update_archived(id, |record| {
            record.status.result = result;
            record.log.set(Timepoint::Completed, now);
        }) {
            error!(task_id = %id, error = %e, "Unable to write final result into archived record");
        }

        if result != TaskResult::AbortedStorage {
            remove_result_dir(roots, id);
        }

        log_task_operation("archive", Some(id.as_str()), &format!("{result:?}"), None);
        self.events
            .publish(events::TASK_ARCHIVED, Some(id), json!({ "result": result }));

        Ok(ArchiveOutcome::Archived)
    }
}

/// Remove the descriptor and payload files of `id` from the outbound root, under the
/// outbound lock so no reader sees a half-removed task. Failures are logged only.
pub(crate) fn clear_outbound(roots: &StorageRoots, id: &TaskId) {
    let descriptor_path = roots.descriptor_path(id);
    let mut payload = vec![payload_file_name(id)];

    match fs::read_to_string(&descriptor_path) {
        Ok(text) => match TaskDescriptor::from_toml(&text) {
            Ok(descriptor) if descriptor.task.uuid.as_ref() == Some(id) => {
                payload = descriptor.payload_files();
            }
            Ok(_) => warn!(task_id = %id, "Descriptor identity mismatch, removing primary payload only"),
            Err(e) => warn!(task_id = %id, error = %e, "Unreadable descriptor, removing primary payload only"),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(task_id = %id, error = %e, "Unable to read descriptor"),
    }

    let paths: Vec<_> = payload.iter().map(|name| roots.payload_path(name)).collect();
    if !descriptor_path.exists() && paths.iter().all(|p| !p.exists()) {
        return;
    }

    let lock = match LockMarker::acquire(roots.outbound_lock_path(id)) {
        Ok(lock) => lock,
        Err(e) => {
            warn!(task_id = %id, error = %e, "Outbound files busy, leaving them in place");
            return;
        }
    };

    remove_files(&paths);
    remove_files(std::slice::from_ref(&descriptor_path));
    lock.release();
}

fn remove_result_dir(roots: &StorageRoots, id: &TaskId) {
    let dir = roots.result_dir(id);
    match fs::remove_dir_all(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => error!(path = %dir.display(), error = %e, "Unable to remove local result"),
    }
}
