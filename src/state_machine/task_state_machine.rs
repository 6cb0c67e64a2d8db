//! # Task State Machine
//!
//! Queries and maintenance over the four storage roots. Status is never stored; every
//! query re-derives it from which files exist where, so a crash can leave a task
//! incomplete but never inconsistent.

use super::derive::{derive_status, has_complete_result};
use super::errors::{PayloadError, StateMachineError, StateMachineResult};
use super::states::TaskStatus;
use super::worker_hint::ActiveJob;
use crate::constants::{files, BYTES_PER_MB};
use crate::models::{Task, TaskDescriptor, TaskEntry, TaskResult};
use crate::publish::lock;
use crate::storage::phi_store::RecordError;
use crate::storage::roots::task_id_from_file_name;
use crate::storage::{PhiStore, RootKind, StorageRoots, TaskId};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Which roots an enumeration covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskScope {
    /// Tasks with a PHI record in the PHI root
    Current,
    /// Tasks whose record has been archived
    Archive,
    All,
}

/// Payload files of a scheduled task, confirmed present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadCheck {
    /// Primary scan first
    pub files: Vec<PathBuf>,
    pub total_bytes: u64,
    pub datasize_mb: u64,
}

/// A published task ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub descriptor: TaskDescriptor,
    pub payload: PayloadCheck,
}

/// Outcome of the incomplete download sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    /// Left for the next sweep
    pub failed: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    store: PhiStore,
    active_job: ActiveJob,
}

impl TaskStateMachine {
    pub fn new(store: PhiStore, active_job: ActiveJob) -> Self {
        Self { store, active_job }
    }

    pub fn roots(&self) -> &StorageRoots {
        self.store.roots()
    }

    pub fn store(&self) -> &PhiStore {
        &self.store
    }

    pub fn active_job(&self) -> &ActiveJob {
        &self.active_job
    }

    /// Derived status of one task, `None` when the id is not a task
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        derive_status(self.roots(), id, self.active_job.hint_for(id))
    }

    /// Full operational view of one task
    pub fn task(&self, id: &TaskId) -> Result<Option<Task>, RecordError> {
        let Some(status) = self.status(id) else {
            return Ok(None);
        };

        let record = match status {
            TaskStatus::Archived => self.store.read_archived(id),
            // A lock marker may precede the PHI record
            TaskStatus::Preparing if !self.store.exists(id) => return Ok(None),
            _ => self.store.read(id),
        };

        let record = match record {
            Ok(record) => record,
            Err(RecordError::NotFound { .. }) => return Ok(None),
            Err(error) => return Err(error),
        };

        let payload_files = self
            .read_descriptor(id)
            .ok()
            .map(|descriptor| descriptor.payload_files())
            .unwrap_or_default();

        Ok(Some(Task::from_record(status, &record, payload_files)))
    }

    /// Snapshot of all tasks in `scope`, newest first.
    ///
    /// Records that disappear during the listing are omitted. Records failing the
    /// identity check are logged and skipped, never repaired.
    pub fn enumerate(&self, scope: TaskScope) -> StateMachineResult<Vec<TaskEntry>> {
        let mut entries = Vec::new();

        if matches!(scope, TaskScope::Current | TaskScope::All) {
            let phi = self.roots().verify_root(RootKind::Phi)?;
            self.roots().verify_root(RootKind::Outbound)?;

            for (id, modified) in list_records(phi, files::PHI_EXTENSION)? {
                let Some(status) = self.status(&id) else {
                    continue;
                };
                if status == TaskStatus::Archived {
                    // Archived by a concurrent actor mid-listing
                    continue;
                }

                match self.store.read(&id) {
                    Ok(record) => entries.push(TaskEntry {
                        id,
                        status,
                        result: record.status.result,
                        modified,
                    }),
                    Err(RecordError::NotFound { .. }) => {}
                    // The lock marker is present while a record is still being written
                    Err(_) if status == TaskStatus::Preparing => entries.push(TaskEntry {
                        id,
                        status,
                        result: TaskResult::InProcess,
                        modified,
                    }),
                    Err(error) => {
                        error!(task_id = %id, error = %error, "Skipping unreadable PHI record");
                    }
                }
            }
        }

        if matches!(scope, TaskScope::Archive | TaskScope::All) {
            let archive = self.roots().verify_root(RootKind::Archive)?;

            for (id, modified) in list_records(archive, files::PHI_EXTENSION)? {
                match self.store.read_archived(&id) {
                    Ok(record) => entries.push(TaskEntry {
                        id,
                        status: TaskStatus::Archived,
                        result: record.status.result,
                        modified,
                    }),
                    Err(RecordError::NotFound { .. }) => {}
                    Err(error) => {
                        error!(task_id = %id, error = %error, "Skipping unreadable archived record");
                    }
                }
            }
        }

        debug!(count = entries.len(), ?scope, "Enumerated tasks");
        Ok(entries)
    }

    /// Descriptor for `id` with its UUID checked against the id
    pub fn read_descriptor(&self, id: &TaskId) -> Result<TaskDescriptor, PayloadError> {
        let path = self.roots().descriptor_path(id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(PayloadError::DescriptorMissing { id: id.clone() })
            }
            Err(error) => return Err(PayloadError::Io { path, error }),
        };

        let descriptor = TaskDescriptor::from_toml(&text)
            .map_err(|error| PayloadError::Malformed {
                path: path.clone(),
                error,
            })?;

        if descriptor.task.uuid.as_ref() != Some(id) {
            error!(task_id = %id, path = %path.display(), "Invalid UUID in task descriptor");
            return Err(PayloadError::IdentityMismatch {
                path,
                expected: id.clone(),
            });
        }

        Ok(descriptor)
    }

    /// Resolve the ordered payload list of a descriptor and confirm every file exists
    pub fn check_payload(
        &self,
        id: &TaskId,
        descriptor: &TaskDescriptor,
    ) -> Result<PayloadCheck, PayloadError> {
        let mut present = Vec::new();
        let mut missing = Vec::new();
        let mut total_bytes = 0u64;

        for name in descriptor.payload_files() {
            let path = self.roots().payload_path(&name);
            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => {
                    total_bytes += metadata.len();
                    present.push(path);
                }
                _ => missing.push(name),
            }
        }

        if !missing.is_empty() {
            return Err(PayloadError::MissingFiles {
                id: id.clone(),
                files: missing,
            });
        }

        Ok(PayloadCheck {
            files: present,
            total_bytes,
            datasize_mb: total_bytes / BYTES_PER_MB,
        })
    }

    /// Published, unlocked descriptors with a PHI record and a complete payload
    pub fn scheduled_tasks(&self) -> StateMachineResult<Vec<ScheduledTask>> {
        let outbound = self.roots().verify_root(RootKind::Outbound)?;
        self.roots().verify_root(RootKind::Phi)?;

        let mut scheduled = Vec::new();
        for (id, _) in list_records(outbound, files::TASK_EXTENSION)? {
            if lock::is_held(&self.roots().outbound_lock_path(&id)) {
                continue;
            }

            if !self.store.exists(&id) {
                warn!(task_id = %id, "Missing PHI record for scheduled task");
                continue;
            }

            let checked = self
                .read_descriptor(&id)
                .and_then(|descriptor| {
                    self.check_payload(&id, &descriptor)
                        .map(|payload| (descriptor, payload))
                });

            match checked {
                Ok((descriptor, payload)) => scheduled.push(ScheduledTask {
                    id,
                    descriptor,
                    payload,
                }),
                Err(PayloadError::DescriptorMissing { .. }) => {}
                Err(error) => {
                    warn!(task_id = %id, error = %error, "Skipping scheduled task");
                }
            }
        }

        Ok(scheduled)
    }

    /// Tasks handed to the processing service and not yet back locally
    pub fn processing_tasks(&self) -> StateMachineResult<Vec<TaskId>> {
        Ok(self
            .enumerate(TaskScope::Current)?
            .into_iter()
            .filter(|entry| entry.status == TaskStatus::Processing)
            .map(|entry| entry.id)
            .collect())
    }

    /// Complete result directories whose task still has an active PHI record
    pub fn stored_results(&self) -> StateMachineResult<Vec<TaskId>> {
        let inbound = self.roots().verify_root(RootKind::Inbound)?;

        let mut ready = Vec::new();
        for (path, _) in list_entries(inbound, |p| p.is_dir())? {
            let Some(id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| TaskId::parse(name).ok())
            else {
                continue;
            };

            if !has_complete_result(self.roots(), &id) {
                continue;
            }

            if !self.store.exists(&id) {
                if self.roots().archive_record_path(&id).is_file() {
                    // Kept after aborted storage for manual recovery
                    debug!(task_id = %id, "Result of archived task left in place");
                } else {
                    error!(task_id = %id, "Unable to find PHI record, cannot store result");
                }
                continue;
            }

            ready.push(id);
        }

        Ok(ready)
    }

    /// Remove result directories carrying the incomplete marker. Removal failures are
    /// logged and retried by the next sweep.
    pub fn sweep_incomplete(&self) -> StateMachineResult<SweepReport> {
        let inbound = self.roots().verify_root(RootKind::Inbound)?;
        let mut report = SweepReport::default();

        for (dir, _) in list_entries(inbound, |p| p.is_dir())? {
            if !dir.join(files::INCOMPLETE_MARKER).exists() {
                continue;
            }

            warn!(path = %dir.display(), "Incomplete download found, removing");
            match fs::remove_dir_all(&dir) {
                Ok(()) => report.removed.push(dir),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    error!(path = %dir.display(), error = %error, "Unable to remove incomplete download");
                    report.failed.push(dir);
                }
            }
        }

        if !report.removed.is_empty() || !report.failed.is_empty() {
            info!(
                removed = report.removed.len(),
                failed = report.failed.len(),
                "🧹 SWEEP: Incomplete downloads processed"
            );
        }

        Ok(report)
    }

    /// Remove lock markers older than `max_age` left behind by crashed writers
    pub fn sweep_stale_locks(&self, max_age: Duration) -> StateMachineResult<usize> {
        let mut removed = 0;

        for kind in [RootKind::Outbound, RootKind::Phi] {
            let root = self.roots().verify_root(kind)?;
            for (path, _) in list_entries(root, |p| {
                p.extension().and_then(|e| e.to_str()) == Some(files::LOCK_EXTENSION)
            })? {
                let Some(age) = lock::age(&path) else {
                    continue;
                };
                if age < max_age {
                    continue;
                }

                match fs::remove_file(&path) {
                    Ok(()) => {
                        warn!(
                            path = %path.display(),
                            age_secs = age.as_secs(),
                            "Removed stale lock marker"
                        );
                        removed += 1;
                    }
                    Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                    Err(error) => {
                        error!(path = %path.display(), error = %error, "Unable to remove stale lock marker");
                    }
                }
            }
        }

        Ok(removed)
    }
}

/// Task ids of records with `extension` in `dir`, newest first
fn list_records(dir: &Path, extension: &str) -> StateMachineResult<Vec<(TaskId, DateTime<Utc>)>> {
    Ok(list_entries(dir, |p| p.is_file())?
        .into_iter()
        .filter_map(|(path, modified)| {
            task_id_from_file_name(&path, extension).map(|id| (id, modified))
        })
        .collect())
}

/// One directory snapshot sorted by modification time, newest first.
/// Entries whose metadata vanished between listing and stat are dropped.
fn list_entries(
    dir: &Path,
    keep: impl Fn(&Path) -> bool,
) -> StateMachineResult<Vec<(PathBuf, DateTime<Utc>)>> {
    let listing = fs::read_dir(dir).map_err(|error| StateMachineError::Listing {
        path: dir.to_path_buf(),
        error,
    })?;

    let mut entries: Vec<(PathBuf, SystemTime)> = listing
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| keep(path))
        .filter_map(|path| {
            let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((path, modified))
        })
        .collect();

    entries.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(entries
        .into_iter()
        .map(|(path, modified)| (path, DateTime::<Utc>::from(modified)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaseMetadata, PhiRecord, ReconSettings, ClientInfo};
    use crate::state_machine::worker_hint::WorkerOperation;
    use crate::storage::LockWait;
    use tempfile::TempDir;

    fn machine() -> (TempDir, TaskStateMachine) {
        let dir = TempDir::new().unwrap();
        let roots = StorageRoots::under(dir.path());
        roots.ensure_exists().unwrap();
        let store = PhiStore::new(roots, LockWait::default());
        (dir, TaskStateMachine::new(store, ActiveJob::new()))
    }

    fn add_task(machine: &TaskStateMachine, id: &str) -> TaskId {
        let id = TaskId::parse(id).unwrap();
        let record = PhiRecord::new(id.clone(), &CaseMetadata::default(), Utc::now());
        machine.store().create(&record).unwrap();
        id
    }

    fn publish_descriptor(machine: &TaskStateMachine, id: &TaskId, payload_bytes: usize) {
        let roots = machine.roots();
        let scan = format!("{id}.dat");
        fs::write(roots.payload_path(&scan), vec![0u8; payload_bytes]).unwrap();
        let descriptor = TaskDescriptor::for_cloud(
            id,
            &ReconSettings::default(),
            &ClientInfo::default(),
            scan,
            payload_bytes as u64,
            &[],
            Utc::now(),
        );
        fs::write(roots.descriptor_path(id), descriptor.to_toml().unwrap()).unwrap();
    }

    #[test]
    fn test_enumeration_skips_ids_without_phi_record() {
        let (_dir, machine) = machine();
        let id = add_task(&machine, "abc-123");
        fs::create_dir(machine.roots().inbound.join("orphan")).unwrap();
        fs::write(machine.roots().descriptor_path(&TaskId::parse("ghost").unwrap()), "").unwrap();

        let entries = machine.enumerate(TaskScope::Current).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].status, TaskStatus::Processing);
    }

    #[test]
    fn test_enumeration_skips_identity_mismatch() {
        let (_dir, machine) = machine();
        add_task(&machine, "abc-123");
        let other = PhiRecord::new(TaskId::parse("other").unwrap(), &CaseMetadata::default(), Utc::now());
        fs::write(
            machine.roots().phi.join("abc-999.phi"),
            other.to_toml().unwrap(),
        )
        .unwrap();

        let entries = machine.enumerate(TaskScope::Current).unwrap();
        assert_eq!(entries.len(), 1);
        // Left in place for inspection
        assert!(machine.roots().phi.join("abc-999.phi").exists());
    }

    #[test]
    fn test_enumeration_covers_archive() {
        let (_dir, machine) = machine();
        let id = add_task(&machine, "abc-123");
        fs::rename(
            machine.roots().phi_record_path(&id),
            machine.roots().archive_record_path(&id),
        )
        .unwrap();

        assert!(machine.enumerate(TaskScope::Current).unwrap().is_empty());
        let archived = machine.enumerate(TaskScope::Archive).unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].status, TaskStatus::Archived);
        assert_eq!(machine.status(&id), Some(TaskStatus::Archived));
    }

    #[test]
    fn test_missing_root_is_reported() {
        let (_dir, machine) = machine();
        fs::remove_dir(&machine.roots().phi).unwrap();
        assert!(matches!(
            machine.enumerate(TaskScope::Current),
            Err(StateMachineError::Root(_))
        ));
    }

    #[test]
    fn test_scheduled_tasks_require_payload() {
        let (_dir, machine) = machine();
        let ready = add_task(&machine, "abc-123");
        publish_descriptor(&machine, &ready, 2_500_000);

        let incomplete = add_task(&machine, "def-456");
        publish_descriptor(&machine, &incomplete, 10);
        fs::remove_file(machine.roots().payload_path("def-456.dat")).unwrap();

        let locked = add_task(&machine, "ghi-789");
        publish_descriptor(&machine, &locked, 10);
        fs::write(machine.roots().outbound_lock_path(&locked), "").unwrap();

        let scheduled = machine.scheduled_tasks().unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].id, ready);
        assert_eq!(scheduled[0].payload.datasize_mb, 2);
        assert_eq!(scheduled[0].payload.total_bytes, 2_500_000);
    }

    #[test]
    fn test_descriptor_identity_is_checked() {
        let (_dir, machine) = machine();
        let id = add_task(&machine, "abc-123");
        publish_descriptor(&machine, &id, 1);
        let other = TaskId::parse("zzz").unwrap();
        fs::copy(
            machine.roots().descriptor_path(&id),
            machine.roots().descriptor_path(&other),
        )
        .unwrap();

        assert!(matches!(
            machine.read_descriptor(&other),
            Err(PayloadError::IdentityMismatch { .. })
        ));
    }

    #[test]
    fn test_sweep_incomplete_removes_interrupted_downloads() {
        let (_dir, machine) = machine();
        let id = add_task(&machine, "xyz");
        let dir = machine.roots().result_dir(&id);
        fs::create_dir_all(dir.join("series")).unwrap();
        fs::write(dir.join("series/image.dcm"), b"data").unwrap();
        fs::write(machine.roots().incomplete_marker_path(&id), b"").unwrap();

        let complete = add_task(&machine, "abc-123");
        fs::create_dir(machine.roots().result_dir(&complete)).unwrap();

        let report = machine.sweep_incomplete().unwrap();
        assert_eq!(report.removed, vec![dir.clone()]);
        assert!(!dir.exists());
        assert!(machine.roots().result_dir(&complete).exists());
        assert_eq!(machine.status(&id), Some(TaskStatus::Processing));
        assert_eq!(machine.stored_results().unwrap(), vec![complete]);
    }

    #[test]
    fn test_sweep_stale_locks() {
        let (_dir, machine) = machine();
        let id = TaskId::parse("abc-123").unwrap();
        fs::write(machine.roots().outbound_lock_path(&id), "").unwrap();
        fs::write(machine.roots().phi_lock_path(&id), "").unwrap();

        assert_eq!(machine.sweep_stale_locks(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(machine.sweep_stale_locks(Duration::ZERO).unwrap(), 2);
        assert!(!machine.roots().outbound_lock_path(&id).exists());
    }

    #[test]
    fn test_worker_hint_refines_status() {
        let (_dir, machine) = machine();
        let id = add_task(&machine, "abc-123");
        let _guard = machine
            .active_job()
            .begin(id.clone(), WorkerOperation::Download);

        assert_eq!(machine.status(&id), Some(TaskStatus::Downloading));
        assert!(machine.processing_tasks().unwrap().is_empty());
    }

    #[test]
    fn test_task_view() {
        let (_dir, machine) = machine();
        let id = add_task(&machine, "abc-123");
        publish_descriptor(&machine, &id, 1);

        let task = machine.task(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.payload_files, vec!["abc-123.dat".to_string()]);
        assert_eq!(task.shortcode, "ABC");
        assert!(machine.task(&TaskId::parse("none").unwrap()).unwrap().is_none());
    }
}
