//! # PHI Record Store
//!
//! Reads and read-modify-writes of PHI records. Every update holds the process-wide
//! mutex and the per-record lock marker `<root>/<id>.lock`, and replaces the record
//! through a temp file and rename so readers never see a torn record.

use crate::constants::files;
use crate::models::{PhiRecord, Timepoint};
use crate::publish::{LockError, LockMarker};
use crate::state_machine::retry::{BackoffPolicy, TransferPhase};
use crate::storage::roots::{lock_file_name, phi_file_name};
use crate::storage::{StorageRoots, TaskId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("PHI record not found for task {id}")]
    NotFound { id: TaskId },

    #[error("PHI record {} could not be accessed: {error}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error("PHI record {} is malformed: {error}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },

    #[error("Unable to serialize PHI record: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("PHI record {} belongs to task {found}, expected {expected}", .path.display())]
    IdentityMismatch {
        path: PathBuf,
        expected: TaskId,
        found: TaskId,
    },

    #[error("PHI record already exists: {}", .path.display())]
    Exists { path: PathBuf },

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Bounded wait for a per-record lock marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockWait {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for LockWait {
    fn default() -> Self {
        Self {
            attempts: 50,
            interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhiStore {
    roots: StorageRoots,
    process_lock: Arc<Mutex<()>>,
    lock_wait: LockWait,
}

impl PhiStore {
    pub fn new(roots: StorageRoots, lock_wait: LockWait) -> Self {
        Self {
            roots,
            process_lock: Arc::new(Mutex::new(())),
            lock_wait,
        }
    }

    pub fn roots(&self) -> &StorageRoots {
        &self.roots
    }

    pub fn exists(&self, id: &TaskId) -> bool {
        self.roots.phi_record_path(id).is_file()
    }

    /// Read an active record, verifying it belongs to `id`
    pub fn read(&self, id: &TaskId) -> Result<PhiRecord, RecordError> {
        read_record(&self.roots.phi_record_path(id), id)
    }

    pub fn read_archived(&self, id: &TaskId) -> Result<PhiRecord, RecordError> {
        read_record(&self.roots.archive_record_path(id), id)
    }

    /// Write a new record into the PHI root; fails if one already exists
    pub fn create(&self, record: &PhiRecord) -> Result<PathBuf, RecordError> {
        let id = record.id();
        let path = self.roots.phi_record_path(id);

        let _guard = self.process_lock.lock();
        let lock = self.acquire(&self.roots.phi, id)?;

        if path.exists() {
            lock.release();
            return Err(RecordError::Exists { path });
        }

        let result = replace_record(&path, record);
        lock.release();
        result?;

        debug!(task_id = %id, "PHI record created");
        Ok(path)
    }

    /// Read-modify-write an active record
    pub fn update<T>(
        &self,
        id: &TaskId,
        mutate: impl FnOnce(&mut PhiRecord) -> T,
    ) -> Result<T, RecordError> {
        self.update_in(&self.roots.phi, id, mutate)
    }

    /// Read-modify-write a record that has already been moved to the archive root
    pub fn update_archived<T>(
        &self,
        id: &TaskId,
        mutate: impl FnOnce(&mut PhiRecord) -> T,
    ) -> Result<T, RecordError> {
        self.update_in(&self.roots.archive, id, mutate)
    }

    fn update_in<T>(
        &self,
        root: &Path,
        id: &TaskId,
        mutate: impl FnOnce(&mut PhiRecord) -> T,
    ) -> Result<T, RecordError> {
        let path = root.join(phi_file_name(id));

        let _guard = self.process_lock.lock();
        let lock = self.acquire(root, id)?;

        let result = read_record(&path, id).and_then(|mut record| {
            let value = mutate(&mut record);
            replace_record(&path, &record)?;
            Ok(value)
        });

        lock.release();
        result
    }

    /// Record a timepoint once; later calls keep the first value. `UploadBegin` also
    /// stores the payload size. Returns whether the timepoint was newly written.
    pub fn save_timepoint(
        &self,
        id: &TaskId,
        timepoint: Timepoint,
        datasize_mb: Option<u64>,
    ) -> Result<bool, RecordError> {
        let now = Utc::now();
        self.update(id, |record| {
            if timepoint == Timepoint::UploadBegin {
                if let Some(size) = datasize_mb {
                    record.stats.datasize_mb = size;
                }
            }
            record.log.record_once(timepoint, now)
        })
    }

    /// Count a failed attempt of `phase` and push `DELAY` out by the backoff.
    /// Returns the new counter value.
    pub fn record_failure(
        &self,
        id: &TaskId,
        phase: TransferPhase,
        backoff: &BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Result<u32, RecordError> {
        let failures = self.update(id, |record| {
            let counter = phase.counter_mut(&mut record.status);
            *counter = counter.saturating_add(1);
            let failures = *counter;
            record.status.delay = Some(backoff.next_attempt(failures, now));
            failures
        })?;

        info!(
            task_id = %id,
            phase = %phase,
            failures = failures,
            "🔁 RETRY: Phase failed, backing off"
        );
        Ok(failures)
    }

    pub fn save_costs(&self, id: &TaskId, cost: f64, shortcode: &str) -> Result<(), RecordError> {
        self.update(id, |record| {
            record.stats.cost = cost;
            if !shortcode.is_empty() {
                record.stats.shortcode = shortcode.to_string();
            }
        })
    }

    /// Move an active record into the archive root. The record is checked against
    /// `id` first; a record already present in the archive is never overwritten.
    pub fn move_to_archive(&self, id: &TaskId) -> Result<PathBuf, RecordError> {
        let from = self.roots.phi_record_path(id);
        let to = self.roots.archive_record_path(id);

        let _guard = self.process_lock.lock();
        let lock = self.acquire(&self.roots.phi, id)?;

        let result = read_record(&from, id).and_then(|_| {
            if to.exists() {
                return Err(RecordError::Exists { path: to.clone() });
            }
            fs::rename(&from, &to).map_err(|error| RecordError::Io {
                path: from.clone(),
                error,
            })
        });

        lock.release();
        result?;

        debug!(task_id = %id, "PHI record moved to archive");
        Ok(to)
    }

    fn acquire(&self, root: &Path, id: &TaskId) -> Result<LockMarker, RecordError> {
        LockMarker::acquire_with_wait(
            root.join(lock_file_name(id)),
            self.lock_wait.attempts,
            self.lock_wait.interval,
        )
        .map_err(|e| {
            error!(task_id = %id, error = %e, "Unable to lock PHI record");
            RecordError::from(e)
        })
    }
}

fn read_record(path: &Path, id: &TaskId) -> Result<PhiRecord, RecordError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            Err(RecordError::NotFound { id: id.clone() })
        }
        Err(error) => Err(RecordError::Io {
            path: path.to_path_buf(),
            error,
        }),
    }?;

    let record = PhiRecord::from_toml(&text).map_err(|error| RecordError::Parse {
        path: path.to_path_buf(),
        error,
    })?;

    if record.id() != id {
        return Err(RecordError::IdentityMismatch {
            path: path.to_path_buf(),
            expected: id.clone(),
            found: record.id().clone(),
        });
    }

    Ok(record)
}

fn replace_record(path: &Path, record: &PhiRecord) -> Result<(), RecordError> {
    let text = record.to_toml()?;
    let mut temp = path.as_os_str().to_owned();
    temp.push(".");
    temp.push(files::PARTIAL_EXTENSION);
    let temp = PathBuf::from(temp);

    let io_error = |error| RecordError::Io {
        path: path.to_path_buf(),
        error,
    };

    let write = || -> io::Result<()> {
        let mut file = fs::File::create(&temp)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp, path)
    };

    write().map_err(|error| {
        let _ = fs::remove_file(&temp);
        io_error(error)
    })
}
