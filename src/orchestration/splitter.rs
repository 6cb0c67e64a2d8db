//! # PHI / Payload Splitter
//!
//! Turns a raw scan plus case metadata into de-identified payload files in the
//! outbound root and a PHI record in the PHI root. The generated task id is the only
//! link between the two and carries no PHI itself.

use crate::models::{CaseMetadata, PhiRecord};
use crate::publish::{LockError, LockMarker};
use crate::storage::phi_store::RecordError;
use crate::storage::roots::{adjustment_file_name, payload_file_name};
use crate::storage::{PhiStore, TaskId};
use crate::transfer::{CopyError, CopyOutcome, ReliableCopy};
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Removes identifying content from a payload file in place
pub trait PayloadScrubber: Send + Sync {
    fn scrub(&self, payload: &Path) -> io::Result<()>;
}

/// For payload formats that carry no identifying header
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScrubbing;

impl PayloadScrubber for NoScrubbing {
    fn scrub(&self, _payload: &Path) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error("Payload file already exists: {}", .path.display())]
    Collision { path: PathBuf },

    #[error("Not enough disk space: {required} bytes required, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Unable to de-identify payload {}: {error}", .path.display())]
    Scrub {
        path: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    pub id: TaskId,
    /// File names in the outbound root, primary scan first
    pub payload_files: Vec<String>,
    pub phi_record_path: PathBuf,
    pub payload_bytes: u64,
}

#[derive(Clone)]
pub struct PhiSplitter {
    store: PhiStore,
    copy: ReliableCopy,
    scrubber: Arc<dyn PayloadScrubber>,
}

impl std::fmt::Debug for PhiSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhiSplitter")
            .field("copy", &self.copy)
            .finish_non_exhaustive()
    }
}

impl PhiSplitter {
    pub fn new(store: PhiStore, copy: ReliableCopy, scrubber: Arc<dyn PayloadScrubber>) -> Self {
        Self {
            store,
            copy,
            scrubber,
        }
    }

    pub fn split(
        &self,
        scan_file: &Path,
        adjustment_files: &[PathBuf],
        metadata: &CaseMetadata,
    ) -> Result<SplitOutcome, SplitError> {
        self.split_with_id(TaskId::generate(), scan_file, adjustment_files, metadata)
    }

    /// Split under a caller-chosen id. On failure every payload file created here is
    /// removed again and no PHI record is left behind.
    pub fn split_with_id(
        &self,
        id: TaskId,
        scan_file: &Path,
        adjustment_files: &[PathBuf],
        metadata: &CaseMetadata,
    ) -> Result<SplitOutcome, SplitError> {
        self.split_inner(id, None, scan_file, adjustment_files, metadata)
    }

    /// Split while the caller holds the task's outbound lock. The marker is refreshed
    /// before every copy and before the PHI record is written, so a long series of
    /// copies never makes it look stale to the sweep.
    pub fn split_under(
        &self,
        lock: &LockMarker,
        id: TaskId,
        scan_file: &Path,
        adjustment_files: &[PathBuf],
        metadata: &CaseMetadata,
    ) -> Result<SplitOutcome, SplitError> {
        self.split_inner(id, Some(lock), scan_file, adjustment_files, metadata)
    }

    fn split_inner(
        &self,
        id: TaskId,
        lock: Option<&LockMarker>,
        scan_file: &Path,
        adjustment_files: &[PathBuf],
        metadata: &CaseMetadata,
    ) -> Result<SplitOutcome, SplitError> {
        let refresh = || lock.map_or(Ok(()), LockMarker::refresh);
        let roots = self.store.roots();
        let mut created: Vec<PathBuf> = Vec::new();

        let result = (|| {
            let mut payload_files = Vec::with_capacity(adjustment_files.len() + 1);
            let mut payload_bytes = 0;

            let sources = std::iter::once((scan_file, payload_file_name(&id))).chain(
                adjustment_files
                    .iter()
                    .enumerate()
                    .map(|(index, path)| (path.as_path(), adjustment_file_name(&id, index))),
            );

            for (source, name) in sources {
                refresh()?;
                let destination = roots.payload_path(&name);
                payload_bytes += self.place_payload(source, &destination, &mut created)?;
                payload_files.push(name);
            }

            refresh()?;
            let record = PhiRecord::new(id.clone(), metadata, Utc::now());
            let phi_record_path = self.store.create(&record)?;

            Ok(SplitOutcome {
                id: id.clone(),
                payload_files,
                phi_record_path,
                payload_bytes,
            })
        })();

        match &result {
            Ok(outcome) => info!(
                task_id = %outcome.id,
                files = outcome.payload_files.len(),
                bytes = outcome.payload_bytes,
                "✂️ SPLIT: Payload and PHI record written"
            ),
            Err(error) => {
                warn!(task_id = %id, error = %error, "Split failed, removing payload files");
                remove_files(&created);
            }
        }

        result
    }

    fn place_payload(
        &self,
        source: &Path,
        destination: &Path,
        created: &mut Vec<PathBuf>,
    ) -> Result<u64, SplitError> {
        let bytes = match self.copy.copy(source, destination) {
            Ok(CopyOutcome::Copied { bytes }) => bytes,
            Ok(CopyOutcome::AlreadyExists { destination }) => {
                return Err(SplitError::Collision { path: destination })
            }
            Ok(CopyOutcome::InsufficientSpace {
                required,
                available,
            }) => {
                return Err(SplitError::InsufficientSpace {
                    required,
                    available,
                })
            }
            Err(error) => {
                // Whatever the failed copy left behind is ours to clean up
                if destination.exists() {
                    created.push(destination.to_path_buf());
                }
                return Err(error.into());
            }
        };
        created.push(destination.to_path_buf());

        self.scrubber
            .scrub(destination)
            .map_err(|error| SplitError::Scrub {
                path: destination.to_path_buf(),
                error,
            })?;

        Ok(bytes)
    }
}

pub(crate) fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(error) = fs::remove_file(path) {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %error, "Unable to remove payload file");
            }
        }
    }
}
