use crate::constants::files;
use crate::storage::TaskId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The four well-known storage roots whose contents encode task state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRoots {
    /// Public task descriptors, lock markers and payload files
    pub outbound: PathBuf,
    /// PHI records of active tasks
    pub phi: PathBuf,
    /// Per-task result directories
    pub inbound: PathBuf,
    /// Terminal PHI records
    pub archive: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    Outbound,
    Phi,
    Inbound,
    Archive,
}

impl fmt::Display for RootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => write!(f, "OUT"),
            Self::Phi => write!(f, "PHI"),
            Self::Inbound => write!(f, "IN"),
            Self::Archive => write!(f, "PHI_ARCHIVE"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RootError {
    #[error("Unable to find storage folder {kind}: {}", .path.display())]
    Missing { kind: RootKind, path: PathBuf },

    #[error("Unable to create storage folder {kind} at {}: {error}", .path.display())]
    CreateFailed {
        kind: RootKind,
        path: PathBuf,
        #[source]
        error: io::Error,
    },
}

impl StorageRoots {
    pub fn new(
        outbound: impl Into<PathBuf>,
        phi: impl Into<PathBuf>,
        inbound: impl Into<PathBuf>,
        archive: impl Into<PathBuf>,
    ) -> Self {
        Self {
            outbound: outbound.into(),
            phi: phi.into(),
            inbound: inbound.into(),
            archive: archive.into(),
        }
    }

    /// Conventional layout below a single base directory
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self::new(
            base.join("out"),
            base.join("phi"),
            base.join("in"),
            base.join("archive"),
        )
    }

    pub fn path(&self, kind: RootKind) -> &Path {
        match kind {
            RootKind::Outbound => &self.outbound,
            RootKind::Phi => &self.phi,
            RootKind::Inbound => &self.inbound,
            RootKind::Archive => &self.archive,
        }
    }

    fn all(&self) -> [(RootKind, &Path); 4] {
        [
            (RootKind::Outbound, self.outbound.as_path()),
            (RootKind::Phi, self.phi.as_path()),
            (RootKind::Inbound, self.inbound.as_path()),
            (RootKind::Archive, self.archive.as_path()),
        ]
    }

    /// Create any missing root directory
    pub fn ensure_exists(&self) -> Result<(), RootError> {
        for (kind, path) in self.all() {
            if path.is_dir() {
                continue;
            }

            std::fs::create_dir_all(path).map_err(|error| RootError::CreateFailed {
                kind,
                path: path.to_path_buf(),
                error,
            })?;
            info!(root = %kind, path = %path.display(), "Created storage folder");
        }

        Ok(())
    }

    /// Fail with the first root that does not exist
    pub fn verify(&self) -> Result<(), RootError> {
        for (kind, _) in self.all() {
            self.verify_root(kind)?;
        }
        Ok(())
    }

    pub fn verify_root(&self, kind: RootKind) -> Result<&Path, RootError> {
        let path = self.path(kind);
        if path.is_dir() {
            Ok(path)
        } else {
            debug!(root = %kind, path = %path.display(), "Storage folder missing");
            Err(RootError::Missing {
                kind,
                path: path.to_path_buf(),
            })
        }
    }

    pub fn descriptor_path(&self, id: &TaskId) -> PathBuf {
        self.outbound.join(descriptor_file_name(id))
    }

    pub fn outbound_lock_path(&self, id: &TaskId) -> PathBuf {
        self.outbound.join(lock_file_name(id))
    }

    pub fn payload_path(&self, file_name: &str) -> PathBuf {
        self.outbound.join(file_name)
    }

    pub fn phi_record_path(&self, id: &TaskId) -> PathBuf {
        self.phi.join(phi_file_name(id))
    }

    pub fn phi_lock_path(&self, id: &TaskId) -> PathBuf {
        self.phi.join(lock_file_name(id))
    }

    pub fn archive_record_path(&self, id: &TaskId) -> PathBuf {
        self.archive.join(phi_file_name(id))
    }

    pub fn result_dir(&self, id: &TaskId) -> PathBuf {
        self.inbound.join(id.as_str())
    }

    pub fn incomplete_marker_path(&self, id: &TaskId) -> PathBuf {
        self.result_dir(id).join(files::INCOMPLETE_MARKER)
    }
}

pub fn descriptor_file_name(id: &TaskId) -> String {
    format!("{id}.{}", files::TASK_EXTENSION)
}

pub fn lock_file_name(id: &TaskId) -> String {
    format!("{id}.{}", files::LOCK_EXTENSION)
}

pub fn phi_file_name(id: &TaskId) -> String {
    format!("{id}.{}", files::PHI_EXTENSION)
}

/// Primary payload name; UUID-qualified so concurrent tasks never collide
pub fn payload_file_name(id: &TaskId) -> String {
    format!("{id}.{}", files::PAYLOAD_EXTENSION)
}

pub fn adjustment_file_name(id: &TaskId, index: usize) -> String {
    format!("{id}_{index}.{}", files::PAYLOAD_EXTENSION)
}

/// Task id encoded in a file name with the given extension, if any
pub fn task_id_from_file_name(path: &Path, extension: &str) -> Option<TaskId> {
    if path.extension().and_then(|e| e.to_str()) != Some(extension) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    TaskId::parse(stem).ok()
}
