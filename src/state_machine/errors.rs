use crate::models::DescriptorError;
use crate::storage::{RootError, TaskId};
use std::io;
use std::path::PathBuf;

/// Why a scheduled task's payload could not be confirmed
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Task descriptor not found for task {id}")]
    DescriptorMissing { id: TaskId },

    #[error("Task descriptor {} could not be read: {error}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error("Task descriptor {} is malformed: {error}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        error: DescriptorError,
    },

    #[error("Invalid UUID in task descriptor {}: expected {expected}", .path.display())]
    IdentityMismatch { path: PathBuf, expected: TaskId },

    #[error("Missing scan files for task {id}: {}", .files.join(", "))]
    MissingFiles { id: TaskId, files: Vec<String> },
}

impl PayloadError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::IdentityMismatch { .. })
    }
}

/// Errors surfaced by state machine queries
#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error(transparent)]
    Root(#[from] RootError),

    #[error("Unable to list {}: {error}", .path.display())]
    Listing {
        path: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error("Storage scan did not complete: {0}")]
    Background(#[from] tokio::task::JoinError),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
