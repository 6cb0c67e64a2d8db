use crate::models::TaskResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status, always derived from the storage roots and never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// A writer holds the lock marker of the descriptor
    Preparing,
    /// Descriptor is published and waiting for upload
    Scheduled,
    /// Handed to the processing service
    Processing,
    /// Payload transfer to the processing service in progress
    Uploading,
    /// Processing service reports the job as running
    Running,
    /// Processing service reports a result ready for download
    Ready,
    /// Result download in progress
    Downloading,
    /// Result present locally and waiting to be stored
    Storage,
    /// PHI record moved to the archive root
    Archived,
    ErrorTransfer,
    ErrorProcessing,
    ErrorStorage,
}

impl TaskStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Archived | Self::ErrorTransfer | Self::ErrorProcessing | Self::ErrorStorage
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ErrorTransfer | Self::ErrorProcessing | Self::ErrorStorage
        )
    }

    /// Status of an archived task as shown to operators
    pub fn for_archived(result: TaskResult) -> Self {
        match result {
            TaskResult::AbortedTransfer => Self::ErrorTransfer,
            TaskResult::AbortedProcessing => Self::ErrorProcessing,
            TaskResult::AbortedStorage => Self::ErrorStorage,
            TaskResult::Success | TaskResult::InProcess => Self::Archived,
        }
    }

    /// Human-readable label for the presentation layer
    pub fn label(&self) -> &'static str {
        match self {
            Self::Preparing => "Preparing",
            Self::Scheduled => "Scheduled",
            Self::Processing => "Processing",
            Self::Uploading => "Uploading",
            Self::Running => "Running",
            Self::Ready => "Ready",
            Self::Downloading => "Downloading",
            Self::Storage => "Storage",
            Self::Archived => "Completed",
            Self::ErrorTransfer => "Error Transfer",
            Self::ErrorProcessing => "Error Processing",
            Self::ErrorStorage => "Error Storage",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparing => write!(f, "preparing"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Processing => write!(f, "processing"),
            Self::Uploading => write!(f, "uploading"),
            Self::Running => write!(f, "running"),
            Self::Ready => write!(f, "ready"),
            Self::Downloading => write!(f, "downloading"),
            Self::Storage => write!(f, "storage"),
            Self::Archived => write!(f, "archived"),
            Self::ErrorTransfer => write!(f, "error_transfer"),
            Self::ErrorProcessing => write!(f, "error_processing"),
            Self::ErrorStorage => write!(f, "error_storage"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preparing" => Ok(Self::Preparing),
            "scheduled" => Ok(Self::Scheduled),
            "processing" => Ok(Self::Processing),
            "uploading" => Ok(Self::Uploading),
            "running" => Ok(Self::Running),
            "ready" => Ok(Self::Ready),
            "downloading" => Ok(Self::Downloading),
            "storage" => Ok(Self::Storage),
            "archived" => Ok(Self::Archived),
            "error_transfer" => Ok(Self::ErrorTransfer),
            "error_processing" => Ok(Self::ErrorProcessing),
            "error_storage" => Ok(Self::ErrorStorage),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}
