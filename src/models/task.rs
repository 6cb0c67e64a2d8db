use crate::models::{PhiRecord, TaskResult, Timepoints};
use crate::state_machine::TaskStatus;
use crate::storage::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operational view of a task. Carries no PHI fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub result: TaskResult,
    pub retry_delay: Option<DateTime<Utc>>,
    pub upload_retry: u32,
    pub download_retry: u32,
    pub storage_retry: u32,
    /// Primary scan first, then adjustment files
    pub payload_files: Vec<String>,
    pub datasize_mb: u64,
    pub shortcode: String,
    pub timepoints: Timepoints,
}

impl Task {
    pub fn from_record(status: TaskStatus, record: &PhiRecord, payload_files: Vec<String>) -> Self {
        Self {
            id: record.id().clone(),
            status,
            result: record.status.result,
            retry_delay: record.status.delay,
            upload_retry: record.status.retry_upload,
            download_retry: record.status.retry_download,
            storage_retry: record.status.retry_storage,
            payload_files,
            datasize_mb: record.stats.datasize_mb,
            shortcode: record.stats.shortcode.clone(),
            timepoints: record.log.clone(),
        }
    }
}

/// One row of an enumeration snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Recorded result; `InProcess` until archival
    pub result: TaskResult,
    /// Modification time of the record the entry was listed from
    pub modified: DateTime<Utc>,
}
