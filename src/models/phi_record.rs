//! # PHI Record
//!
//! The only place patient-identifying fields are persisted. Lives in the PHI root
//! while the task is active and in the archive root once it is terminal. Field names
//! are uppercase to stay readable by existing tooling that inspects these records.

use crate::storage::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhiRecord {
    #[serde(rename = "PHI")]
    pub phi: PhiFields,
    #[serde(rename = "STATUS", default)]
    pub status: StatusFields,
    #[serde(rename = "STATS", default)]
    pub stats: StatsFields,
    #[serde(rename = "LOG", default)]
    pub log: Timepoints,
}

/// Patient-identifying fields plus the task identity they belong to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct PhiFields {
    pub uuid: TaskId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mrn: String,
    #[serde(default)]
    pub dob: String,
    #[serde(default)]
    pub acc: String,
    #[serde(default)]
    pub taskid: String,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct StatusFields {
    pub result: TaskResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<DateTime<Utc>>,
    pub retry_upload: u32,
    pub retry_download: u32,
    pub retry_storage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct StatsFields {
    pub shortcode: String,
    /// Billing placeholder; negative until the processing service reports a cost
    pub cost: f64,
    pub datasize_mb: u64,
}

impl Default for StatsFields {
    fn default() -> Self {
        Self {
            shortcode: String::new(),
            cost: -1.0,
            datasize_mb: 0,
        }
    }
}

/// Final outcome of a task, set once at archival
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskResult {
    #[default]
    InProcess,
    Success,
    AbortedTransfer,
    AbortedProcessing,
    AbortedStorage,
}

impl TaskResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProcess)
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProcess => write!(f, "InProcess"),
            Self::Success => write!(f, "Success"),
            Self::AbortedTransfer => write!(f, "AbortedTransfer"),
            Self::AbortedProcessing => write!(f, "AbortedProcessing"),
            Self::AbortedStorage => write!(f, "AbortedStorage"),
        }
    }
}

/// Named lifecycle audit timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timepoint {
    Created,
    UploadBegin,
    UploadEnd,
    ProcessingCreated,
    ProcessingBegin,
    ProcessingEnd,
    DownloadBegin,
    DownloadEnd,
    StorageBegin,
    StorageEnd,
    Completed,
}

impl Timepoint {
    pub const ALL: [Timepoint; 11] = [
        Self::Created,
        Self::UploadBegin,
        Self::UploadEnd,
        Self::ProcessingCreated,
        Self::ProcessingBegin,
        Self::ProcessingEnd,
        Self::DownloadBegin,
        Self::DownloadEnd,
        Self::StorageBegin,
        Self::StorageEnd,
        Self::Completed,
    ];

    /// Key under the `LOG` section
    pub fn key(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::UploadBegin => "UPLOAD_BEGIN",
            Self::UploadEnd => "UPLOAD_END",
            Self::ProcessingCreated => "PROCESSING_CREATED",
            Self::ProcessingBegin => "PROCESSING_BEGIN",
            Self::ProcessingEnd => "PROCESSING_END",
            Self::DownloadBegin => "DOWNLOAD_BEGIN",
            Self::DownloadEnd => "DOWNLOAD_END",
            Self::StorageBegin => "STORAGE_BEGIN",
            Self::StorageEnd => "STORAGE_END",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for Timepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Append-only map of timepoint key to timestamp
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timepoints(BTreeMap<String, DateTime<Utc>>);

impl Timepoints {
    pub fn get(&self, timepoint: Timepoint) -> Option<DateTime<Utc>> {
        self.0.get(timepoint.key()).copied()
    }

    /// Record a timepoint unless it is already present. Returns whether it was written.
    pub fn record_once(&mut self, timepoint: Timepoint, at: DateTime<Utc>) -> bool {
        if self.0.contains_key(timepoint.key()) {
            return false;
        }
        self.0.insert(timepoint.key().to_string(), at);
        true
    }

    /// Overwrite a timepoint; only used when stamping completion at archival
    pub fn set(&mut self, timepoint: Timepoint, at: DateTime<Utc>) {
        self.0.insert(timepoint.key().to_string(), at);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Patient and case metadata entered at submission
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaseMetadata {
    pub patient_name: String,
    pub mrn: String,
    pub dob: String,
    pub acc: String,
    pub task_id: String,
    pub mode: String,
}

impl PhiRecord {
    pub fn new(id: TaskId, metadata: &CaseMetadata, created_at: DateTime<Utc>) -> Self {
        let mut log = Timepoints::default();
        log.record_once(Timepoint::Created, created_at);

        Self {
            stats: StatsFields {
                shortcode: id.shortcode(),
                ..StatsFields::default()
            },
            phi: PhiFields {
                uuid: id,
                name: metadata.patient_name.clone(),
                mrn: metadata.mrn.clone(),
                dob: metadata.dob.clone(),
                acc: metadata.acc.clone(),
                taskid: metadata.task_id.clone(),
                mode: metadata.mode.clone(),
            },
            status: StatusFields::default(),
            log,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.phi.uuid
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> CaseMetadata {
        CaseMetadata {
            patient_name: "Doe^Jane".to_string(),
            mrn: "MRN-1".to_string(),
            dob: "1970-01-01".to_string(),
            acc: "A1".to_string(),
            task_id: "A1_liver".to_string(),
            mode: "GRASP".to_string(),
        }
    }

    #[test]
    fn test_new_record_defaults() {
        let id = TaskId::parse("abc-123").unwrap();
        let record = PhiRecord::new(id, &metadata(), Utc::now());

        assert_eq!(record.status.result, TaskResult::InProcess);
        assert_eq!(record.stats.cost, -1.0);
        assert_eq!(record.stats.shortcode, "ABC");
        assert!(record.log.get(Timepoint::Created).is_some());
        assert_eq!(record.status.delay, None);
    }

    #[test]
    fn test_serialized_keys() {
        let id = TaskId::parse("abc-123").unwrap();
        let mut record = PhiRecord::new(id, &metadata(), Utc::now());
        record.status.result = TaskResult::Success;

        let text = record.to_toml().unwrap();
        assert!(text.contains("[PHI]"));
        assert!(text.contains("ACC = \"A1\""));
        assert!(text.contains("RESULT = \"Success\""));
        assert!(text.contains("RETRY_UPLOAD = 0"));
        assert!(text.contains("DATASIZE_MB = 0"));
        assert!(text.contains("CREATED = "));

        let parsed = PhiRecord::from_toml(&text).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_timepoints_keep_first_value() {
        let mut log = Timepoints::default();
        let first = Utc::now();
        let later = first + chrono::Duration::seconds(30);

        assert!(log.record_once(Timepoint::UploadBegin, first));
        assert!(!log.record_once(Timepoint::UploadBegin, later));
        assert_eq!(log.get(Timepoint::UploadBegin), Some(first));
    }

    #[test]
    fn test_terminal_results() {
        assert!(!TaskResult::InProcess.is_terminal());
        assert!(TaskResult::Success.is_terminal());
        assert!(TaskResult::AbortedStorage.is_terminal());
    }
}
