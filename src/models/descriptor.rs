//! # Task Descriptor
//!
//! The public, PHI-free record describing a task's processing parameters. It is
//! published into the outbound root as `<id>.task` and polled by the remote worker.

use crate::constants::files::MAX_ADJUSTMENT_FILES;
use crate::storage::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full descriptor as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    #[serde(rename = "Task")]
    pub task: TaskSection,
    /// Adjustment file names keyed by index, plus `OriginalName_<n>` entries
    #[serde(rename = "AdjustmentFiles", default)]
    pub adjustment_files: BTreeMap<String, String>,
    #[serde(rename = "Information")]
    pub information: InformationSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskSection {
    pub recon_mode: String,
    #[serde(rename = "ACC", default, skip_serializing_if = "Option::is_none")]
    pub acc: Option<String>,
    #[serde(rename = "EMailNotification", default)]
    pub email_notification: String,
    pub scan_file: String,
    #[serde(default)]
    pub adjustment_files_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub scan_protocol: String,
    #[serde(default)]
    pub recon_name: String,
    #[serde(default)]
    pub param_value: i64,
    #[serde(default)]
    pub required_server_type: String,
    #[serde(rename = "UUID", default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InformationSection {
    pub system_name: String,
    pub scan_file_size: u64,
    pub task_date: String,
    pub task_time: String,
    pub selected_server: String,
    pub system_vendor: String,
    pub system_version: String,
    pub client_name: String,
    pub client_version: String,
}

/// Processing parameters chosen at submission time
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconSettings {
    pub recon_mode: String,
    pub recon_name: String,
    pub scan_protocol: String,
    pub param_value: i64,
    pub required_server_type: String,
    pub email_notification: String,
}

/// Identity of the submitting system and client
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    pub system_name: String,
    pub system_vendor: String,
    pub system_version: String,
    pub client_name: String,
    pub client_version: String,
    pub selected_server: String,
}

/// One adjustment file as placed in the outbound root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentFile {
    pub file_name: String,
    pub original_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Unable to parse task descriptor: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unable to serialize task descriptor: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl TaskDescriptor {
    /// Descriptor for a cloud-routed task: carries the UUID and never any PHI
    pub fn for_cloud(
        id: &TaskId,
        settings: &ReconSettings,
        client: &ClientInfo,
        scan_file: impl Into<String>,
        scan_file_size: u64,
        adjustments: &[AdjustmentFile],
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut descriptor = Self::base(settings, client, scan_file, scan_file_size, adjustments, created_at);
        descriptor.task.uuid = Some(id.clone());
        descriptor
    }

    /// Descriptor for an on-premise server, which is trusted with ACC and patient name
    #[allow(clippy::too_many_arguments)]
    pub fn for_on_premise(
        acc: impl Into<String>,
        patient_name: impl Into<String>,
        settings: &ReconSettings,
        client: &ClientInfo,
        scan_file: impl Into<String>,
        scan_file_size: u64,
        adjustments: &[AdjustmentFile],
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut descriptor = Self::base(settings, client, scan_file, scan_file_size, adjustments, created_at);
        descriptor.task.acc = Some(acc.into());
        descriptor.task.patient_name = Some(patient_name.into());
        descriptor
    }

    fn base(
        settings: &ReconSettings,
        client: &ClientInfo,
        scan_file: impl Into<String>,
        scan_file_size: u64,
        adjustments: &[AdjustmentFile],
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut adjustment_files = BTreeMap::new();
        for (index, file) in adjustments.iter().enumerate() {
            adjustment_files.insert(index.to_string(), file.file_name.clone());
            adjustment_files.insert(format!("OriginalName_{index}"), file.original_name.clone());
        }

        Self {
            task: TaskSection {
                recon_mode: settings.recon_mode.clone(),
                acc: None,
                email_notification: settings.email_notification.clone(),
                scan_file: scan_file.into(),
                adjustment_files_count: adjustments.len(),
                patient_name: None,
                scan_protocol: settings.scan_protocol.clone(),
                recon_name: settings.recon_name.clone(),
                param_value: settings.param_value,
                required_server_type: settings.required_server_type.clone(),
                uuid: None,
            },
            adjustment_files,
            information: InformationSection {
                system_name: client.system_name.clone(),
                scan_file_size,
                task_date: created_at.format("%d/%m/%Y").to_string(),
                task_time: created_at.format("%H:%M:%S").to_string(),
                selected_server: client.selected_server.clone(),
                system_vendor: client.system_vendor.clone(),
                system_version: client.system_version.clone(),
                client_name: client.client_name.clone(),
                client_version: client.client_version.clone(),
            },
        }
    }

    pub fn is_cloud(&self) -> bool {
        self.task.uuid.is_some()
    }

    /// Adjustment file names in index order; missing indices are skipped
    pub fn adjustment_file_names(&self) -> Vec<String> {
        let count = self.task.adjustment_files_count.min(MAX_ADJUSTMENT_FILES);
        (0..count)
            .filter_map(|index| self.adjustment_files.get(&index.to_string()).cloned())
            .collect()
    }

    /// Ordered payload list; the primary scan comes first
    pub fn payload_files(&self) -> Vec<String> {
        std::iter::once(self.task.scan_file.clone())
            .chain(self.adjustment_file_names())
            .collect()
    }

    pub fn to_toml(&self) -> Result<String, DescriptorError> {
        Ok(toml::to_string(self)?)
    }

    pub fn from_toml(text: &str) -> Result<Self, DescriptorError> {
        Ok(toml::from_str(text)?)
    }
}
