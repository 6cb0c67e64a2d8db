//! Boundaries to the remote processing service and to result destinations.
//!
//! Both are opaque collaborators: the pipeline only asks them to accept a payload,
//! report a job state, deliver a result, or store one.

use crate::models::PhiRecord;
use crate::state_machine::ScheduledTask;
use crate::storage::TaskId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Remote job state as reported by the processing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Ready,
    Failed,
}

/// Billing information reported with a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCosts {
    pub cost: f64,
    pub shortcode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Worth retrying after backoff
    #[error("Service temporarily unavailable: {0}")]
    Transient(String),

    /// The service refused the request
    #[error("Service rejected request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ProcessingService: Send + Sync {
    /// Hand the task's payload files to the service
    async fn submit(&self, task: &ScheduledTask) -> Result<(), ServiceError>;

    async fn job_state(&self, id: &TaskId) -> Result<JobState, ServiceError>;

    /// Write the task's result files into `destination`
    async fn download(&self, id: &TaskId, destination: &Path) -> Result<(), ServiceError>;

    async fn job_costs(&self, _id: &TaskId) -> Option<JobCosts> {
        None
    }
}

/// Destination for downloaded results. Receives the PHI record so identifying
/// fields can be re-inserted at the destination, never earlier.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(
        &self,
        id: &TaskId,
        result_dir: &Path,
        record: &PhiRecord,
    ) -> Result<(), ServiceError>;
}
