//! Out-of-band hint naming the task this process is currently transferring.
//!
//! Only the process holding the hint can refine `Processing` into `Uploading`,
//! `Downloading` or `Storage`; other processes polling the same roots see the
//! unrefined status.

use crate::storage::TaskId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerOperation {
    Upload,
    Download,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerActivity {
    pub task_id: TaskId,
    pub operation: WorkerOperation,
}

/// Shared handle to the current worker activity
#[derive(Debug, Clone, Default)]
pub struct ActiveJob {
    current: Arc<RwLock<Option<WorkerActivity>>>,
}

impl ActiveJob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `task_id` as being handled until the returned guard is dropped
    pub fn begin(&self, task_id: TaskId, operation: WorkerOperation) -> ActiveJobGuard {
        *self.current.write() = Some(WorkerActivity { task_id, operation });
        ActiveJobGuard { job: self.clone() }
    }

    pub fn current(&self) -> Option<WorkerActivity> {
        self.current.read().clone()
    }

    pub fn hint_for(&self, id: &TaskId) -> Option<WorkerOperation> {
        self.current
            .read()
            .as_ref()
            .filter(|activity| &activity.task_id == id)
            .map(|activity| activity.operation)
    }

    fn clear(&self) {
        *self.current.write() = None;
    }
}

/// Clears the active job on drop
#[derive(Debug)]
pub struct ActiveJobGuard {
    job: ActiveJob,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.job.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_only_for_active_task() {
        let job = ActiveJob::new();
        let id = TaskId::parse("abc-123").unwrap();
        let other = TaskId::parse("xyz").unwrap();

        assert_eq!(job.hint_for(&id), None);
        {
            let _guard = job.begin(id.clone(), WorkerOperation::Download);
            assert_eq!(job.hint_for(&id), Some(WorkerOperation::Download));
            assert_eq!(job.hint_for(&other), None);
        }
        assert_eq!(job.current(), None);
    }
}
