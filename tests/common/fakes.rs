//! In-memory stand-ins for the processing service, result destinations and the
//! host resolver.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use recon_transfer::audit::HostResolver;
use recon_transfer::models::PhiRecord;
use recon_transfer::orchestration::{JobCosts, JobState, ProcessingService, ResultSink, ServiceError};
use recon_transfer::state_machine::ScheduledTask;
use recon_transfer::storage::TaskId;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

/// Processing service with scripted job states. The last scripted state of a task
/// repeats once the script runs out; unscripted tasks report `Running`.
#[derive(Debug, Default)]
pub struct FakeProcessingService {
    states: Mutex<HashMap<TaskId, VecDeque<JobState>>>,
    submitted: Mutex<Vec<TaskId>>,
    downloaded: Mutex<Vec<TaskId>>,
    submit_failures: AtomicU32,
    download_failures: AtomicU32,
    costs: Mutex<Option<JobCosts>>,
}

impl FakeProcessingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, id: &TaskId, states: &[JobState]) {
        self.states
            .lock()
            .insert(id.clone(), states.iter().copied().collect());
    }

    /// The next `count` submissions fail with a transient error
    pub fn fail_submissions(&self, count: u32) {
        self.submit_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_downloads(&self, count: u32) {
        self.download_failures.store(count, Ordering::SeqCst);
    }

    pub fn report_costs(&self, cost: f64, shortcode: &str) {
        *self.costs.lock() = Some(JobCosts {
            cost,
            shortcode: shortcode.to_string(),
        });
    }

    pub fn submitted(&self) -> Vec<TaskId> {
        self.submitted.lock().clone()
    }

    pub fn downloaded(&self) -> Vec<TaskId> {
        self.downloaded.lock().clone()
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ProcessingService for FakeProcessingService {
    async fn submit(&self, task: &ScheduledTask) -> Result<(), ServiceError> {
        if take_failure(&self.submit_failures) {
            return Err(ServiceError::Transient("upload connection reset".to_string()));
        }
        self.submitted.lock().push(task.id.clone());
        Ok(())
    }

    async fn job_state(&self, id: &TaskId) -> Result<JobState, ServiceError> {
        let mut states = self.states.lock();
        let Some(script) = states.get_mut(id) else {
            return Ok(JobState::Running);
        };
        let state = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        };
        Ok(state.unwrap_or(JobState::Running))
    }

    async fn download(&self, id: &TaskId, destination: &Path) -> Result<(), ServiceError> {
        if take_failure(&self.download_failures) {
            fs::write(destination.join("partial.dcm"), b"half")
                .map_err(|e| ServiceError::Transient(e.to_string()))?;
            return Err(ServiceError::Transient("download interrupted".to_string()));
        }
        for n in 1..=3 {
            fs::write(destination.join(format!("image_{n}.dcm")), vec![n as u8; 32])
                .map_err(|e| ServiceError::Transient(e.to_string()))?;
        }
        self.downloaded.lock().push(id.clone());
        Ok(())
    }

    async fn job_costs(&self, _id: &TaskId) -> Option<JobCosts> {
        self.costs.lock().clone()
    }
}

/// What a sink received for one task
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub id: TaskId,
    pub files: usize,
    pub accession: String,
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    stored: Mutex<Vec<StoredResult>>,
    failures: AtomicU32,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Vec<StoredResult> {
        self.stored.lock().clone()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn store(
        &self,
        id: &TaskId,
        result_dir: &Path,
        record: &PhiRecord,
    ) -> Result<(), ServiceError> {
        if take_failure(&self.failures) {
            return Err(ServiceError::Transient("PACS not reachable".to_string()));
        }
        let files = fs::read_dir(result_dir)
            .map_err(|e| ServiceError::Transient(e.to_string()))?
            .count();
        self.stored.lock().push(StoredResult {
            id: id.clone(),
            files,
            accession: record.phi.acc.clone(),
        });
        Ok(())
    }
}

/// Resolver answering from a fixed table
#[derive(Debug, Default)]
pub struct ScriptedResolver {
    names: HashMap<String, String>,
}

impl ScriptedResolver {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            names: entries
                .iter()
                .map(|(address, name)| (address.to_string(), name.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl HostResolver for ScriptedResolver {
    async fn resolve(&self, address: &str) -> Option<String> {
        self.names.get(address).cloned()
    }
}
