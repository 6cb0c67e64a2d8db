//! Test environment builders: temporary storage roots with the full component graph
//! wired over them.

#![allow(dead_code)]

use super::fakes::{FakeProcessingService, RecordingSink};
use chrono::Utc;
use recon_transfer::constants::{files, timeouts};
use recon_transfer::events::EventPublisher;
use recon_transfer::models::{
    AdjustmentFile, CaseMetadata, ClientInfo, ReconSettings, TaskDescriptor,
};
use recon_transfer::orchestration::{
    NoScrubbing, PhiSplitter, PipelineSettings, SubmissionRequest, TaskArchiver, TaskSubmitter,
    TransferPipeline,
};
use recon_transfer::publish::AtomicPublisher;
use recon_transfer::state_machine::{ActiveJob, BackoffPolicy, RetryLimits, TaskStateMachine};
use recon_transfer::storage::{FixedFreeSpace, LockWait, PhiStore, StorageRoots, TaskId};
use recon_transfer::transfer::{CopySettings, ReliableCopy, StdFileCopier};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Four storage roots under a temporary directory, plus the components over them
pub struct TestEnvironment {
    pub dir: TempDir,
    pub roots: StorageRoots,
    pub store: PhiStore,
    pub machine: TaskStateMachine,
    pub events: EventPublisher,
    pub copy: ReliableCopy,
    pub service: Arc<FakeProcessingService>,
    pub sink: Arc<RecordingSink>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_lock_wait(LockWait::default())
    }

    /// Environment whose PHI store gives up on a held record lock after `lock_wait`
    pub fn with_lock_wait(lock_wait: LockWait) -> Self {
        let dir = TempDir::new().unwrap();
        let roots = StorageRoots::under(dir.path().join("roots"));
        roots.ensure_exists().unwrap();

        let store = PhiStore::new(roots.clone(), lock_wait);
        let machine = TaskStateMachine::new(store.clone(), ActiveJob::new());
        let copy = ReliableCopy::new(
            Arc::new(StdFileCopier),
            Arc::new(FixedFreeSpace(None)),
            CopySettings::default(),
        );

        Self {
            dir,
            roots,
            store,
            machine,
            events: EventPublisher::default(),
            copy,
            service: Arc::new(FakeProcessingService::new()),
            sink: Arc::new(RecordingSink::new()),
        }
    }

    pub fn splitter(&self) -> PhiSplitter {
        PhiSplitter::new(self.store.clone(), self.copy.clone(), Arc::new(NoScrubbing))
    }

    pub fn archiver(&self) -> TaskArchiver {
        TaskArchiver::new(self.store.clone(), self.events.clone())
    }

    pub fn submitter(&self) -> TaskSubmitter {
        TaskSubmitter::new(
            self.roots.clone(),
            self.splitter(),
            self.copy.clone(),
            self.archiver(),
            self.events.clone(),
        )
    }

    pub fn pipeline(&self, settings: PipelineSettings) -> TransferPipeline {
        TransferPipeline::new(
            self.machine.clone(),
            self.service.clone(),
            self.sink.clone(),
            self.events.clone(),
            settings,
        )
    }

    /// Source files of a case outside the storage roots
    pub fn scan_request(&self, adjustments: usize) -> SubmissionRequest {
        let source = self.dir.path().join("scanner");
        fs::create_dir_all(&source).unwrap();

        let scan_file = source.join("meas_MID00042_Doe_John.dat");
        fs::write(&scan_file, vec![7u8; 4096]).unwrap();

        let adjustment_files = (0..adjustments)
            .map(|n| {
                let path = source.join(format!("adjust_{n}.dat"));
                fs::write(&path, vec![n as u8; 128]).unwrap();
                path
            })
            .collect();

        SubmissionRequest {
            scan_file,
            adjustment_files,
            metadata: case_metadata(),
            settings: ReconSettings {
                recon_mode: "GRASP".to_string(),
                recon_name: "Liver dynamic".to_string(),
                scan_protocol: "t1_vibe".to_string(),
                param_value: 4,
                required_server_type: "gpu".to_string(),
                email_notification: String::new(),
            },
            client: ClientInfo {
                system_name: "MR-3T-North".to_string(),
                client_name: "recon-client".to_string(),
                client_version: "1.0".to_string(),
                ..ClientInfo::default()
            },
        }
    }

    /// Split and publish a cloud task under a fixed id
    pub fn schedule_task(&self, id: &str) -> TaskId {
        let id = TaskId::parse(id).unwrap();
        let request = self.scan_request(1);

        let split = self
            .splitter()
            .split_with_id(
                id.clone(),
                &request.scan_file,
                &request.adjustment_files,
                &request.metadata,
            )
            .unwrap();

        let adjustments: Vec<AdjustmentFile> = split.payload_files[1..]
            .iter()
            .map(|file_name| AdjustmentFile {
                file_name: file_name.clone(),
                original_name: "adjust_0.dat".to_string(),
            })
            .collect();

        let descriptor = TaskDescriptor::for_cloud(
            &id,
            &request.settings,
            &request.client,
            split.payload_files[0].clone(),
            4096,
            &adjustments,
            Utc::now(),
        );
        AtomicPublisher::new()
            .publish_descriptor(&self.roots.outbound, &id, files::TASK_EXTENSION, &descriptor)
            .unwrap();

        id
    }

    pub fn path_exists(&self, path: impl AsRef<Path>) -> bool {
        path.as_ref().exists()
    }

    pub fn outbound_entries(&self) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.roots.outbound)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        entries.sort();
        entries
    }
}

pub fn case_metadata() -> CaseMetadata {
    CaseMetadata {
        patient_name: "Doe^John".to_string(),
        mrn: "MRN0042".to_string(),
        dob: "19700101".to_string(),
        acc: "ACC0042".to_string(),
        task_id: "Liver 42".to_string(),
        mode: "cloud".to_string(),
    }
}

/// Retries become due immediately
pub fn immediate_retry_settings(limits: RetryLimits) -> PipelineSettings {
    PipelineSettings {
        max_tasks_per_cycle: 10,
        backoff: BackoffPolicy::new(Duration::ZERO, Duration::ZERO),
        limits,
        stale_lock_age: timeouts::STALE_LOCK_AGE,
    }
}
