//! # Orchestration
//!
//! Submission, the periodic transfer pipeline and archival. Everything here works
//! through the storage roots; status is always re-derived by the state machine.

pub mod archiver;
pub mod bootstrap;
pub mod pipeline;
pub mod poller;
pub mod services;
pub mod splitter;
pub mod submitter;

pub use archiver::{ArchiveError, ArchiveOutcome, TaskArchiver};
pub use bootstrap::{SystemHandle, SystemServices, TransferSystem};
pub use pipeline::{CycleReport, PipelineSettings, TransferPipeline};
pub use poller::{PollerConfig, PollerStats, TransferPoller};
pub use services::{JobCosts, JobState, ProcessingService, ResultSink, ServiceError};
pub use splitter::{NoScrubbing, PayloadScrubber, PhiSplitter, SplitError, SplitOutcome};
pub use submitter::{
    sanitize_task_id, SubmissionRequest, SubmitError, SubmittedTask, TaskPriority, TaskSubmitter,
};
