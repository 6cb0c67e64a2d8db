//! # Data Models
//!
//! Records persisted in the storage roots and the operational task view derived from them.

pub mod descriptor;
pub mod phi_record;
pub mod task;

pub use descriptor::{
    AdjustmentFile, ClientInfo, DescriptorError, InformationSection, ReconSettings,
    TaskDescriptor, TaskSection,
};
pub use phi_record::{
    CaseMetadata, PhiFields, PhiRecord, StatsFields, StatusFields, TaskResult, Timepoint,
    Timepoints,
};
pub use task::{Task, TaskEntry};
