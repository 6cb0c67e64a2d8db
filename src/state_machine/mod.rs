// Task state machine
//
// Status is a projection of which files exist in which storage root. This module
// holds the pure derivation, the enumeration and maintenance sweeps over the roots,
// and the retry bookkeeping shared by every phase.

pub mod derive;
pub mod errors;
pub mod retry;
pub mod states;
pub mod task_state_machine;
pub mod worker_hint;

// Re-export main types for convenient access
pub use derive::derive_status;
pub use errors::{PayloadError, StateMachineError, StateMachineResult};
pub use retry::{is_due, BackoffPolicy, RetryLimits, TransferPhase};
pub use states::TaskStatus;
pub use task_state_machine::{PayloadCheck, ScheduledTask, SweepReport, TaskScope, TaskStateMachine};
pub use worker_hint::{ActiveJob, ActiveJobGuard, WorkerActivity, WorkerOperation};
