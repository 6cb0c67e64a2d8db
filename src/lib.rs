#![allow(clippy::doc_markdown)] // Allow technical terms like PHI, TOML in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Recon Transfer Core
//!
//! Task lifecycle and transfer queue engine for offloading image reconstruction jobs
//! from a scanner workstation to a processing service.
//!
//! ## Overview
//!
//! A task is a directory-and-file footprint spread over four storage roots. The
//! public outbound root holds de-identified payloads and descriptors, the PHI root
//! holds the protected record of each case, the inbound root receives results and the
//! archive root keeps finished records. Every status is re-derived from what is
//! present on disk, so multiple processes can share the roots without a database.
//!
//! ## Architecture
//!
//! - Submission splits a case into a de-identified payload and a PHI record, then
//!   publishes a descriptor under a lock marker.
//! - A periodic poller runs one transfer cycle at a time: maintenance, upload,
//!   processing status checks with download, and storage of results.
//! - Every terminal outcome goes through the archiver, which moves the PHI record
//!   to the archive root and clears what is left in the other roots.
//! - Lifecycle events are broadcast in process and forwarded to a remote audit log
//!   server whose domain is validated before any event is sent.
//!
//! ## Module Organization
//!
//! - [`storage`] - Roots, task ids, disk space and the PHI record store
//! - [`publish`] - Lock markers and in-place descriptor publication
//! - [`transfer`] - Verified file copy with size-scaled timeouts
//! - [`models`] - Descriptors, PHI records and the derived task view
//! - [`state_machine`] - Status derivation, retry policy and sweeps
//! - [`orchestration`] - Submission, the transfer pipeline, poller and archival
//! - [`audit`] - Domain validation and the secure event logger
//! - [`events`] - In-process lifecycle event bus
//! - [`config`] - Layered TOML and environment configuration
//! - [`error`] - Crate-level error classification
//! - [`logging`] - Structured console and JSON file logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use recon_transfer::config::ConfigLoader;
//! use recon_transfer::logging::init_structured_logging;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().with_file("transfer.toml").load()?;
//! init_structured_logging(&config.logging);
//!
//! let roots = config.storage_roots();
//! roots.ensure_exists()?;
//! println!("Outbound queue at {}", roots.outbound.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod audit;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod publish;
pub mod state_machine;
pub mod storage;
pub mod transfer;

pub use config::{ConfigLoader, ConfigurationError, TransferConfig};
pub use error::{ErrorClass, Result, TransferError};
pub use events::{EventPublisher, LifecycleEvent};
pub use models::{PhiRecord, Task, TaskDescriptor, TaskResult, Timepoint};
pub use orchestration::{
    ProcessingService, ResultSink, SubmissionRequest, TaskArchiver, TaskSubmitter,
    TransferPipeline, TransferPoller, TransferSystem,
};
pub use state_machine::{TaskStateMachine, TaskStatus};
pub use storage::{StorageRoots, TaskId};
