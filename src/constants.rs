//! # System Constants
//!
//! File naming conventions, timeouts and event names that define the operational
//! boundaries of the transfer queue. The file names are shared with other clients
//! and agents polling the same storage roots, so changing them breaks interoperability.

use std::time::Duration;

/// File extensions and marker names used across the four storage roots
pub mod files {
    /// Public task descriptor in the outbound queue root
    pub const TASK_EXTENSION: &str = "task";
    /// Descriptor extension for on-premise tasks scheduled for the night queue
    pub const TASK_EXTENSION_NIGHT: &str = "task_night";
    /// Descriptor extension for high-priority on-premise tasks
    pub const TASK_EXTENSION_PRIO: &str = "task_prio";
    /// Writer-in-progress marker colocated with a record
    pub const LOCK_EXTENSION: &str = "lock";
    /// PHI record in the PHI and archive roots
    pub const PHI_EXTENSION: &str = "phi";
    /// De-identified raw scan payload
    pub const PAYLOAD_EXTENSION: &str = "dat";
    /// Temporary file used while replacing a PHI record
    pub const PARTIAL_EXTENSION: &str = "partial";
    /// Marker inside a result directory signalling an interrupted download
    pub const INCOMPLETE_MARKER: &str = "INCOMPLETE";
    /// Upper bound on adjustment file entries read from a descriptor
    pub const MAX_ADJUSTMENT_FILES: usize = 100;
}

/// Default timeouts for blocking operations
pub mod timeouts {
    use super::Duration;

    /// Primary wait for a copy worker before falling back to the secondary loop
    pub const COPY_PRIMARY_WAIT: Duration = Duration::from_secs(15 * 60);
    /// Absolute ceiling for a single file copy
    pub const COPY_CEILING: Duration = Duration::from_secs(60 * 60);
    /// Polling interval of the secondary copy wait loop
    pub const COPY_POLL_INTERVAL: Duration = Duration::from_millis(100);
    /// Reverse lookups can hang on misconfigured resolvers
    pub const DNS_LOOKUP: Duration = Duration::from_secs(6);
    /// Connection probe used to learn the locally routed address
    pub const CONNECT_PROBE: Duration = Duration::from_secs(1);
    /// Synchronous event posts
    pub const EVENT_POST: Duration = Duration::from_secs(5);
    /// Lock markers older than this are treated as left by a crashed writer. Must stay
    /// above `COPY_CEILING`; writers refresh their marker between copies.
    pub const STALE_LOCK_AGE: Duration = Duration::from_secs(2 * 60 * 60);
    /// Longest accepted retry backoff
    pub const MAX_BACKOFF: Duration = Duration::from_secs(30 * 24 * 60 * 60);
}

/// Lifecycle event names published on the event bus
pub mod events {
    pub const TASK_SUBMITTED: &str = "task.submitted";
    pub const TASK_UPLOAD_STARTED: &str = "task.upload_started";
    pub const TASK_UPLOADED: &str = "task.uploaded";
    pub const TASK_UPLOAD_FAILED: &str = "task.upload_failed";
    pub const TASK_DOWNLOAD_STARTED: &str = "task.download_started";
    pub const TASK_DOWNLOADED: &str = "task.downloaded";
    pub const TASK_DOWNLOAD_FAILED: &str = "task.download_failed";
    pub const TASK_PROCESSING_FAILED: &str = "task.processing_failed";
    pub const TASK_STORED: &str = "task.stored";
    pub const TASK_STORAGE_FAILED: &str = "task.storage_failed";
    pub const TASK_ARCHIVED: &str = "task.archived";
    pub const TASK_INTEGRITY_VIOLATION: &str = "task.integrity_violation";
    pub const MAINTENANCE_SWEEP: &str = "maintenance.sweep";
}

/// Datasize in the PHI record is stored in decimal megabytes
pub const BYTES_PER_MB: u64 = 1000 * 1000;

/// Port assumed for the log server when the endpoint carries none
pub const DEFAULT_LOG_SERVER_PORT: u16 = 8080;

/// Path of the event collection resource on the log server
pub const EVENTS_RESOURCE: &str = "Events";
