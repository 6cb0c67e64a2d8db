//! # Publication
//!
//! Lock markers and the lock-protected in-place publication protocol shared by every
//! process polling the outbound root.

pub mod lock;
pub mod publisher;

pub use lock::{LockError, LockMarker};
pub use publisher::{read_ready, AtomicPublisher, PublishError};
