//! # Storage Layer
//!
//! Storage roots, task identity, the PHI record store and free-space probing.
//! All task state lives in these four directories; there is no separate status store.

pub mod disk_space;
pub mod phi_store;
pub mod roots;
pub mod task_id;

pub use disk_space::{FixedFreeSpace, FreeSpaceProbe, SystemFreeSpace};
pub use phi_store::{LockWait, PhiStore};
pub use roots::{RootError, RootKind, StorageRoots};
pub use task_id::{InvalidTaskId, TaskId};
