//! # Transfer
//!
//! File movement between storage locations.

pub mod copy;

pub use copy::{CopyError, CopyOutcome, CopySettings, FileCopier, ReliableCopy, StdFileCopier};
