//! # Retry Bookkeeping
//!
//! Per-phase failure counters and the backoff that sets `DELAY` in the PHI record.
//! This layer never decides when to give up; exhaustion limits are supplied
//! explicitly by the caller and are unlimited when absent.

use crate::models::{StatusFields, TaskResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Phase of the lifecycle that can fail and be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Upload,
    Download,
    Storage,
}

impl TransferPhase {
    pub fn counter(&self, status: &StatusFields) -> u32 {
        match self {
            Self::Upload => status.retry_upload,
            Self::Download => status.retry_download,
            Self::Storage => status.retry_storage,
        }
    }

    pub fn counter_mut<'a>(&self, status: &'a mut StatusFields) -> &'a mut u32 {
        match self {
            Self::Upload => &mut status.retry_upload,
            Self::Download => &mut status.retry_download,
            Self::Storage => &mut status.retry_storage,
        }
    }

    /// Terminal result recorded when this phase is given up
    pub fn failure_result(&self) -> TaskResult {
        match self {
            Self::Upload => TaskResult::AbortedTransfer,
            Self::Download => TaskResult::AbortedTransfer,
            Self::Storage => TaskResult::AbortedStorage,
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Download => write!(f, "download"),
            Self::Storage => write!(f, "storage"),
        }
    }
}

/// Exponential backoff: `base * 2^(failures - 1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            max: Duration::from_secs(60 * 60),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay after the given number of consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Earliest time the next attempt may run. Saturates at the latest representable
    /// time instead of overflowing.
    pub fn next_attempt(&self, failures: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.delay_for(failures))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Optional per-phase limits; `None` means retry indefinitely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryLimits {
    pub upload: Option<u32>,
    pub download: Option<u32>,
    pub storage: Option<u32>,
}

impl RetryLimits {
    pub fn limit(&self, phase: TransferPhase) -> Option<u32> {
        match phase {
            TransferPhase::Upload => self.upload,
            TransferPhase::Download => self.download,
            TransferPhase::Storage => self.storage,
        }
    }

    pub fn is_exhausted(&self, phase: TransferPhase, failures: u32) -> bool {
        self.limit(phase).is_some_and(|limit| failures >= limit)
    }
}

/// A failed phase may be reattempted once `now >= DELAY`
pub fn is_due(status: &StatusFields, now: DateTime<Utc>) -> bool {
    status.delay.map_or(true, |delay| now >= delay)
}
