//! # Reliable Copy
//!
//! Whole-file copy between storage locations with a destination collision check,
//! a free-space precheck, a worker thread so the caller stays responsive, bounded
//! waiting and post-copy size verification.
//!
//! Failures never roll back: whatever the underlying copy left at the destination
//! stays there for inspection.

use crate::constants::timeouts;
use crate::logging::log_transfer_operation;
use crate::storage::FreeSpaceProbe;
use crossbeam::channel::{self, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// The underlying copy primitive
pub trait FileCopier: Send + Sync {
    /// Copy `from` to `to`, returning the number of bytes written
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
}

/// Plain filesystem copy. The destination is created exclusively and never
/// overwritten; an existing file fails with `ErrorKind::AlreadyExists`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileCopier;

impl FileCopier for StdFileCopier {
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let mut source = fs::File::open(from)?;
        let mut destination = OpenOptions::new().write(true).create_new(true).open(to)?;
        let bytes = io::copy(&mut source, &mut destination)?;
        destination.sync_all()?;
        Ok(bytes)
    }
}

/// Wait bounds for a single copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySettings {
    /// Wait for the worker before falling back to polling
    pub primary_timeout: Duration,
    /// Absolute bound on the whole copy
    pub ceiling: Duration,
    pub poll_interval: Duration,
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            primary_timeout: timeouts::COPY_PRIMARY_WAIT,
            ceiling: timeouts::COPY_CEILING,
            poll_interval: timeouts::COPY_POLL_INTERVAL,
        }
    }
}

/// Non-failure outcomes of a copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied { bytes: u64 },
    /// Destination existed already; treated as "already submitted" and left untouched
    AlreadyExists { destination: PathBuf },
    /// Not attempted because the destination volume is too small
    InsufficientSpace { required: u64, available: u64 },
}

impl CopyOutcome {
    pub fn is_copied(&self) -> bool {
        matches!(self, Self::Copied { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("Source file not found: {}", .path.display())]
    SourceMissing { path: PathBuf },

    #[error("Copying {} to {} failed: {error}", .from.display(), .to.display())]
    Io {
        from: PathBuf,
        to: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error(
        "Size mismatch copying {} to {}: expected {expected} bytes, found {actual}",
        .from.display(),
        .to.display()
    )]
    SizeMismatch {
        from: PathBuf,
        to: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Copying {} to {} did not finish within {waited:?}", .from.display(), .to.display())]
    TimedOut {
        from: PathBuf,
        to: PathBuf,
        waited: Duration,
    },

    #[error("Copy worker for {} exited without reporting", .to.display())]
    WorkerLost { to: PathBuf },
}

impl CopyError {
    /// Size mismatches are integrity faults; everything else is transient
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::SizeMismatch { .. })
    }
}

#[derive(Clone)]
pub struct ReliableCopy {
    copier: Arc<dyn FileCopier>,
    space: Arc<dyn FreeSpaceProbe>,
    settings: CopySettings,
}

impl std::fmt::Debug for ReliableCopy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableCopy")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ReliableCopy {
    pub fn new(
        copier: Arc<dyn FileCopier>,
        space: Arc<dyn FreeSpaceProbe>,
        settings: CopySettings,
    ) -> Self {
        Self {
            copier,
            space,
            settings,
        }
    }

    pub fn settings(&self) -> &CopySettings {
        &self.settings
    }

    /// Copy `from` to `to`, blocking the calling thread until the copy ends
    pub fn copy(&self, from: &Path, to: &Path) -> Result<CopyOutcome, CopyError> {
        let expected = match fs::metadata(from) {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            Ok(_) => {
                return Err(CopyError::SourceMissing {
                    path: from.to_path_buf(),
                })
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(CopyError::SourceMissing {
                    path: from.to_path_buf(),
                })
            }
            Err(error) => {
                return Err(CopyError::Io {
                    from: from.to_path_buf(),
                    to: to.to_path_buf(),
                    error,
                })
            }
        };

        if to.exists() {
            warn!(destination = %to.display(), "Destination already exists, not overwriting");
            return Ok(CopyOutcome::AlreadyExists {
                destination: to.to_path_buf(),
            });
        }

        let destination_dir = to.parent().unwrap_or_else(|| Path::new("."));
        match self.space.available_bytes(destination_dir) {
            Some(available) if available < expected => {
                warn!(
                    destination = %to.display(),
                    required = expected,
                    available = available,
                    "Insufficient free space at destination"
                );
                return Ok(CopyOutcome::InsufficientSpace {
                    required: expected,
                    available,
                });
            }
            Some(_) => {}
            None => {
                warn!(
                    destination = %destination_dir.display(),
                    "Free space unknown, attempting copy anyway"
                );
            }
        }

        debug!(
            source = %from.display(),
            destination = %to.display(),
            bytes = expected,
            "Starting copy worker"
        );

        let started = Instant::now();
        match self.run_worker(from, to) {
            Ok(()) => {}
            // Another writer created the destination after the check above
            Err(CopyError::Io { error, .. }) if error.kind() == io::ErrorKind::AlreadyExists => {
                warn!(destination = %to.display(), "Destination appeared during copy, not overwriting");
                return Ok(CopyOutcome::AlreadyExists {
                    destination: to.to_path_buf(),
                });
            }
            Err(error) => return Err(error),
        }

        let actual = fs::metadata(to)
            .map_err(|error| CopyError::Io {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                error,
            })?
            .len();

        if actual != expected {
            error!(
                source = %from.display(),
                destination = %to.display(),
                expected = expected,
                actual = actual,
                "Copied file size does not match source"
            );
            return Err(CopyError::SizeMismatch {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                expected,
                actual,
            });
        }

        debug!(source = %from.display(), destination = %to.display(), "Copy verified");
        log_transfer_operation(
            "copy",
            None,
            Some(actual),
            Some(started.elapsed().as_millis() as u64),
            "verified",
        );

        Ok(CopyOutcome::Copied { bytes: actual })
    }

    /// Async wrapper that runs the blocking copy on the blocking pool
    pub async fn copy_async(&self, from: PathBuf, to: PathBuf) -> Result<CopyOutcome, CopyError> {
        let this = self.clone();
        let destination = to.clone();
        tokio::task::spawn_blocking(move || this.copy(&from, &to))
            .await
            .unwrap_or(Err(CopyError::WorkerLost { to: destination }))
    }

    fn run_worker(&self, from: &Path, to: &Path) -> Result<(), CopyError> {
        let (sender, receiver) = channel::bounded::<io::Result<u64>>(1);
        let copier = Arc::clone(&self.copier);
        let (worker_from, worker_to) = (from.to_path_buf(), to.to_path_buf());

        std::thread::Builder::new()
            .name("reliable-copy".to_string())
            .spawn(move || {
                let result = copier.copy(&worker_from, &worker_to);
                // The receiver may have timed out already
                let _ = sender.send(result);
            })
            .map_err(|error| CopyError::Io {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                error,
            })?;

        let started = Instant::now();
        let primary = self.settings.primary_timeout.min(self.settings.ceiling);

        let result = match receiver.recv_timeout(primary) {
            Ok(result) => result,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CopyError::WorkerLost { to: to.to_path_buf() })
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    destination = %to.display(),
                    waited_secs = primary.as_secs(),
                    "Copy still running after primary wait, polling until ceiling"
                );
                loop {
                    let waited = started.elapsed();
                    if waited >= self.settings.ceiling {
                        error!(
                            destination = %to.display(),
                            waited_secs = waited.as_secs(),
                            "Copy exceeded ceiling, partial destination left in place"
                        );
                        return Err(CopyError::TimedOut {
                            from: from.to_path_buf(),
                            to: to.to_path_buf(),
                            waited,
                        });
                    }
                    match receiver.recv_timeout(self.settings.poll_interval) {
                        Ok(result) => break result,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            return Err(CopyError::WorkerLost { to: to.to_path_buf() })
                        }
                    }
                }
            }
        };

        result.map(|_| ()).map_err(|error| CopyError::Io {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            error,
        })
    }
}

impl Default for ReliableCopy {
    fn default() -> Self {
        Self::new(
            Arc::new(StdFileCopier),
            Arc::new(crate::storage::SystemFreeSpace),
            CopySettings::default(),
        )
    }
}
