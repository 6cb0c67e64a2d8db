//! # Lock Markers
//!
//! A lock marker is a small file colocated with the record it protects. Its existence
//! alone means "writer in progress". Acquisition uses exclusive create so two writers
//! can never both believe they hold it.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Record is locked by another writer: {}", .path.display())]
    Busy { path: PathBuf },

    #[error("Unable to create lock marker {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
}

/// Held lock marker; removed when released or dropped
#[derive(Debug)]
pub struct LockMarker {
    path: PathBuf,
    released: bool,
}

impl LockMarker {
    /// Create the marker or fail immediately if it already exists
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Lock marker busy");
                return Err(LockError::Busy { path });
            }
            Err(error) => return Err(LockError::Io { path, error }),
        };

        // Owner details are informational only; the marker is valid even if this fails
        if let Err(error) = write_owner(&mut file) {
            debug!(path = %path.display(), error = %error, "Unable to write lock owner details");
        }

        Ok(Self {
            path,
            released: false,
        })
    }

    /// Retry acquisition a bounded number of times, sleeping between attempts
    pub fn acquire_with_wait(
        path: impl Into<PathBuf>,
        attempts: u32,
        interval: Duration,
    ) -> Result<Self, LockError> {
        let path = path.into();
        let attempts = attempts.max(1);

        for attempt in 1..=attempts {
            match Self::acquire(path.clone()) {
                Err(LockError::Busy { .. }) if attempt < attempts => {
                    std::thread::sleep(interval);
                }
                result => return result,
            }
        }

        Err(LockError::Busy { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the marker so its age restarts. Long-running writers call this between
    /// steps; fails if the marker was removed underneath the holder.
    pub fn refresh(&self) -> Result<(), LockError> {
        let io_error = |error| LockError::Io {
            path: self.path.clone(),
            error,
        };

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(io_error)?;
        write_owner(&mut file).map_err(io_error)?;
        file.sync_all().map_err(io_error)
    }

    /// Remove the marker. Removal failure is logged; a leftover marker is cleared by
    /// the stale lock sweep.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "Unable to remove lock marker");
            }
        }
    }
}

impl Drop for LockMarker {
    fn drop(&mut self) {
        self.remove();
    }
}

fn write_owner(file: &mut fs::File) -> io::Result<()> {
    writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339())
}

pub fn is_held(path: &Path) -> bool {
    path.exists()
}

/// Age of a lock marker, if it exists and its modification time is readable
pub fn age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}
