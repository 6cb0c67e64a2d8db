//! # Atomic Publisher
//!
//! Publishes a record into a shared directory so that concurrent pollers never
//! observe a partial write. The lock marker `<id>.lock` is created first, the
//! record is written in place at its final path and flushed, then the marker is
//! removed. Readers skip any record whose marker is present.

use super::lock::{LockError, LockMarker};
use crate::models::{DescriptorError, TaskDescriptor};
use crate::storage::roots::lock_file_name;
use crate::storage::TaskId;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Another writer is publishing {}", .path.display())]
    LockBusy { path: PathBuf },

    #[error(transparent)]
    Lock(LockError),

    #[error("Unable to write record {}: {error}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error(transparent)]
    Serialize(#[from] DescriptorError),
}

impl From<LockError> for PublishError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Busy { path } => Self::LockBusy { path },
            other => Self::Lock(other),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AtomicPublisher;

impl AtomicPublisher {
    pub fn new() -> Self {
        Self
    }

    /// Publish `root/record_name` under the lock marker `root/<id>.lock`.
    ///
    /// Fails immediately when another writer holds the marker. On writer failure the
    /// partial record is removed; the marker is released on every path.
    pub fn publish<F>(
        &self,
        root: &Path,
        id: &TaskId,
        record_name: &str,
        writer: F,
    ) -> Result<PathBuf, PublishError>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let lock = LockMarker::acquire(root.join(lock_file_name(id)))?;
        self.publish_under(lock, id, root.join(record_name), writer)
    }

    /// Publish under a lock marker the caller already holds, e.g. one taken before
    /// the payload was staged so the task reads as preparing throughout
    pub fn publish_under<F>(
        &self,
        lock: LockMarker,
        id: &TaskId,
        destination: PathBuf,
        writer: F,
    ) -> Result<PathBuf, PublishError>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        match write_record(&destination, writer) {
            Ok(()) => {
                lock.release();
                info!(
                    task_id = %id,
                    record = %destination.display(),
                    "📤 PUBLISH: Record published"
                );
                Ok(destination)
            }
            Err(error) => {
                // The partial record goes before the marker so no reader can see it
                if let Err(remove_error) = fs::remove_file(&destination) {
                    if remove_error.kind() != io::ErrorKind::NotFound {
                        warn!(
                            record = %destination.display(),
                            error = %remove_error,
                            "Unable to remove partial record"
                        );
                    }
                }
                lock.release();
                Err(PublishError::Write {
                    path: destination,
                    error,
                })
            }
        }
    }

    /// Serialize and publish a task descriptor as `<id>.<extension>` in the outbound root
    pub fn publish_descriptor(
        &self,
        outbound: &Path,
        id: &TaskId,
        extension: &str,
        descriptor: &TaskDescriptor,
    ) -> Result<PathBuf, PublishError> {
        let text = descriptor.to_toml()?;
        self.publish(outbound, id, &format!("{id}.{extension}"), |sink| {
            sink.write_all(text.as_bytes())
        })
    }

    pub fn publish_descriptor_under(
        &self,
        lock: LockMarker,
        outbound: &Path,
        id: &TaskId,
        extension: &str,
        descriptor: &TaskDescriptor,
    ) -> Result<PathBuf, PublishError> {
        let text = descriptor.to_toml()?;
        self.publish_under(lock, id, outbound.join(format!("{id}.{extension}")), |sink| {
            sink.write_all(text.as_bytes())
        })
    }
}

fn write_record<F>(destination: &Path, writer: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let file = File::create(destination)?;
    let mut buffered = BufWriter::new(file);
    writer(&mut buffered)?;
    buffered.flush()?;
    let file = buffered.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

/// Read a published record if it is ready: lock absent and record present.
/// Both other cases mean "not yet ready" and yield `None`.
pub fn read_ready(root: &Path, id: &TaskId, record_name: &str) -> io::Result<Option<String>> {
    if root.join(lock_file_name(id)).exists() {
        debug!(task_id = %id, "Record locked, skipping this cycle");
        return Ok(None);
    }

    match fs::read_to_string(root.join(record_name)) {
        Ok(text) => Ok(Some(text)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_publish_then_read() {
        let dir = TempDir::new().unwrap();
        let id = TaskId::parse("abc-123").unwrap();
        let publisher = AtomicPublisher::new();

        let path = publisher
            .publish(dir.path(), &id, "abc-123.task", |sink| {
                sink.write_all(b"ScanFile = \"abc-123.dat\"\n")
            })
            .unwrap();

        assert_eq!(path, dir.path().join("abc-123.task"));
        assert!(!dir.path().join("abc-123.lock").exists());
        assert_eq!(
            read_ready(dir.path(), &id, "abc-123.task").unwrap().as_deref(),
            Some("ScanFile = \"abc-123.dat\"\n")
        );
    }

    #[test]
    fn test_busy_lock_fails_without_touching_record() {
        let dir = TempDir::new().unwrap();
        let id = TaskId::parse("abc-123").unwrap();
        fs::write(dir.path().join("abc-123.task"), "in progress").unwrap();
        let _other = LockMarker::acquire(dir.path().join("abc-123.lock")).unwrap();

        let mut called = false;
        let result = AtomicPublisher::new().publish(dir.path(), &id, "abc-123.task", |_| {
            called = true;
            Ok(())
        });

        assert!(matches!(result, Err(PublishError::LockBusy { .. })));
        assert!(!called);
        assert_eq!(
            fs::read_to_string(dir.path().join("abc-123.task")).unwrap(),
            "in progress"
        );
        assert_eq!(read_ready(dir.path(), &id, "abc-123.task").unwrap(), None);
    }

    #[test]
    fn test_writer_failure_releases_lock() {
        let dir = TempDir::new().unwrap();
        let id = TaskId::parse("abc-123").unwrap();

        let result = AtomicPublisher::new().publish(dir.path(), &id, "abc-123.task", |sink| {
            sink.write_all(b"partial")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        });

        assert!(matches!(result, Err(PublishError::Write { .. })));
        assert!(!dir.path().join("abc-123.lock").exists());
        assert!(!dir.path().join("abc-123.task").exists());
    }

    #[test]
    fn test_absent_record_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let id = TaskId::parse("abc-123").unwrap();
        assert_eq!(read_ready(dir.path(), &id, "abc-123.task").unwrap(), None);
    }
}
