//! Status derivation from the storage roots.
//!
//! First match wins:
//!
//! | Condition                                   | Status      |
//! |---------------------------------------------|-------------|
//! | lock marker in the outbound root            | Preparing   |
//! | PHI record absent, record in archive root   | Archived    |
//! | PHI record absent                           | not a task  |
//! | descriptor in the outbound root             | Scheduled   |
//! | complete result directory in inbound root   | Storage     |
//! | worker hint for the id                      | Uploading, Downloading or Storage |
//! | otherwise                                   | Processing  |
//!
//! The hint only ever refines what would otherwise read as `Processing`.

use super::states::TaskStatus;
use super::worker_hint::WorkerOperation;
use crate::storage::{StorageRoots, TaskId};

pub fn derive_status(
    roots: &StorageRoots,
    id: &TaskId,
    hint: Option<WorkerOperation>,
) -> Option<TaskStatus> {
    if roots.outbound_lock_path(id).exists() {
        return Some(TaskStatus::Preparing);
    }

    if !roots.phi_record_path(id).is_file() {
        return roots
            .archive_record_path(id)
            .is_file()
            .then_some(TaskStatus::Archived);
    }

    if roots.descriptor_path(id).is_file() {
        return Some(TaskStatus::Scheduled);
    }

    if has_complete_result(roots, id) {
        return Some(TaskStatus::Storage);
    }

    Some(match hint {
        Some(WorkerOperation::Upload) => TaskStatus::Uploading,
        Some(WorkerOperation::Download) => TaskStatus::Downloading,
        Some(WorkerOperation::Storage) => TaskStatus::Storage,
        None => TaskStatus::Processing,
    })
}

/// Result directory present and not flagged as an interrupted download
pub fn has_complete_result(roots: &StorageRoots, id: &TaskId) -> bool {
    roots.result_dir(id).is_dir() && !roots.incomplete_marker_path(id).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, StorageRoots, TaskId) {
        let dir = TempDir::new().unwrap();
        let roots = StorageRoots::under(dir.path());
        roots.ensure_exists().unwrap();
        (dir, roots, TaskId::parse("abc-123").unwrap())
    }

    #[test]
    fn test_precedence_table() {
        let (_dir, roots, id) = setup();

        assert_eq!(derive_status(&roots, &id, None), None);

        fs::write(roots.phi_record_path(&id), "").unwrap();
        assert_eq!(derive_status(&roots, &id, None), Some(TaskStatus::Processing));

        fs::create_dir(roots.result_dir(&id)).unwrap();
        assert_eq!(derive_status(&roots, &id, None), Some(TaskStatus::Storage));

        fs::write(roots.descriptor_path(&id), "").unwrap();
        assert_eq!(derive_status(&roots, &id, None), Some(TaskStatus::Scheduled));

        fs::write(roots.outbound_lock_path(&id), "").unwrap();
        assert_eq!(derive_status(&roots, &id, None), Some(TaskStatus::Preparing));
    }

    #[test]
    fn test_lock_wins_even_without_phi_record() {
        let (_dir, roots, id) = setup();
        fs::write(roots.outbound_lock_path(&id), "").unwrap();
        assert_eq!(derive_status(&roots, &id, None), Some(TaskStatus::Preparing));
    }

    #[test]
    fn test_incomplete_result_is_not_storage() {
        let (_dir, roots, id) = setup();
        fs::write(roots.phi_record_path(&id), "").unwrap();
        fs::create_dir(roots.result_dir(&id)).unwrap();
        fs::write(roots.incomplete_marker_path(&id), "").unwrap();

        assert_eq!(derive_status(&roots, &id, None), Some(TaskStatus::Processing));
    }

    #[test]
    fn test_archived_record() {
        let (_dir, roots, id) = setup();
        fs::write(roots.archive_record_path(&id), "").unwrap();
        assert_eq!(derive_status(&roots, &id, None), Some(TaskStatus::Archived));
    }

    #[test]
    fn test_hint_refines_processing_only() {
        let (_dir, roots, id) = setup();
        fs::write(roots.phi_record_path(&id), "").unwrap();

        assert_eq!(
            derive_status(&roots, &id, Some(WorkerOperation::Upload)),
            Some(TaskStatus::Uploading)
        );
        assert_eq!(
            derive_status(&roots, &id, Some(WorkerOperation::Download)),
            Some(TaskStatus::Downloading)
        );
        assert_eq!(
            derive_status(&roots, &id, Some(WorkerOperation::Storage)),
            Some(TaskStatus::Storage)
        );
    }

    #[test]
    fn test_descriptor_and_result_outrank_hint() {
        let (_dir, roots, id) = setup();
        fs::write(roots.phi_record_path(&id), "").unwrap();
        fs::write(roots.descriptor_path(&id), "").unwrap();

        assert_eq!(
            derive_status(&roots, &id, Some(WorkerOperation::Upload)),
            Some(TaskStatus::Scheduled)
        );

        fs::remove_file(roots.descriptor_path(&id)).unwrap();
        fs::create_dir(roots.result_dir(&id)).unwrap();
        assert_eq!(
            derive_status(&roots, &id, Some(WorkerOperation::Download)),
            Some(TaskStatus::Storage)
        );
    }
}
