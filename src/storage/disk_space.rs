use std::path::Path;
use sysinfo::Disks;
use tracing::debug;

/// Source of free-space information for a destination directory
pub trait FreeSpaceProbe: Send + Sync {
    /// Available bytes on the volume holding `dir`, or `None` when unknown
    fn available_bytes(&self, dir: &Path) -> Option<u64>;
}

/// Queries the mounted volumes of the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFreeSpace;

impl FreeSpaceProbe for SystemFreeSpace {
    fn available_bytes(&self, dir: &Path) -> Option<u64> {
        let target = dir.canonicalize().ok()?;
        let disks = Disks::new_with_refreshed_list();

        // The longest matching mount point is the volume that holds the directory
        let available = disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space());

        debug!(
            path = %target.display(),
            available_bytes = ?available,
            "Queried free disk space"
        );

        available
    }
}

/// Fixed answer, for destinations whose capacity is managed elsewhere
#[derive(Debug, Clone, Copy)]
pub struct FixedFreeSpace(pub Option<u64>);

impl FreeSpaceProbe for FixedFreeSpace {
    fn available_bytes(&self, _dir: &Path) -> Option<u64> {
        self.0
    }
}
