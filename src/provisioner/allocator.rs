//! Local Volume Allocator
//!
//! Backs each volume with a directory under the export root. Directories are
//! created with mode `0071`: no access for the owner or others beyond
//! traversal, full access for the group. Traversal is what the kubelet needs
//! to stat the mount point during unmount.

use crate::domain::ports::VolumeStore;
use crate::error::{Error, Result};
use nix::sys::statvfs::statvfs;
use nix::unistd::{chown, Gid};
use std::fs::{self, DirBuilder, Permissions};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Permission bits of every volume directory
pub const VOLUME_DIR_MODE: u32 = 0o071;

/// [`VolumeStore`] creating directories on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalVolumeAllocator {
    export_dir: PathBuf,
}

impl LocalVolumeAllocator {
    /// Create an allocator rooted at `export_dir`
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Bytes available to unprivileged users on the export filesystem
    pub fn available_bytes(&self) -> Result<u64> {
        let stat = statvfs(self.export_dir.as_path()).map_err(|e| {
            Error::filesystem(&self.export_dir, format!("statfs failed: {}", e))
        })?;

        #[allow(clippy::unnecessary_cast)]
        let available = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
        Ok(available)
    }
}

impl VolumeStore for LocalVolumeAllocator {
    fn create(&self, name: &str, capacity_bytes: u64) -> Result<PathBuf> {
        let path = self.export_dir.join(name);
        if fs::symlink_metadata(&path).is_ok() {
            return Err(Error::filesystem(&path, "the path already exists"));
        }

        let available = self.available_bytes()?;
        if capacity_bytes > available {
            return Err(Error::InsufficientCapacity {
                requested: capacity_bytes,
                available,
            });
        }

        DirBuilder::new()
            .recursive(true)
            .mode(VOLUME_DIR_MODE)
            .create(&path)
            .map_err(|e| Error::filesystem(&path, format!("error creating dir for volume: {}", e)))?;

        // The mode passed to mkdir is filtered by the umask
        if let Err(e) = fs::set_permissions(&path, Permissions::from_mode(VOLUME_DIR_MODE)) {
            if let Err(re) = remove_volume_dir(&path) {
                error!("Failed to remove {} after chmod failure: {}", path.display(), re);
            }
            return Err(Error::filesystem(&path, format!("chmod failed: {}", e)));
        }

        info!(
            "Created volume directory {} ({} of {} bytes available requested)",
            path.display(),
            capacity_bytes,
            available
        );
        Ok(path)
    }

    fn assign_group(&self, path: &Path, gid: u32) -> Result<()> {
        chown(path, None, Some(Gid::from_raw(gid)))
            .map_err(|e| Error::filesystem(path, format!("chgrp {} failed: {}", gid, e)))?;

        debug!("Set group of {} to {}", path.display(), gid);
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        remove_volume_dir(path).map_err(|e| Error::filesystem(path, e))?;

        debug!("Removed volume directory {}", path.display());
        Ok(())
    }
}

/// Volume directories are not listable by their owner, so an empty one is
/// removed without reading it first
fn remove_volume_dir(path: &Path) -> std::io::Result<()> {
    fs::remove_dir(path).or_else(|_| fs::remove_dir_all(path))
}
