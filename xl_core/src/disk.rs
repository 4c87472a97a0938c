//! Free-space query for output directories.

use std::path::Path;

use crate::error::{ConvError, Result};

/// Headroom kept on top of twice the input size.
pub const BUFFER_SPACE: u64 = 10 * 1024 * 1024;

pub trait DiskSpace: Send + Sync {
    /// Bytes available to the current user, `None` when unknown.
    fn free_space(&self, path: &Path) -> Option<u64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiskSpace;

impl DiskSpace for SystemDiskSpace {
    fn free_space(&self, path: &Path) -> Option<u64> {
        match fs2::available_space(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to query free space");
                None
            }
        }
    }
}

/// Fails with S2 unless more than `2 * input_size + BUFFER_SPACE` bytes are
/// free. An unknown amount of free space passes.
pub fn ensure_free_space(disk: &dyn DiskSpace, dir: &Path, input_size: u64) -> Result<()> {
    let Some(free) = disk.free_space(dir) else {
        return Ok(());
    };
    let needed = input_size.saturating_mul(2).saturating_add(BUFFER_SPACE);
    if free <= needed {
        return Err(ConvError::file("S2", "No space left on device."));
    }
    Ok(())
}
