//! Linux-specific shared memory operations

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use mel_common::consts::MELSHARE_PREFIX;
use nix::unistd::getpid;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// File system locations backing one named region.
#[derive(Debug, Clone)]
pub struct SegmentPaths {
    /// Mapped data file (`<dir>/mel_<name>`)
    pub data: PathBuf,
    /// Companion lock file (`<dir>/mel_<name>.lock`)
    pub lock: PathBuf,
}

impl SegmentPaths {
    /// Resolve the paths of region `name` inside `dir`.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            data: dir.join(format!("{MELSHARE_PREFIX}{name}")),
            lock: dir.join(format!("{MELSHARE_PREFIX}{name}.lock")),
        }
    }
}

/// Open a segment file, creating it when `create` is set.
///
/// Maps a missing file to [`ShmError::NotFound`] so callers can tell an
/// unopened segment apart from a real I/O failure.
pub fn open_segment_file(path: &Path, name: &str, create: bool) -> ShmResult<File> {
    OpenOptions::new()
        .create(create)
        .read(true)
        .write(true)
        .mode(0o600) // Owner read/write only
        .open(path)
        .map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ShmError::NotFound {
                    name: name.to_string(),
                }
            } else {
                ShmError::Io { source: e }
            }
        })
}

/// Map the whole file read/write with its pages pre-faulted.
pub fn map_segment(file: &File) -> ShmResult<MmapMut> {
    // SAFETY: the mapping is shared with other processes by design; all
    // access to the mapped bytes goes through the region lock.
    let mmap = unsafe { MmapOptions::new().populate().map_mut(file)? };
    Ok(mmap)
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_use_prefix() {
        let paths = SegmentPaths::new(Path::new("/dev/shm"), "scope");
        assert_eq!(paths.data, PathBuf::from("/dev/shm/mel_scope"));
        assert_eq!(paths.lock, PathBuf::from("/dev/shm/mel_scope.lock"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = open_segment_file(&dir.path().join("absent"), "absent", false);
        assert!(matches!(result, Err(ShmError::NotFound { .. })));
    }

    #[test]
    fn test_current_pid_matches_std() {
        assert_eq!(get_current_pid(), std::process::id());
    }
}
