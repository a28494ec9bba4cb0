//! Cross-process named lock built on `flock(2)`.
//!
//! Every region owns a companion `.lock` file. Holding an exclusive `flock`
//! on it serializes access across processes and across separate handles in
//! one process (each handle opens its own file description). The kernel
//! drops the lock when the holder exits, so a crashed writer cannot leave
//! readers blocked.

use crate::error::{ShmError, ShmResult};
use crate::platform::open_segment_file;
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::trace;

/// Exclusive lock on a named lock file.
#[derive(Debug)]
pub struct NamedLock {
    file: File,
    name: String,
}

/// RAII guard; the lock is released on drop.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a NamedLock,
}

impl NamedLock {
    /// Open (creating if absent) the lock file at `path`.
    pub fn open(path: &Path, name: &str) -> ShmResult<Self> {
        let file = open_segment_file(path, name, true)?;
        Ok(Self {
            file,
            name: name.to_string(),
        })
    }

    /// Acquire the lock, polling until `timeout` elapses.
    ///
    /// A zero timeout makes exactly one attempt. Returns
    /// [`ShmError::LockTimeout`] when the lock stays held by someone else.
    pub fn acquire(&self, timeout: Duration) -> ShmResult<LockGuard<'_>> {
        let start = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            if self.try_flock(libc::LOCK_EX)? {
                trace!("lock '{}' acquired after {} attempts", self.name, attempts + 1);
                return Ok(LockGuard { lock: self });
            }

            attempts += 1;
            if start.elapsed() >= timeout {
                return Err(ShmError::LockTimeout {
                    name: self.name.clone(),
                    timeout,
                });
            }

            // Spin briefly, then give the holder the CPU.
            if attempts < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Whether `path` still names the file this lock was opened on.
    ///
    /// The last handle of a region unlinks the lock file; a lock taken on an
    /// unlinked file excludes nobody who opens the path afterwards.
    pub fn is_linked(&self, path: &Path) -> ShmResult<bool> {
        let held = self.file.metadata()?;
        match std::fs::metadata(path) {
            Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// One non-blocking `flock` attempt. `Ok(false)` means held elsewhere.
    fn try_flock(&self, operation: libc::c_int) -> ShmResult<bool> {
        loop {
            // SAFETY: the descriptor is owned by `self.file` and stays open
            // for the lifetime of `self`.
            let rc = unsafe { libc::flock(self.file.as_raw_fd(), operation | libc::LOCK_NB) };
            if rc == 0 {
                return Ok(true);
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EWOULDBLOCK) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(ShmError::Io { source: err }),
            }
        }
    }

    fn release(&self) {
        // SAFETY: see `try_flock`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_description_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mel_t.lock");
        let first = NamedLock::open(&path, "t").unwrap();
        let second = NamedLock::open(&path, "t").unwrap();

        let guard = first.acquire(Duration::ZERO).unwrap();
        let blocked = second.acquire(Duration::from_millis(2));
        assert!(matches!(blocked, Err(ShmError::LockTimeout { .. })));

        drop(guard);
        assert!(second.acquire(Duration::ZERO).is_ok());
    }

    #[test]
    fn test_is_linked_tracks_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mel_u.lock");
        let lock = NamedLock::open(&path, "u").unwrap();
        assert!(lock.is_linked(&path).unwrap());

        std::fs::remove_file(&path).unwrap();
        assert!(!lock.is_linked(&path).unwrap());

        // A fresh file at the same path is a different lock.
        let _fresh = NamedLock::open(&path, "u").unwrap();
        assert!(!lock.is_linked(&path).unwrap());
    }

    #[test]
    fn test_lock_released_when_holder_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mel_c.lock");
        let waiter = NamedLock::open(&path, "c").unwrap();
        {
            let holder = NamedLock::open(&path, "c").unwrap();
            // Leak the guard: only closing the descriptor releases the lock.
            std::mem::forget(holder.acquire(Duration::ZERO).unwrap());
        }
        assert!(waiter.acquire(Duration::from_millis(10)).is_ok());
    }
}
