//! Named shared region: a 64-byte header followed by the payload bytes.
//!
//! Layout of the backing file:
//!
//! ```text
//! [ SegmentHeader (64 bytes) | payload (capacity bytes) ]
//! ```
//!
//! The logical payload size lives in the header, never in the payload.

use crate::error::{ShmError, ShmResult};
use crate::lock::NamedLock;
use crate::platform::{SegmentPaths, get_current_pid, map_segment, open_segment_file};
use memmap2::MmapMut;
use mel_common::consts::MAX_MELSHARE_CAPACITY;
use static_assertions::const_assert_eq;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Magic bytes identifying an initialized region.
pub const SEGMENT_MAGIC: [u8; 8] = *b"MELSHARE";

/// Size of the header preceding the payload.
pub const HEADER_SIZE: usize = 64;

/// Lock budget for open/close bookkeeping. Not on the real-time path.
const LIFECYCLE_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Reopen attempts when the lock file is unlinked under a waiting opener.
const STALE_LOCK_RETRIES: usize = 8;

/// Segment header, shared between all attached processes.
#[repr(C)]
pub struct SegmentHeader {
    /// Always [`SEGMENT_MAGIC`] once initialized
    pub magic: [u8; 8],
    /// Payload capacity in bytes, fixed by the first opener
    pub capacity: u64,
    /// Logical payload size in bytes
    pub size: AtomicU64,
    /// Write sequence: odd while a write is in progress
    pub sequence: AtomicU64,
    /// Attached handles across all processes
    pub handles: AtomicU32,
    /// PID of the last completed writer
    pub last_writer_pid: AtomicU32,
    /// Completed writes since creation
    pub write_count: AtomicU64,
    _reserved: [u8; 16],
}

const_assert_eq!(std::mem::size_of::<SegmentHeader>(), HEADER_SIZE);

/// One mapped, lock-protected region.
pub struct SharedRegion {
    name: String,
    paths: SegmentPaths,
    lock: NamedLock,
    mmap: MmapMut,
    capacity: usize,
    lock_timeout: Duration,
}

impl SharedRegion {
    /// Attach to region `name` in `dir`, creating it with `capacity` bytes
    /// when absent. An existing region keeps its own capacity.
    pub fn open_or_create(
        dir: &Path,
        name: &str,
        capacity: usize,
        lock_timeout: Duration,
    ) -> ShmResult<Self> {
        if capacity == 0 || capacity > MAX_MELSHARE_CAPACITY {
            return Err(ShmError::InvalidCapacity { capacity });
        }
        Self::open_inner(dir, name, Some(capacity), lock_timeout)
    }

    /// Attach to an existing region only.
    pub fn attach(dir: &Path, name: &str, lock_timeout: Duration) -> ShmResult<Self> {
        let paths = SegmentPaths::new(dir, name);
        if !paths.data.exists() {
            return Err(ShmError::NotFound {
                name: name.to_string(),
            });
        }
        Self::open_inner(dir, name, None, lock_timeout)
    }

    fn open_inner(
        dir: &Path,
        name: &str,
        create_capacity: Option<usize>,
        lock_timeout: Duration,
    ) -> ShmResult<Self> {
        let paths = SegmentPaths::new(dir, name);

        for _ in 0..STALE_LOCK_RETRIES {
            let lock = NamedLock::open(&paths.lock, name)?;
            let Some((mmap, capacity)) = map_locked(&paths, &lock, name, create_capacity)? else {
                debug!("Region '{}' lock file was unlinked while waiting; reopening", name);
                continue;
            };
            return Ok(Self {
                name: name.to_string(),
                paths,
                lock,
                mmap,
                capacity,
                lock_timeout,
            });
        }
        Err(ShmError::LockTimeout {
            name: name.to_string(),
            timeout: LIFECYCLE_LOCK_TIMEOUT,
        })
    }

    fn header(&self) -> &SegmentHeader {
        header_of(&self.mmap)
    }

    /// Region name (without prefix).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Logical size of the last completed write.
    pub fn size(&self) -> usize {
        (self.header().size.load(Ordering::Acquire) as usize).min(self.capacity)
    }

    /// Number of completed writes since the region was created.
    pub fn write_count(&self) -> u64 {
        self.header().write_count.load(Ordering::Acquire)
    }

    /// PID of the last process that completed a write (0 if none).
    pub fn last_writer_pid(&self) -> u32 {
        self.header().last_writer_pid.load(Ordering::Acquire)
    }

    /// Handles currently attached across all processes.
    pub fn handle_count(&self) -> u32 {
        self.header().handles.load(Ordering::Acquire)
    }

    /// Replace the payload with `bytes`.
    ///
    /// Oversized input fails before the lock is taken, leaving the
    /// previous payload untouched.
    pub fn write(&mut self, bytes: &[u8]) -> ShmResult<()> {
        if bytes.len() > self.capacity {
            return Err(ShmError::CapacityExceeded {
                name: self.name.clone(),
                size: bytes.len(),
                capacity: self.capacity,
            });
        }

        let base = self.mmap.as_mut_ptr();
        let _guard = self.lock.acquire(self.lock_timeout)?;

        // SAFETY: see `header`.
        let header = unsafe { &*(base as *const SegmentHeader) };
        let seq = header.sequence.load(Ordering::Acquire) | 1;
        header.sequence.store(seq, Ordering::Release);

        // SAFETY: bytes.len() <= capacity and the payload starts at
        // HEADER_SIZE inside a mapping of HEADER_SIZE + capacity bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(HEADER_SIZE), bytes.len());
        }

        header.size.store(bytes.len() as u64, Ordering::Release);
        header
            .last_writer_pid
            .store(get_current_pid(), Ordering::Release);
        header.write_count.fetch_add(1, Ordering::AcqRel);
        header.sequence.store(seq.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Run `f` on the current payload while the lock is held.
    pub fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> ShmResult<R> {
        let _guard = self.lock.acquire(self.lock_timeout)?;
        let header = self.header();

        if header.sequence.load(Ordering::Acquire) & 1 == 1 {
            return Err(ShmError::TornWrite {
                name: self.name.clone(),
            });
        }

        let size = (header.size.load(Ordering::Acquire) as usize).min(self.capacity);
        Ok(f(&self.mmap[HEADER_SIZE..HEADER_SIZE + size]))
    }

    /// Copy up to `out.len()` bytes of the current payload into `out`.
    ///
    /// Returns the number of bytes copied, `min(out.len(), size)`.
    pub fn read(&self, out: &mut [u8]) -> ShmResult<usize> {
        self.with_payload(|payload| {
            let n = out.len().min(payload.len());
            out[..n].copy_from_slice(&payload[..n]);
            n
        })
    }

    /// Copy the whole current payload into a new vector.
    pub fn read_all(&self) -> ShmResult<Vec<u8>> {
        self.with_payload(|payload| payload.to_vec())
    }

    /// Unlink the backing files of region `name` regardless of open handles.
    pub fn remove(dir: &Path, name: &str) -> ShmResult<()> {
        let paths = SegmentPaths::new(dir, name);
        for path in [&paths.data, &paths.lock] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        let guard = match self.lock.acquire(LIFECYCLE_LOCK_TIMEOUT) {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Region '{}' closed without lock: {}", self.name, e);
                self.header().handles.fetch_sub(1, Ordering::AcqRel);
                return;
            }
        };

        let previous = self.header().handles.fetch_sub(1, Ordering::AcqRel);
        if previous <= 1 {
            // A waiter blocked on this lock file finds it unlinked and reopens.
            for path in [&self.paths.data, &self.paths.lock] {
                if let Err(e) = std::fs::remove_file(path)
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to unlink {} of region '{}': {}", path.display(), self.name, e);
                }
            }
            debug!("Last handle closed, region '{}' unlinked", self.name);
        }
        drop(guard);
    }
}

/// Under the lifecycle lock: map (creating if allowed) the data file and
/// count the new handle. `None` when the lock file was unlinked meanwhile.
fn map_locked(
    paths: &SegmentPaths,
    lock: &NamedLock,
    name: &str,
    create_capacity: Option<usize>,
) -> ShmResult<Option<(MmapMut, usize)>> {
    let _guard = lock.acquire(LIFECYCLE_LOCK_TIMEOUT)?;
    if !lock.is_linked(&paths.lock)? {
        return Ok(None);
    }

    let file = open_segment_file(&paths.data, name, create_capacity.is_some())?;
    let len = file.metadata()?.len() as usize;

    let (mmap, capacity) = if len == 0 {
        let Some(capacity) = create_capacity else {
            return Err(ShmError::NotFound {
                name: name.to_string(),
            });
        };
        file.set_len((HEADER_SIZE + capacity) as u64)?;
        let mut mmap = map_segment(&file)?;
        init_header(&mut mmap, capacity);
        debug!("Created region '{}' with capacity {} bytes", name, capacity);
        (mmap, capacity)
    } else {
        let mmap = map_segment(&file)?;
        let capacity = validate_header(&mmap, name, len)?;
        if let Some(requested) = create_capacity
            && requested != capacity
        {
            debug!(
                "Region '{}' exists with capacity {} (requested {}); keeping existing",
                name, capacity, requested
            );
        }
        (mmap, capacity)
    };

    header_of(&mmap).handles.fetch_add(1, Ordering::AcqRel);
    Ok(Some((mmap, capacity)))
}

fn header_of(mmap: &MmapMut) -> &SegmentHeader {
    // SAFETY: the mapping is page aligned and at least HEADER_SIZE long
    // (checked on open); every mutable header field is atomic.
    unsafe { &*(mmap.as_ptr() as *const SegmentHeader) }
}

fn init_header(mmap: &mut MmapMut, capacity: usize) {
    // SAFETY: freshly sized mapping of HEADER_SIZE + capacity bytes that no
    // other handle can observe yet (the lifecycle lock is held).
    let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut SegmentHeader) };
    header.magic = SEGMENT_MAGIC;
    header.capacity = capacity as u64;
    header.size = AtomicU64::new(0);
    header.sequence = AtomicU64::new(0);
    header.handles = AtomicU32::new(0);
    header.last_writer_pid = AtomicU32::new(0);
    header.write_count = AtomicU64::new(0);
    header._reserved = [0; 16];
}

fn validate_header(mmap: &MmapMut, name: &str, file_len: usize) -> ShmResult<usize> {
    let invalid = || ShmError::InvalidHeader {
        name: name.to_string(),
    };
    if file_len < HEADER_SIZE {
        return Err(invalid());
    }
    let header = header_of(mmap);
    if header.magic != SEGMENT_MAGIC {
        return Err(invalid());
    }
    let capacity = usize::try_from(header.capacity).map_err(|_| invalid())?;
    match HEADER_SIZE.checked_add(capacity) {
        Some(end) if end <= file_len => Ok(capacity),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(5);

    #[test]
    fn test_header_layout() {
        assert_eq!(std::mem::size_of::<SegmentHeader>(), 64);
        assert_eq!(std::mem::align_of::<SegmentHeader>(), 8);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = SharedRegion::open_or_create(dir.path(), "r", 16, TIMEOUT).unwrap();
        region.write(&[1, 2, 3]).unwrap();

        let mut out = [0u8; 8];
        assert_eq!(region.read(&mut out).unwrap(), 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert_eq!(region.write_count(), 1);
        assert_eq!(region.last_writer_pid(), std::process::id());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = SharedRegion::open_or_create(dir.path(), "z", 0, TIMEOUT);
        assert!(matches!(result, Err(ShmError::InvalidCapacity { capacity: 0 })));
    }

    #[test]
    fn test_odd_sequence_reports_torn_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = SharedRegion::open_or_create(dir.path(), "t", 8, TIMEOUT).unwrap();
        region.write(&[9; 8]).unwrap();

        region.header().sequence.fetch_add(1, Ordering::AcqRel);
        let mut out = [0u8; 8];
        assert!(matches!(region.read(&mut out), Err(ShmError::TornWrite { .. })));

        region.write(&[7; 8]).unwrap();
        assert_eq!(region.read(&mut out).unwrap(), 8);
        assert_eq!(out, [7; 8]);
    }

    #[test]
    fn test_last_handle_unlinks_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SegmentPaths::new(dir.path(), "l");
        let first = SharedRegion::open_or_create(dir.path(), "l", 8, TIMEOUT).unwrap();
        let second = SharedRegion::attach(dir.path(), "l", TIMEOUT).unwrap();
        assert_eq!(first.handle_count(), 2);

        drop(second);
        assert!(paths.lock.exists());
        drop(first);
        assert!(!paths.data.exists());
        assert!(!paths.lock.exists());
    }

    #[test]
    fn test_reopen_after_unlink_creates_fresh_region() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut region = SharedRegion::open_or_create(dir.path(), "f", 8, TIMEOUT).unwrap();
            region.write(&[5; 4]).unwrap();
        }
        let region = SharedRegion::open_or_create(dir.path(), "f", 8, TIMEOUT).unwrap();
        assert_eq!(region.size(), 0);
        assert_eq!(region.handle_count(), 1);
    }

    #[test]
    fn test_with_payload_sees_logical_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = SharedRegion::open_or_create(dir.path(), "p", 16, TIMEOUT).unwrap();
        region.write(&[1, 2, 3, 4, 5]).unwrap();
        let sum = region
            .with_payload(|bytes| bytes.iter().map(|&b| b as u32).sum::<u32>())
            .unwrap();
        assert_eq!(sum, 15);
    }

    #[test]
    fn test_capacity_overflowing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = vec![0u8; 128];
        bytes[..8].copy_from_slice(&SEGMENT_MAGIC);
        bytes[8..16].copy_from_slice(&u64::MAX.to_ne_bytes());
        std::fs::write(dir.path().join("mel_wrap"), bytes).unwrap();

        let result = SharedRegion::attach(dir.path(), "wrap", TIMEOUT);
        assert!(matches!(result, Err(ShmError::InvalidHeader { .. })));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mel_junk"), vec![0xAB; 128]).unwrap();
        let result = SharedRegion::attach(dir.path(), "junk", TIMEOUT);
        assert!(matches!(result, Err(ShmError::InvalidHeader { .. })));
    }
}
