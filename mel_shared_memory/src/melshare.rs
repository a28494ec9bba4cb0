//! MelShare: a named data region paired with a message region.

use crate::element::{Element, decode_into, encode_into};
use crate::error::{ShmError, ShmResult};
use crate::segment::SharedRegion;
use mel_common::consts::{DEFAULT_LOCK_TIMEOUT_US, DEFAULT_MELSHARE_CAPACITY, DEFAULT_SHM_DIR};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Suffix of the companion message region.
const MESSAGE_SUFFIX: &str = "_msg";

/// Where segments live and how long the real-time path may wait for a lock.
#[derive(Debug, Clone)]
pub struct ShmOptions {
    /// Directory holding the backing files
    pub dir: PathBuf,
    /// Bounded wait for the lock on every read and write
    pub lock_timeout: Duration,
}

impl Default for ShmOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_SHM_DIR),
            lock_timeout: Duration::from_micros(DEFAULT_LOCK_TIMEOUT_US),
        }
    }
}

impl ShmOptions {
    /// Default options rooted at `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Override the lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

/// Handle onto a named shared exchange segment.
///
/// Every handle opened on the same name (in this or another process) sees
/// the same bytes. The segment's files are unlinked when the last handle
/// anywhere is dropped.
pub struct MelShare {
    name: String,
    data: SharedRegion,
    message: SharedRegion,
    scratch: Vec<u8>,
}

impl MelShare {
    /// Open `name` with the default capacity in the default directory.
    pub fn open(name: &str) -> ShmResult<Self> {
        Self::open_with(name, DEFAULT_MELSHARE_CAPACITY, &ShmOptions::default())
    }

    /// Open `name`, creating it with `capacity` bytes if absent.
    ///
    /// If the segment already exists its capacity wins.
    pub fn open_with(name: &str, capacity: usize, options: &ShmOptions) -> ShmResult<Self> {
        validate_name(name)?;
        let data = SharedRegion::open_or_create(&options.dir, name, capacity, options.lock_timeout)?;
        let message = SharedRegion::open_or_create(
            &options.dir,
            &message_name(name),
            data.capacity(),
            options.lock_timeout,
        )?;
        info!(
            "MelShare '{}' opened (capacity {} bytes, {} handles)",
            name,
            data.capacity(),
            data.handle_count()
        );
        Ok(Self::from_regions(name, data, message))
    }

    /// Attach to `name` only if some handle already created it.
    pub fn attach(name: &str, options: &ShmOptions) -> ShmResult<Self> {
        validate_name(name)?;
        let data = SharedRegion::attach(&options.dir, name, options.lock_timeout)?;
        let message = SharedRegion::open_or_create(
            &options.dir,
            &message_name(name),
            data.capacity(),
            options.lock_timeout,
        )?;
        debug!("Attached to MelShare '{}'", name);
        Ok(Self::from_regions(name, data, message))
    }

    fn from_regions(name: &str, data: SharedRegion, message: SharedRegion) -> Self {
        let scratch = Vec::with_capacity(data.capacity());
        Self {
            name: name.to_string(),
            data,
            message,
            scratch,
        }
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity of the data region in bytes.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Logical size of the last completed data write in bytes.
    pub fn size(&self) -> usize {
        self.data.size()
    }

    /// Handles attached to the data region across all processes.
    pub fn handle_count(&self) -> u32 {
        self.data.handle_count()
    }

    /// Number of completed data writes.
    pub fn write_count(&self) -> u64 {
        self.data.write_count()
    }

    /// Replace the data payload with `bytes`.
    pub fn write(&mut self, bytes: &[u8]) -> ShmResult<()> {
        self.data.write(bytes)
    }

    /// Copy `min(out.len(), size())` bytes into `out` and return that count.
    ///
    /// A short count means the writer published less than the caller
    /// expected; comparing sizes is the caller's job.
    pub fn read(&self, out: &mut [u8]) -> ShmResult<usize> {
        self.data.read(out)
    }

    /// Copy the whole data payload.
    pub fn read_bytes(&self) -> ShmResult<Vec<u8>> {
        self.data.read_all()
    }

    /// Publish a slice of primitive values.
    pub fn write_data<T: Element>(&mut self, values: &[T]) -> ShmResult<()> {
        let size = std::mem::size_of_val(values);
        if size > self.data.capacity() {
            return Err(ShmError::CapacityExceeded {
                name: self.name.clone(),
                size,
                capacity: self.data.capacity(),
            });
        }
        encode_into(values, &mut self.scratch);
        self.data.write(&self.scratch)
    }

    /// Fill `out` from the payload and return the number of whole elements read.
    ///
    /// Decodes straight from the mapping; nothing is allocated.
    pub fn read_data<T: Element>(&self, out: &mut [T]) -> ShmResult<usize> {
        self.data.with_payload(|payload| decode_into(payload, out))
    }

    /// Read every whole element currently in the payload.
    pub fn read_vec<T: Element>(&self) -> ShmResult<Vec<T>> {
        self.data.with_payload(|payload| {
            let mut out = vec![T::default(); payload.len() / T::SIZE];
            decode_into(payload, &mut out);
            out
        })
    }

    /// Replace the message string.
    pub fn write_message(&mut self, text: &str) -> ShmResult<()> {
        self.message.write(text.as_bytes())
    }

    /// Read the current message string (empty if none was written).
    pub fn read_message(&self) -> ShmResult<String> {
        let bytes = self.message.read_all()?;
        String::from_utf8(bytes).map_err(|_| ShmError::InvalidMessage {
            name: self.name.clone(),
        })
    }

    /// Unlink the files of segment `name`. Open handles keep their mapping.
    pub fn remove(name: &str, options: &ShmOptions) -> ShmResult<()> {
        validate_name(name)?;
        SharedRegion::remove(&options.dir, name)?;
        SharedRegion::remove(&options.dir, &message_name(name))?;
        info!("MelShare '{}' removed", name);
        Ok(())
    }
}

impl std::fmt::Debug for MelShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelShare")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish()
    }
}

/// Open `name` for one write of `values`.
///
/// The segment is created with room for `values` if no handle exists. The
/// data only outlives this call while another handle keeps the segment open.
pub fn write_map<T: Element>(name: &str, values: &[T], options: &ShmOptions) -> ShmResult<()> {
    let capacity = std::mem::size_of_val(values).max(DEFAULT_MELSHARE_CAPACITY);
    let mut share = MelShare::open_with(name, capacity, options)?;
    share.write_data(values)
}

/// Read `name` into `out`, returning the element count. An absent segment reads as 0.
pub fn read_map<T: Element>(name: &str, out: &mut [T], options: &ShmOptions) -> ShmResult<usize> {
    match MelShare::attach(name, options) {
        Ok(share) => share.read_data(out),
        Err(ShmError::NotFound { .. }) => Ok(0),
        Err(e) => Err(e),
    }
}

/// Open `name` for one message write.
pub fn write_message_to(name: &str, text: &str, options: &ShmOptions) -> ShmResult<()> {
    let capacity = text.len().max(DEFAULT_MELSHARE_CAPACITY);
    let mut share = MelShare::open_with(name, capacity, options)?;
    share.write_message(text)
}

/// Read the message of `name`. An absent segment reads as an empty string.
pub fn read_message_from(name: &str, options: &ShmOptions) -> ShmResult<String> {
    match MelShare::attach(name, options) {
        Ok(share) => share.read_message(),
        Err(ShmError::NotFound { .. }) => Ok(String::new()),
        Err(e) => Err(e),
    }
}

fn message_name(name: &str) -> String {
    format!("{name}{MESSAGE_SUFFIX}")
}

fn validate_name(name: &str) -> ShmResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 200
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ShmError::InvalidName {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(validate_name("scope_1").is_ok());
        assert!(validate_name("a-b").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("has space").is_err());
    }

    #[test]
    fn test_default_options() {
        let options = ShmOptions::default();
        assert_eq!(options.dir, PathBuf::from("/dev/shm"));
        assert_eq!(options.lock_timeout, Duration::from_millis(1));
    }
}
