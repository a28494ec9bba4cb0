//! Error types for shared exchange operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during shared exchange operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Write larger than the segment capacity; the segment is left untouched
    #[error("Write of {size} bytes exceeds capacity of segment '{name}' ({capacity} bytes)")]
    CapacityExceeded {
        /// Segment name
        name: String,
        /// Attempted write size in bytes
        size: usize,
        /// Segment capacity in bytes
        capacity: usize,
    },

    /// Requested capacity is zero or above the workspace limit
    #[error("Invalid segment capacity: {capacity} bytes")]
    InvalidCapacity {
        /// Requested capacity in bytes
        capacity: usize,
    },

    /// Segment name is empty or contains characters unsafe for a file name
    #[error("Invalid segment name: '{name}'")]
    InvalidName {
        /// Rejected name
        name: String,
    },

    /// No process has created the segment yet
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Lock not acquired within the bounded wait; retry next cycle
    #[error("Timed out after {timeout:?} waiting for lock on segment '{name}'")]
    LockTimeout {
        /// Segment name
        name: String,
        /// Wait budget that elapsed
        timeout: Duration,
    },

    /// The previous writer stopped in the middle of a copy
    #[error("Segment '{name}' holds a torn write")]
    TornWrite {
        /// Segment name
        name: String,
    },

    /// Segment file exists but its header is not a MelShare header
    #[error("Segment '{name}' has an invalid header")]
    InvalidHeader {
        /// Segment name
        name: String,
    },

    /// Message region does not hold valid UTF-8
    #[error("Message in segment '{name}' is not valid UTF-8")]
    InvalidMessage {
        /// Segment name
        name: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },
}

impl ShmError {
    /// Whether the failure is transient and the call may succeed next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, ShmError::LockTimeout { .. } | ShmError::TornWrite { .. })
    }
}

/// Result type for shared exchange operations
pub type ShmResult<T> = Result<T, ShmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = ShmError::LockTimeout {
            name: "s".into(),
            timeout: Duration::from_micros(500),
        };
        assert!(timeout.is_transient());

        let capacity = ShmError::CapacityExceeded {
            name: "s".into(),
            size: 81,
            capacity: 80,
        };
        assert!(!capacity.is_transient());
        assert!(capacity.to_string().contains("81"));
    }
}
