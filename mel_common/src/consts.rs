//! Workspace-wide constants.
//!
//! Single source of truth for default sizes, rates and timeouts. Imported by
//! all crates, no duplication permitted.

/// Default capacity of a shared exchange segment in bytes.
pub const DEFAULT_MELSHARE_CAPACITY: usize = 256;

/// Largest capacity accepted for a shared exchange segment (64 MiB).
pub const MAX_MELSHARE_CAPACITY: usize = 64 * 1024 * 1024;

/// Directory holding shared exchange segments on Linux.
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// File name prefix of every shared exchange segment.
pub const MELSHARE_PREFIX: &str = "mel_";

/// Default bounded wait for the exchange lock on the real-time path [µs].
pub const DEFAULT_LOCK_TIMEOUT_US: u64 = 1_000;

/// Default control loop frequency [Hz].
pub const DEFAULT_LOOP_FREQUENCY_HZ: u64 = 1_000;

/// Default guard interval spun at the end of a hybrid wait [µs].
pub const DEFAULT_HYBRID_GUARD_US: u64 = 200;

/// Default watchdog timeout [ms].
pub const DEFAULT_WATCHDOG_TIMEOUT_MS: u64 = 100;

/// Default number of channels on each module bank of a DAQ.
pub const DEFAULT_CHANNEL_COUNT: u32 = 8;
