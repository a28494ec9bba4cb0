//! Error types for DAQ operations.

use mel_common::config::ConfigError;
use thiserror::Error;

/// Errors raised by channels, modules, devices and drivers.
#[derive(Debug, Clone, Error)]
pub enum DaqError {
    /// Channel handle does not refer to a live, registered channel
    #[error("Invalid channel {channel} on module '{module}'")]
    InvalidChannel {
        /// Module name (empty for a default channel)
        module: String,
        /// Channel number
        channel: u32,
    },

    /// Channel number listed twice at module construction
    #[error("Duplicate channel {channel} on module '{module}'")]
    DuplicateChannel {
        /// Module name
        module: String,
        /// Channel number
        channel: u32,
    },

    /// Channel number beyond what the hardware provides
    #[error("Channel {channel} out of range on module '{module}' (hardware has {max})")]
    ChannelOutOfRange {
        /// Module name
        module: String,
        /// Channel number
        channel: u32,
        /// Channels available on the hardware
        max: u32,
    },

    /// Range with min greater than max
    #[error("Invalid range on module '{module}' channel {channel}: min {min} > max {max}")]
    InvalidRange {
        /// Module name
        module: String,
        /// Channel number
        channel: u32,
        /// Requested minimum
        min: String,
        /// Requested maximum
        max: String,
    },

    /// Value rejected by a module using the reject policy
    #[error("Value {value} outside [{min}, {max}] on module '{module}' channel {channel}")]
    ValueOutOfRange {
        /// Module name
        module: String,
        /// Channel number
        channel: u32,
        /// Rejected value
        value: String,
        /// Range minimum
        min: String,
        /// Range maximum
        max: String,
    },

    /// Per-channel array length differs from the channel count
    #[error("Expected {expected} values for module '{module}', got {actual}")]
    LengthMismatch {
        /// Module name
        module: String,
        /// Registered channel count
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// Hardware accessed before `open()`
    #[error("Device '{device}' is not open")]
    NotOpen {
        /// Device name
        device: String,
    },

    /// Backend reported a failed hardware transaction
    #[error("Hardware error on '{device}': {reason}")]
    Hardware {
        /// Device or module name
        device: String,
        /// Backend-provided description
        reason: String,
    },

    /// Watchdog deadline passed
    #[error("Watchdog '{name}' expired")]
    WatchdogExpired {
        /// Watchdog name
        name: String,
    },

    /// Watchdog kicked while stopped
    #[error("Watchdog '{name}' is not running")]
    WatchdogNotRunning {
        /// Watchdog name
        name: String,
    },

    /// Driver kind offers no backend for a configured module
    #[error("Driver '{driver}' does not provide {kind} channels")]
    Unsupported {
        /// Driver name
        driver: String,
        /// Module kind
        kind: String,
    },

    /// Driver name not present in the registry
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DaqError {
    /// Shorthand for a backend failure.
    pub fn hardware(device: impl Into<String>, reason: impl Into<String>) -> Self {
        DaqError::Hardware {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for DAQ operations.
pub type DaqResult<T> = Result<T, DaqError>;
