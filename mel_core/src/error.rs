//! Errors raised while setting up or running the control loop.

use mel_common::config::ConfigError;
use mel_daq::DaqError;
use mel_shared_memory::ShmError;
use thiserror::Error;

/// Errors during RT setup, timer construction or loop execution.
#[derive(Debug, Error)]
pub enum LoopError {
    /// RT system call failed
    #[error("RT setup error: {0}")]
    RtSetup(String),

    /// Timer period of zero (frequency 0 Hz)
    #[error("Timer period must be greater than zero")]
    ZeroPeriod,

    /// Hybrid guard interval not shorter than the period
    #[error("Hybrid guard {guard_us}us must be shorter than the period {period_us}us")]
    GuardTooLong {
        /// Guard interval [µs]
        guard_us: u64,
        /// Loop period [µs]
        period_us: u64,
    },

    /// DAQ error outside the tolerated per-cycle I/O failures
    #[error(transparent)]
    Daq(#[from] DaqError),

    /// Shared exchange error while opening the telemetry segment
    #[error(transparent)]
    Shm(#[from] ShmError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Error returned by the application cycle body
    #[error("Cycle body failed: {0}")]
    Body(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_error_display() {
        let err = LoopError::GuardTooLong {
            guard_us: 1500,
            period_us: 1000,
        };
        let msg = format!("{err}");
        assert!(msg.contains("1500"));
        assert!(msg.contains("1000"));
    }
}
