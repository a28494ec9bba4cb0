//! Control loop and application configuration.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! instance_name = "bench"
//! log_level = "info"
//!
//! [loop]
//! frequency_hz = 1000
//! wait_mode = "hybrid"
//! telemetry_segment = "telemetry"
//!
//! [daq]
//! name = "q8"
//! driver = "simulation"
//!
//! [daq.channels]
//! analog_input = [0, 1]
//! analog_output = [0, 1]
//!
//! [shm]
//! dir = "/dev/shm"
//! lock_timeout_us = 1000
//! ```

use crate::timer::WaitMode;
use mel_common::config::{ConfigError, SharedConfig, Validate};
use mel_common::consts::{
    DEFAULT_CHANNEL_COUNT, DEFAULT_HYBRID_GUARD_US, DEFAULT_LOCK_TIMEOUT_US,
    DEFAULT_LOOP_FREQUENCY_HZ, DEFAULT_MELSHARE_CAPACITY, DEFAULT_SHM_DIR,
};
use mel_common::frequency::Frequency;
use mel_daq::DaqConfig;
use mel_shared_memory::ShmOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn default_frequency_hz() -> u64 {
    DEFAULT_LOOP_FREQUENCY_HZ
}

fn default_guard_us() -> u64 {
    DEFAULT_HYBRID_GUARD_US
}

fn default_true() -> bool {
    true
}

fn default_max_io_failures() -> u32 {
    10
}

fn default_telemetry_capacity() -> usize {
    DEFAULT_MELSHARE_CAPACITY
}

/// CPU pinning and SCHED_FIFO priority for the loop thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtConfig {
    /// CPU core to pin to
    pub cpu: usize,
    /// SCHED_FIFO priority (1..=99)
    pub priority: i32,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            cpu: 1,
            priority: 80,
        }
    }
}

/// Parameters of the [`crate::control_loop::ControlLoop`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Loop rate [Hz]
    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: u64,
    /// Timer wait strategy
    #[serde(default)]
    pub wait_mode: WaitMode,
    /// Spin interval before each boundary in hybrid mode [µs]
    #[serde(default = "default_guard_us")]
    pub hybrid_guard_us: u64,
    /// End the loop when the watchdog expires
    #[serde(default = "default_true")]
    pub stop_on_watchdog_expiry: bool,
    /// Consecutive failed I/O cycles tolerated; one more ends the loop
    #[serde(default = "default_max_io_failures")]
    pub max_consecutive_io_failures: u32,
    /// MelShare name the loop publishes telemetry to
    #[serde(default)]
    pub telemetry_segment: Option<String>,
    /// Telemetry segment capacity [bytes]
    #[serde(default = "default_telemetry_capacity")]
    pub telemetry_capacity: usize,
    /// Stop after this many seconds; run until stopped if absent
    #[serde(default)]
    pub duration_s: Option<f64>,
    /// Real-time setup; skipped if absent
    #[serde(default)]
    pub rt: Option<RtConfig>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_LOOP_FREQUENCY_HZ,
            wait_mode: WaitMode::default(),
            hybrid_guard_us: DEFAULT_HYBRID_GUARD_US,
            stop_on_watchdog_expiry: true,
            max_consecutive_io_failures: default_max_io_failures(),
            telemetry_segment: None,
            telemetry_capacity: DEFAULT_MELSHARE_CAPACITY,
            duration_s: None,
            rt: None,
        }
    }
}

impl LoopConfig {
    /// Loop rate.
    pub fn frequency(&self) -> Frequency {
        Frequency::hertz(self.frequency_hz)
    }

    /// Hybrid guard interval.
    pub fn hybrid_guard(&self) -> Duration {
        Duration::from_micros(self.hybrid_guard_us)
    }

    /// Run duration, if bounded. `None` for a value [`Duration`] cannot hold.
    pub fn duration(&self) -> Option<Duration> {
        self.duration_s
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }
}

impl Validate for LoopConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.frequency_hz == 0 {
            return Err(ConfigError::ValidationError(
                "loop.frequency_hz must be > 0".into(),
            ));
        }
        let period = self.frequency().to_period();
        if self.wait_mode == WaitMode::Hybrid && self.hybrid_guard() >= period {
            return Err(ConfigError::ValidationError(format!(
                "loop.hybrid_guard_us {} must be shorter than the period {}us",
                self.hybrid_guard_us,
                period.as_micros()
            )));
        }
        if let Some(d) = self.duration_s {
            if !(d.is_finite() && d > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "loop.duration_s must be positive, got {d}"
                )));
            }
            if let Err(e) = Duration::try_from_secs_f64(d) {
                return Err(ConfigError::ValidationError(format!(
                    "loop.duration_s {d} is not a valid duration: {e}"
                )));
            }
        }
        if self.telemetry_segment.is_some() && self.telemetry_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "loop.telemetry_capacity must be > 0".into(),
            ));
        }
        if let Some(rt) = self.rt
            && !(1..=99).contains(&rt.priority)
        {
            return Err(ConfigError::ValidationError(format!(
                "loop.rt.priority {} outside 1..=99",
                rt.priority
            )));
        }
        Ok(())
    }
}

fn default_shm_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SHM_DIR)
}

fn default_lock_timeout_us() -> u64 {
    DEFAULT_LOCK_TIMEOUT_US
}

/// Where MelShare segments live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShmConfig {
    /// Segment directory
    #[serde(default = "default_shm_dir")]
    pub dir: PathBuf,
    /// Lock timeout for every read and write [µs]
    #[serde(default = "default_lock_timeout_us")]
    pub lock_timeout_us: u64,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            dir: default_shm_dir(),
            lock_timeout_us: DEFAULT_LOCK_TIMEOUT_US,
        }
    }
}

impl ShmConfig {
    /// Options for opening segments.
    pub fn options(&self) -> ShmOptions {
        ShmOptions::in_dir(&self.dir).with_lock_timeout(Duration::from_micros(self.lock_timeout_us))
    }
}

fn default_daq() -> DaqConfig {
    DaqConfig::simulated("sim", DEFAULT_CHANNEL_COUNT)
}

/// Top-level configuration of the `mel` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging and instance name
    #[serde(default)]
    pub shared: SharedConfig,
    /// Control loop
    #[serde(default, rename = "loop")]
    pub control: LoopConfig,
    /// DAQ driven by the loop
    #[serde(default = "default_daq")]
    pub daq: DaqConfig,
    /// Shared exchange segments
    #[serde(default)]
    pub shm: ShmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig::default(),
            control: LoopConfig::default(),
            daq: default_daq(),
            shm: ShmConfig::default(),
        }
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.control.validate()?;
        self.daq.validate()?;
        if self.shm.lock_timeout_us == 0 {
            return Err(ConfigError::ValidationError(
                "shm.lock_timeout_us must be > 0".into(),
            ));
        }
        Ok(())
    }
}
