//! # MEL Core
//!
//! Loop timing and the periodic control loop that ties DAQ hardware and
//! MelShare segments together.
//!
//! ## Module Structure
//!
//! - [`timer`] - Drift-free periodic `Timer` (busy, sleep or hybrid wait)
//! - [`cycle`] - `CycleStats` and real-time process setup
//! - [`control_loop`] - `ControlLoop`: input, body, output, watchdog, wait
//! - [`waveform`] - Test signals and an integrator for scope demos
//! - [`config`] - `LoopConfig` / `AppConfig` TOML configuration
//! - [`error`] - `LoopError`
//!
//! ## Example
//!
//! ```rust
//! use mel_core::timer::{Timer, WaitMode};
//! use std::time::Duration;
//!
//! let mut timer = Timer::new(Duration::from_millis(1), WaitMode::Hybrid)?;
//! timer.start();
//! for _ in 0..5 {
//!     timer.wait();
//! }
//! assert_eq!(timer.ticks(), 5);
//! # Ok::<(), mel_core::error::LoopError>(())
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod control_loop;
pub mod cycle;
pub mod error;
pub mod timer;
pub mod waveform;

pub use config::{AppConfig, LoopConfig};
pub use control_loop::{ControlLoop, Cycle, LoopSummary, StopReason};
pub use cycle::{CycleStats, rt_setup};
pub use error::LoopError;
pub use timer::{Timer, WaitMode, WaitStatus};
