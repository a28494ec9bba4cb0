//! Board diagnostics: loopback identification and I/O throughput.
//!
//! Identification finds which digital channel has its output wired back to
//! the input of the same number, so a physical board can be told apart
//! from its siblings with a single jumper.

use crate::daq::Daq;
use crate::device::Device;
use crate::driver::ModuleKind;
use crate::error::{DaqError, DaqResult};
use crate::module::Module;
use crate::signal::Logic;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// High/low toggles per identification attempt.
pub const IDENTIFY_TOGGLES: usize = 5;

/// Default settle time between writing an output and reading it back.
pub const IDENTIFY_SETTLE: Duration = Duration::from_millis(10);

/// Timing of [`Daq::benchmark`].
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    /// Read/write pairs executed
    pub iterations: u64,
    /// Total wall time [s]
    pub elapsed_s: f64,
    /// Mean `update_input` time [µs]
    pub mean_read_us: f64,
    /// Mean `update_output` time [µs]
    pub mean_write_us: f64,
    /// Read/write pairs per second
    pub rate_hz: f64,
}

impl Daq {
    /// Whether digital output `channel` is looped back to digital input
    /// `channel`.
    ///
    /// Toggles the output high and low [`IDENTIFY_TOGGLES`] times, waiting
    /// `settle` before each readback. The output is left low.
    pub fn identify_channel(&self, channel: u32, settle: Duration) -> DaqResult<bool> {
        let (din, dout) = self.loopback_banks()?;
        self.require_open()?;

        let looped = toggle_readback(din, dout, channel, settle);
        dout.set_value(channel, false)?;
        dout.update_channel(channel)?;
        looped
    }

    /// First channel present in both digital banks that is looped back.
    pub fn identify(&self, settle: Duration) -> DaqResult<Option<u32>> {
        let (din, dout) = self.loopback_banks()?;
        let candidates: Vec<u32> = dout
            .channel_numbers()
            .into_iter()
            .filter(|&c| din.contains(c))
            .collect();

        for channel in candidates {
            if self.identify_channel(channel, settle)? {
                info!("DAQ '{}' identified by loopback on channel {}", self.name(), channel);
                return Ok(Some(channel));
            }
        }
        Ok(None)
    }

    /// Time `iterations` rounds of `update_input` followed by `update_output`.
    pub fn benchmark(&self, iterations: u64) -> DaqResult<BenchmarkReport> {
        let mut read = Duration::ZERO;
        let mut write = Duration::ZERO;
        let start = Instant::now();

        for _ in 0..iterations {
            let t0 = Instant::now();
            self.update_input()?;
            let t1 = Instant::now();
            self.update_output()?;
            read += t1 - t0;
            write += t1.elapsed();
        }

        let elapsed = start.elapsed().as_secs_f64();
        let per = |total: Duration| {
            if iterations == 0 {
                0.0
            } else {
                total.as_secs_f64() * 1e6 / iterations as f64
            }
        };
        let report = BenchmarkReport {
            iterations,
            elapsed_s: elapsed,
            mean_read_us: per(read),
            mean_write_us: per(write),
            rate_hz: if elapsed > 0.0 { iterations as f64 / elapsed } else { 0.0 },
        };
        info!(
            "DAQ '{}' benchmark: {} iterations, read {:.2}us, write {:.2}us",
            self.name(),
            iterations,
            report.mean_read_us,
            report.mean_write_us
        );
        Ok(report)
    }

    fn loopback_banks(&self) -> DaqResult<(&Module<Logic>, &Module<Logic>)> {
        let missing = |kind: ModuleKind| DaqError::Unsupported {
            driver: self.driver_name().to_string(),
            kind: kind.to_string(),
        };
        let din = self
            .digital_input()
            .ok_or_else(|| missing(ModuleKind::DigitalInput))?;
        let dout = self
            .digital_output()
            .ok_or_else(|| missing(ModuleKind::DigitalOutput))?;
        Ok((din, dout))
    }
}

fn toggle_readback(
    din: &Module<Logic>,
    dout: &Module<Logic>,
    channel: u32,
    settle: Duration,
) -> DaqResult<bool> {
    for _ in 0..IDENTIFY_TOGGLES {
        for level in [true, false] {
            dout.set_value(channel, level)?;
            dout.update_channel(channel)?;
            if !settle.is_zero() {
                std::thread::sleep(settle);
            }
            din.update_channel(channel)?;
            if din.get_value(channel)? != level {
                debug!("Channel {} is not looped back", channel);
                return Ok(false);
            }
        }
    }
    Ok(true)
}
