//! Periodic control loop over a [`Daq`].
//!
//! Every cycle runs, on one thread:
//!
//! 1. `update_input`: pull all input banks
//! 2. the application body
//! 3. `update_output`: push all output banks, skipped while the watchdog
//!    is expired so the outputs hold their expire values
//! 4. watchdog kick (only after a fully successful cycle) and check
//! 5. telemetry publish to the MelShare segment, if configured
//! 6. [`Timer::wait`] for the next boundary
//!
//! A failed hardware transaction skips the rest of the cycle without
//! kicking the watchdog. Up to `max_consecutive_io_failures` such cycles in
//! a row are tolerated; the next one ends the loop.

use crate::config::LoopConfig;
use crate::cycle::{CycleStats, rt_setup};
use crate::error::LoopError;
use crate::timer::{Timer, WaitMode, WaitStatus};
use mel_common::config::Validate;
use mel_daq::{Daq, DaqError, Device, WatchdogState};
use mel_shared_memory::{MelShare, ShmError, ShmOptions};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Why [`ControlLoop::run`] returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// The stop flag was cleared
    Stopped,
    /// The configured run duration elapsed
    DurationElapsed,
    /// The watchdog expired and the loop is configured to stop on expiry
    WatchdogExpired,
    /// Too many consecutive failed hardware transactions
    IoFailures {
        /// Failures in a row when the loop gave up
        consecutive: u32,
        /// Last hardware error
        last_error: String,
    },
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct LoopSummary {
    /// Why the loop ended
    pub reason: StopReason,
    /// Cycles executed
    pub cycles: u64,
    /// Wall time from start to stop [s]
    pub elapsed_s: f64,
    /// Cycle timing
    pub stats: CycleStats,
    /// Cycles skipped because of a hardware error
    pub io_failures: u64,
    /// Telemetry writes that did not reach the segment
    pub telemetry_drops: u64,
    /// Watchdog expirations during the run
    pub watchdog_expirations: u64,
}

/// View of the current cycle handed to the loop body.
pub struct Cycle<'a> {
    daq: &'a Daq,
    tick: u64,
    time: Duration,
    period: Duration,
    telemetry: &'a mut Vec<f64>,
}

impl<'a> Cycle<'a> {
    /// The DAQ; inputs are fresh, outputs are pushed after the body returns.
    pub fn daq(&self) -> &'a Daq {
        self.daq
    }

    /// Cycle index since the loop started.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Time since the loop started.
    pub fn time(&self) -> Duration {
        self.time
    }

    /// Loop period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Replace the telemetry values written after this cycle.
    pub fn publish(&mut self, values: &[f64]) {
        self.telemetry.clear();
        self.telemetry.extend_from_slice(values);
    }
}

/// Fixed-rate loop driving one [`Daq`].
pub struct ControlLoop {
    config: LoopConfig,
    timer: Timer,
    stats: CycleStats,
    running: Arc<AtomicBool>,
    telemetry: Option<MelShare>,
    telemetry_buf: Vec<f64>,
    telemetry_drops: u64,
}

impl ControlLoop {
    /// Build a loop; opens the telemetry segment under `shm` if configured.
    pub fn new(config: LoopConfig, shm: &ShmOptions) -> Result<Self, LoopError> {
        config.validate()?;

        let mut timer = Timer::from_frequency(config.frequency(), config.wait_mode)?;
        if config.wait_mode == WaitMode::Hybrid {
            timer = timer.with_guard(config.hybrid_guard())?;
        }

        let telemetry = match &config.telemetry_segment {
            Some(name) => Some(MelShare::open_with(name, config.telemetry_capacity, shm)?),
            None => None,
        };
        let telemetry_buf = Vec::with_capacity(config.telemetry_capacity / size_of::<f64>());

        info!(
            "Control loop configured: {} Hz, {:?}, telemetry={:?}",
            config.frequency_hz, config.wait_mode, config.telemetry_segment
        );
        Ok(Self {
            config,
            timer,
            stats: CycleStats::new(),
            running: Arc::new(AtomicBool::new(true)),
            telemetry,
            telemetry_buf,
            telemetry_drops: 0,
        })
    }

    /// Flag that keeps the loop running; store `false` to stop it.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Ask the loop to stop after the current cycle.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Statistics of the last (or current) run.
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Loop timer.
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Configuration in use.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Enable `daq`, run until a stop condition, then disable it.
    ///
    /// An error from `body` ends the loop and is returned after the DAQ has
    /// been disabled.
    pub fn run<F>(&mut self, daq: &mut Daq, mut body: F) -> Result<LoopSummary, LoopError>
    where
        F: FnMut(&mut Cycle<'_>) -> Result<(), LoopError>,
    {
        if let Some(rt) = self.config.rt {
            rt_setup(rt.cpu, rt.priority)?;
        }

        self.stats = CycleStats::new();
        self.telemetry_drops = 0;
        let expirations_before = daq.watchdog().expirations();

        daq.enable()?;
        daq.watchdog_mut().start();
        let origin = self.timer.start();
        info!("Control loop started on DAQ '{}'", daq.name());

        let outcome = self.cycles(daq, &mut body, origin);

        if let Err(e) = daq.disable() {
            warn!("DAQ '{}' disable after loop failed: {}", daq.name(), e);
        }

        let (reason, io_failures) = outcome?;
        let summary = LoopSummary {
            reason,
            cycles: self.stats.cycle_count,
            elapsed_s: origin.elapsed().as_secs_f64(),
            stats: self.stats.clone(),
            io_failures,
            telemetry_drops: self.telemetry_drops,
            watchdog_expirations: daq.watchdog().expirations() - expirations_before,
        };
        info!(
            "Control loop stopped ({:?}) after {} cycles, {} overruns",
            summary.reason, summary.cycles, summary.stats.overruns
        );
        Ok(summary)
    }

    fn cycles<F>(
        &mut self,
        daq: &mut Daq,
        body: &mut F,
        origin: Instant,
    ) -> Result<(StopReason, u64), LoopError>
    where
        F: FnMut(&mut Cycle<'_>) -> Result<(), LoopError>,
    {
        // A deadline past what `Instant` can represent never arrives.
        let deadline = self
            .config
            .duration()
            .and_then(|d| origin.checked_add(d));
        let max_failures = self.config.max_consecutive_io_failures;
        let mut consecutive = 0u32;
        let mut io_failures = 0u64;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Ok((StopReason::Stopped, io_failures));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok((StopReason::DurationElapsed, io_failures));
            }

            let cycle_start = Instant::now();
            let outputs_live = !daq.watchdog().is_expired();
            let io = self.io_cycle(daq, body, outputs_live)?;

            match io {
                Ok(()) => {
                    consecutive = 0;
                    match daq.watchdog_mut().kick() {
                        Ok(()) | Err(DaqError::WatchdogExpired { .. }) => {}
                        Err(e) => warn!("Watchdog kick failed: {}", e),
                    }
                }
                Err(e) => {
                    consecutive += 1;
                    io_failures += 1;
                    error!(
                        "Cycle {} I/O failure ({} in a row): {}",
                        self.timer.ticks(),
                        consecutive,
                        e
                    );
                    // `max_failures` in a row are tolerated.
                    if consecutive > max_failures {
                        return Ok((
                            StopReason::IoFailures {
                                consecutive,
                                last_error: e.to_string(),
                            },
                            io_failures,
                        ));
                    }
                }
            }

            if daq.watchdog_mut().check() == WatchdogState::Expired
                && self.config.stop_on_watchdog_expiry
            {
                return Ok((StopReason::WatchdogExpired, io_failures));
            }

            self.publish_telemetry();

            let busy = cycle_start.elapsed();
            let boundary = self.timer.next_boundary();
            let status = self.timer.wait();
            let latency = Instant::now().saturating_duration_since(boundary);
            if let WaitStatus::Overrun { .. } = status {
                self.stats.record_overrun();
            }
            self.stats.record(busy.as_nanos() as u64, latency.as_nanos() as u64);
        }
    }

    /// Input, body, output. The outer `Result` is fatal, the inner one is a
    /// tolerated hardware failure.
    fn io_cycle<F>(
        &mut self,
        daq: &Daq,
        body: &mut F,
        outputs_live: bool,
    ) -> Result<Result<(), DaqError>, LoopError>
    where
        F: FnMut(&mut Cycle<'_>) -> Result<(), LoopError>,
    {
        if let Err(e) = daq.update_input() {
            return Ok(Err(e));
        }

        let mut cycle = Cycle {
            daq,
            tick: self.timer.ticks(),
            time: self.timer.time(),
            period: self.timer.period(),
            telemetry: &mut self.telemetry_buf,
        };
        body(&mut cycle)?;

        if !outputs_live {
            return Ok(Ok(()));
        }
        Ok(daq.update_output())
    }

    fn publish_telemetry(&mut self) {
        let Some(share) = self.telemetry.as_mut() else {
            return;
        };
        if self.telemetry_buf.is_empty() {
            return;
        }
        match share.write_data(&self.telemetry_buf) {
            Ok(()) => {}
            Err(e @ ShmError::LockTimeout { .. }) => {
                self.telemetry_drops += 1;
                debug!("Telemetry write skipped: {}", e);
            }
            Err(e) => {
                self.telemetry_drops += 1;
                if self.telemetry_drops <= 10 || self.telemetry_drops % 1000 == 0 {
                    warn!("Telemetry write #{} failed: {}", self.telemetry_drops, e);
                }
            }
        }
    }
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("frequency_hz", &self.config.frequency_hz)
            .field("wait_mode", &self.timer.mode())
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("telemetry", &self.config.telemetry_segment)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_serializes_tagged() {
        let json = serde_json::to_string(&StopReason::IoFailures {
            consecutive: 3,
            last_error: "bus".into(),
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"io_failures\""));
        assert!(json.contains("\"consecutive\":3"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LoopConfig {
            frequency_hz: 0,
            ..LoopConfig::default()
        };
        assert!(matches!(
            ControlLoop::new(config, &ShmOptions::default()),
            Err(LoopError::Config(_))
        ));
    }

    #[test]
    fn test_request_stop_clears_flag() {
        let control = ControlLoop::new(LoopConfig::default(), &ShmOptions::default()).unwrap();
        let flag = control.running_flag();
        assert!(flag.load(Ordering::SeqCst));
        control.request_stop();
        assert!(!flag.load(Ordering::SeqCst));
    }
}
