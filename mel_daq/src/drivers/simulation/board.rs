//! Simulated board state shared by the driver, its backends and observers.

use crate::error::{DaqError, DaqResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Pin-level state of the simulated board.
#[derive(Debug)]
pub(crate) struct BoardState {
    pub(crate) open: bool,
    pub(crate) analog_out: Vec<f64>,
    pub(crate) analog_in_override: Vec<Option<f64>>,
    pub(crate) digital_out: Vec<bool>,
    pub(crate) digital_in_override: Vec<Option<bool>>,
    pub(crate) encoder_counts: Vec<f64>,
    pub(crate) encoder_rates: Vec<f64>,
    last_sample: Option<Instant>,
    pending_failures: u32,
    pub(crate) fail_enable: bool,
    transactions: u64,
}

impl BoardState {
    fn new(channels: usize) -> Self {
        Self {
            open: false,
            analog_out: vec![0.0; channels],
            analog_in_override: vec![None; channels],
            digital_out: vec![false; channels],
            digital_in_override: vec![None; channels],
            encoder_counts: vec![0.0; channels],
            encoder_rates: vec![0.0; channels],
            last_sample: None,
            pending_failures: 0,
            fail_enable: false,
            transactions: 0,
        }
    }

    /// Gate every hardware transaction: requires an open session and
    /// consumes one injected failure if any are pending.
    pub(crate) fn begin(&mut self, device: &str) -> DaqResult<()> {
        if !self.open {
            return Err(DaqError::NotOpen {
                device: device.to_string(),
            });
        }
        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return Err(DaqError::hardware(device, "injected transfer failure"));
        }
        self.transactions += 1;
        Ok(())
    }

    /// Analog input reading: override if set, else the AO loopback.
    pub(crate) fn analog_in(&self, channel: usize) -> f64 {
        self.analog_in_override[channel].unwrap_or(self.analog_out[channel])
    }

    /// Digital input reading: override if set, else the DO loopback.
    pub(crate) fn digital_in(&self, channel: usize) -> bool {
        self.digital_in_override[channel].unwrap_or(self.digital_out[channel])
    }

    /// Integrate encoder rates up to now.
    pub(crate) fn advance_encoders(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_sample {
            let dt = now.duration_since(last).as_secs_f64();
            for (count, rate) in self.encoder_counts.iter_mut().zip(&self.encoder_rates) {
                *count += rate * dt;
            }
        }
        self.last_sample = Some(now);
    }
}

/// Cloneable handle for observing and steering the simulated board.
#[derive(Debug, Clone)]
pub struct SimHandle {
    pub(crate) state: Arc<Mutex<BoardState>>,
    channels: u32,
}

impl SimHandle {
    pub(crate) fn new(channels: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(BoardState::new(channels as usize))),
            channels,
        }
    }

    /// Channels per bank.
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Whether the session is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn index(&self, channel: u32) -> DaqResult<usize> {
        if channel >= self.channels {
            return Err(DaqError::ChannelOutOfRange {
                module: "simulation".to_string(),
                channel,
                max: self.channels,
            });
        }
        Ok(channel as usize)
    }

    /// Voltage currently driven on analog output `channel`.
    pub fn analog_output(&self, channel: u32) -> DaqResult<f64> {
        let idx = self.index(channel)?;
        Ok(self.state.lock().analog_out[idx])
    }

    /// Level currently driven on digital output `channel`.
    pub fn digital_output(&self, channel: u32) -> DaqResult<bool> {
        let idx = self.index(channel)?;
        Ok(self.state.lock().digital_out[idx])
    }

    /// Force analog input `channel` to `value`, or restore loopback with `None`.
    pub fn set_analog_input(&self, channel: u32, value: Option<f64>) -> DaqResult<()> {
        let idx = self.index(channel)?;
        self.state.lock().analog_in_override[idx] = value;
        Ok(())
    }

    /// Force digital input `channel` to `value`, or restore loopback with `None`.
    pub fn set_digital_input(&self, channel: u32, value: Option<bool>) -> DaqResult<()> {
        let idx = self.index(channel)?;
        self.state.lock().digital_in_override[idx] = value;
        Ok(())
    }

    /// Set the count rate of encoder `channel` [counts/s].
    pub fn set_encoder_rate(&self, channel: u32, rate: f64) -> DaqResult<()> {
        let idx = self.index(channel)?;
        let mut state = self.state.lock();
        state.advance_encoders();
        state.encoder_rates[idx] = rate;
        Ok(())
    }

    /// Overwrite the count of encoder `channel`.
    pub fn set_encoder_count(&self, channel: u32, count: i32) -> DaqResult<()> {
        let idx = self.index(channel)?;
        self.state.lock().encoder_counts[idx] = count as f64;
        Ok(())
    }

    /// Make the next `n` hardware transactions fail.
    pub fn fail_next_transactions(&self, n: u32) {
        self.state.lock().pending_failures = n;
    }

    /// Make module enable hooks fail while set.
    pub fn set_fail_enable(&self, fail: bool) {
        self.state.lock().fail_enable = fail;
    }

    /// Successful hardware transactions so far.
    pub fn transactions(&self) -> u64 {
        self.state.lock().transactions
    }
}
