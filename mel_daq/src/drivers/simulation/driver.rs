//! Simulation driver implementation.

use super::backend::SimBank;
use super::board::SimHandle;
use crate::driver::{DaqBackends, DaqDriver, ModuleKind};
use crate::error::DaqResult;
use mel_common::consts::DEFAULT_CHANNEL_COUNT;
use tracing::info;

/// Simulation driver implementing the `DaqDriver` trait.
pub struct SimulationDriver {
    /// Driver name
    name: &'static str,
    /// Driver version
    version: &'static str,
    /// Shared board state
    board: SimHandle,
}

impl SimulationDriver {
    /// Create a board with the default channel count on every bank.
    pub fn new() -> Self {
        Self::with_channels(DEFAULT_CHANNEL_COUNT)
    }

    /// Create a board with `channels` channels on every bank.
    pub fn with_channels(channels: u32) -> Self {
        Self {
            name: "simulation",
            version: env!("CARGO_PKG_VERSION"),
            board: SimHandle::new(channels),
        }
    }

    /// Handle for observing and steering the board.
    pub fn handle(&self) -> SimHandle {
        self.board.clone()
    }
}

impl Default for SimulationDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DaqDriver for SimulationDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    fn version(&self) -> &'static str {
        self.version
    }

    fn channel_count(&self, _kind: ModuleKind) -> u32 {
        self.board.channels()
    }

    fn open(&mut self) -> DaqResult<()> {
        self.board.state.lock().open = true;
        info!("Simulated board opened ({} channels per bank)", self.board.channels());
        Ok(())
    }

    fn close(&mut self) -> DaqResult<()> {
        self.board.state.lock().open = false;
        info!("Simulated board closed");
        Ok(())
    }

    fn backends(&mut self) -> DaqResult<DaqBackends> {
        let bank = |kind| SimBank::new(self.board.clone(), kind);
        Ok(DaqBackends {
            analog_input: Some(Box::new(bank(ModuleKind::AnalogInput))),
            analog_output: Some(Box::new(bank(ModuleKind::AnalogOutput))),
            digital_input: Some(Box::new(bank(ModuleKind::DigitalInput))),
            digital_output: Some(Box::new(bank(ModuleKind::DigitalOutput))),
            encoder: Some(Box::new(bank(ModuleKind::Encoder))),
            velocity: Some(Box::new(bank(ModuleKind::Velocity))),
        })
    }
}
