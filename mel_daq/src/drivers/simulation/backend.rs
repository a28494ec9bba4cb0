//! Module backends of the simulated board.

use super::board::SimHandle;
use crate::driver::ModuleKind;
use crate::error::{DaqError, DaqResult};
use crate::module::ModuleBackend;
use tracing::trace;

/// One bank of the simulated board.
pub(crate) struct SimBank {
    board: SimHandle,
    kind: ModuleKind,
}

impl SimBank {
    pub(crate) fn new(board: SimHandle, kind: ModuleKind) -> Self {
        Self { board, kind }
    }

    fn label(&self) -> String {
        format!("simulation/{}", self.kind)
    }

    fn enable_hook(&self) -> DaqResult<()> {
        if self.board.state.lock().fail_enable {
            return Err(DaqError::hardware(self.label(), "injected enable failure"));
        }
        Ok(())
    }

    fn wrong_kind(&self) -> DaqError {
        DaqError::hardware(self.label(), "signal type does not match bank")
    }
}

impl ModuleBackend<f64> for SimBank {
    fn on_enable(&mut self) -> DaqResult<()> {
        self.enable_hook()
    }

    fn update(&mut self, channels: &[u32], values: &mut [f64]) -> DaqResult<()> {
        let label = self.label();
        let mut board = self.board.state.lock();
        board.begin(&label)?;
        match self.kind {
            ModuleKind::AnalogInput => {
                for (value, &c) in values.iter_mut().zip(channels) {
                    *value = board.analog_in(c as usize);
                }
            }
            ModuleKind::AnalogOutput => {
                for (&value, &c) in values.iter().zip(channels) {
                    board.analog_out[c as usize] = value;
                }
            }
            ModuleKind::Velocity => {
                for (value, &c) in values.iter_mut().zip(channels) {
                    *value = board.encoder_rates[c as usize];
                }
            }
            _ => return Err(self.wrong_kind()),
        }
        trace!("{} transferred {} channels", label, channels.len());
        Ok(())
    }

    fn update_channel(&mut self, channel: u32, value: &mut f64) -> DaqResult<()> {
        ModuleBackend::<f64>::update(self, &[channel], std::slice::from_mut(value))
    }
}

impl ModuleBackend<bool> for SimBank {
    fn on_enable(&mut self) -> DaqResult<()> {
        self.enable_hook()
    }

    fn update(&mut self, channels: &[u32], values: &mut [bool]) -> DaqResult<()> {
        let label = self.label();
        let mut board = self.board.state.lock();
        board.begin(&label)?;
        match self.kind {
            ModuleKind::DigitalInput => {
                for (value, &c) in values.iter_mut().zip(channels) {
                    *value = board.digital_in(c as usize);
                }
            }
            ModuleKind::DigitalOutput => {
                for (&value, &c) in values.iter().zip(channels) {
                    board.digital_out[c as usize] = value;
                }
            }
            _ => return Err(self.wrong_kind()),
        }
        Ok(())
    }

    fn update_channel(&mut self, channel: u32, value: &mut bool) -> DaqResult<()> {
        ModuleBackend::<bool>::update(self, &[channel], std::slice::from_mut(value))
    }
}

impl ModuleBackend<i32> for SimBank {
    fn on_enable(&mut self) -> DaqResult<()> {
        self.enable_hook()
    }

    fn update(&mut self, channels: &[u32], values: &mut [i32]) -> DaqResult<()> {
        if self.kind != ModuleKind::Encoder {
            return Err(self.wrong_kind());
        }
        let label = self.label();
        let mut board = self.board.state.lock();
        board.begin(&label)?;
        board.advance_encoders();
        for (value, &c) in values.iter_mut().zip(channels) {
            *value = board.encoder_counts[c as usize].round() as i32;
        }
        Ok(())
    }

    fn update_channel(&mut self, channel: u32, value: &mut i32) -> DaqResult<()> {
        ModuleBackend::<i32>::update(self, &[channel], std::slice::from_mut(value))
    }
}
