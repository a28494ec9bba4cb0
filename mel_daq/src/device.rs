//! Enable/disable lifecycle shared by modules, watchdogs and whole DAQs.

use crate::error::DaqResult;
use serde::{Deserialize, Serialize};

/// Binary enable state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Outputs held at safe values
    #[default]
    Disabled,
    /// Live
    Enabled,
}

/// A named unit that can be enabled and disabled.
///
/// `enable()` on an enabled device and `disable()` on a disabled one succeed
/// without side effects. Transitions are the only place where a device
/// touches hardware outside of `update()`.
pub trait Device {
    /// Device name used in logs and errors.
    fn name(&self) -> &str;

    /// Transition to [`DeviceState::Enabled`].
    fn enable(&mut self) -> DaqResult<()>;

    /// Transition to [`DeviceState::Disabled`].
    ///
    /// Implementations attempt every step even after a failure and end up
    /// disabled regardless; the first error is returned.
    fn disable(&mut self) -> DaqResult<()>;

    /// Whether the device is enabled.
    fn is_enabled(&self) -> bool;

    /// Current state.
    fn state(&self) -> DeviceState {
        if self.is_enabled() {
            DeviceState::Enabled
        } else {
            DeviceState::Disabled
        }
    }
}
