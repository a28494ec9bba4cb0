//! DAQ driver trait and backend bundle.
//!
//! This module defines:
//! - `DaqDriver` trait - Interface for pluggable DAQ hardware
//! - `ModuleKind` enum - The module banks a DAQ may expose
//! - `DaqBackends` struct - Per-kind module backends handed out by a driver
//! - `DriverFactory` type alias - Factory function type

use crate::error::DaqResult;
use crate::module::{IoType, ModuleBackend};
use crate::signal::{Count, Logic, Rate, Voltage};
use std::fmt;

/// Module banks of a DAQ, in the order they are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Analog inputs (volts)
    AnalogInput,
    /// Analog outputs (volts)
    AnalogOutput,
    /// Digital inputs
    DigitalInput,
    /// Digital outputs
    DigitalOutput,
    /// Encoder counters
    Encoder,
    /// Encoder velocity estimates (counts/s)
    Velocity,
}

impl ModuleKind {
    /// All kinds in enable order.
    pub const ALL: [ModuleKind; 6] = [
        ModuleKind::AnalogInput,
        ModuleKind::AnalogOutput,
        ModuleKind::DigitalInput,
        ModuleKind::DigitalOutput,
        ModuleKind::Encoder,
        ModuleKind::Velocity,
    ];

    /// Channel direction of this kind.
    pub fn io_type(self) -> IoType {
        match self {
            ModuleKind::AnalogOutput | ModuleKind::DigitalOutput => IoType::Output,
            _ => IoType::Input,
        }
    }

    /// Short name used as the module name suffix.
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::AnalogInput => "analog_input",
            ModuleKind::AnalogOutput => "analog_output",
            ModuleKind::DigitalInput => "digital_input",
            ModuleKind::DigitalOutput => "digital_output",
            ModuleKind::Encoder => "encoder",
            ModuleKind::Velocity => "velocity",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backends a driver provides; `None` for banks the hardware lacks.
#[derive(Default)]
pub struct DaqBackends {
    /// Analog input backend
    pub analog_input: Option<Box<dyn ModuleBackend<Voltage>>>,
    /// Analog output backend
    pub analog_output: Option<Box<dyn ModuleBackend<Voltage>>>,
    /// Digital input backend
    pub digital_input: Option<Box<dyn ModuleBackend<Logic>>>,
    /// Digital output backend
    pub digital_output: Option<Box<dyn ModuleBackend<Logic>>>,
    /// Encoder backend
    pub encoder: Option<Box<dyn ModuleBackend<Count>>>,
    /// Velocity backend
    pub velocity: Option<Box<dyn ModuleBackend<Rate>>>,
}

/// Factory function type for creating driver instances.
pub type DriverFactory = fn() -> Box<dyn DaqDriver>;

/// Interface for DAQ hardware drivers.
///
/// # Lifecycle
///
/// 1. `backends()` - Called once while the `Daq` is assembled
/// 2. `open()` - Opens the hardware session before the first enable
/// 3. module `update()`s - Every cycle through the backends
/// 4. `close()` - Ends the session after the final disable
///
/// Backends report `NotOpen` while the session is closed.
pub trait DaqDriver: Send {
    /// Returns the driver's unique identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Returns the driver's semantic version.
    fn version(&self) -> &'static str;

    /// Channels the hardware provides for `kind` (0 if absent).
    fn channel_count(&self, kind: ModuleKind) -> u32;

    /// Open the hardware session.
    fn open(&mut self) -> DaqResult<()>;

    /// Close the hardware session.
    fn close(&mut self) -> DaqResult<()>;

    /// Hand out one backend per supported module kind.
    fn backends(&mut self) -> DaqResult<DaqBackends>;
}
