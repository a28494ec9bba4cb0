//! # MEL DAQ
//!
//! Typed channel access to data-acquisition hardware.
//!
//! ## Module Structure
//!
//! - [`signal`] - Signal kinds (`Voltage`, `Logic`, `Count`, `Rate`)
//! - [`module`] - `Module<T>`: a bank of channels plus its hardware backend
//! - [`channel`] - `Channel<T>`: non-owning handle onto one channel
//! - [`device`] - Enable/disable lifecycle (`Device` trait)
//! - [`watchdog`] - Per-cycle software watchdog over output banks
//! - [`daq`] - Composite `Daq` (one driver session, six banks, watchdog)
//! - [`diagnostics`] - Loopback identification and I/O benchmark
//! - [`driver`] - `DaqDriver` trait implemented by hardware drivers
//! - [`driver_registry`] - Explicit name-to-factory registry
//! - [`drivers`] - Built-in drivers (`simulation`)
//! - [`config`] - `DaqConfig` TOML configuration
//!
//! ## Example
//!
//! ```rust
//! use mel_daq::prelude::*;
//!
//! let registry = DriverRegistry::with_builtin_drivers();
//! let mut daq = registry.create_daq(&DaqConfig::simulated("demo", 2))?;
//! daq.enable()?;
//!
//! let ao = daq.analog_output().unwrap().get_channel(0);
//! ao.set_value(2.5)?;
//! daq.update_output()?;
//! daq.update_input()?;
//! assert_eq!(daq.analog_input().unwrap().get_value(0)?, 2.5);
//! # Ok::<(), DaqError>(())
//! ```

#![warn(missing_docs)]

pub mod channel;
pub mod config;
pub mod daq;
pub mod device;
pub mod diagnostics;
pub mod driver;
pub mod driver_registry;
pub mod drivers;
pub mod error;
pub mod module;
pub mod signal;
pub mod watchdog;

pub use channel::Channel;
pub use config::DaqConfig;
pub use daq::Daq;
pub use device::{Device, DeviceState};
pub use diagnostics::BenchmarkReport;
pub use driver::{DaqBackends, DaqDriver, DriverFactory, ModuleKind};
pub use driver_registry::DriverRegistry;
pub use error::{DaqError, DaqResult};
pub use module::{IoType, Module, ModuleBackend, RangePolicy};
pub use signal::{Count, Logic, Rate, Signal, Voltage};
pub use watchdog::{Watchdog, WatchdogState};

/// Common re-exports.
pub mod prelude {
    pub use crate::{
        Channel, Daq, DaqConfig, DaqError, DaqResult, Device, DriverRegistry, IoType, Module,
        RangePolicy, Voltage, Watchdog, WatchdogState,
    };
}
