//! Simulation driver module.
//!
//! A software board for development and testing without hardware:
//! analog outputs loop back to analog inputs, digital outputs to digital
//! inputs, and encoders integrate a configurable count rate.

mod backend;
mod board;
mod driver;

pub use board::SimHandle;
pub use driver::SimulationDriver;

use crate::driver::DaqDriver;

/// Factory function to create a simulation driver instance.
pub fn create_driver() -> Box<dyn DaqDriver> {
    Box::new(SimulationDriver::new())
}
