//! Built-in DAQ drivers.

pub mod simulation;
