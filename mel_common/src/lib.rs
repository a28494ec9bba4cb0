//! MEL Common Library
//!
//! Shared constants, configuration loading and logging bootstrap used by
//! every crate of the MEL workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Workspace-wide defaults (segment sizes, loop rate, timeouts)
//! - [`config`] - TOML configuration loading traits and types
//! - [`frequency`] - `Frequency` value type and loop period conversion
//! - [`logging`] - `tracing` subscriber setup
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use mel_common::prelude::*;
//!
//! let rate = Frequency::kilohertz(1);
//! assert_eq!(rate.to_period(), std::time::Duration::from_millis(1));
//! ```

pub mod config;
pub mod consts;
pub mod frequency;
pub mod logging;
pub mod prelude;
