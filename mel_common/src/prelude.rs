//! Prelude module for common re-exports.
//!
//! ```rust
//! use mel_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;
pub use crate::logging::init_logging;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig, Validate};

// ─── Timing ─────────────────────────────────────────────────────────
pub use crate::frequency::Frequency;

// ─── Defaults ───────────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_LOOP_FREQUENCY_HZ, DEFAULT_MELSHARE_CAPACITY};
