//! `tracing` subscriber setup shared by all MEL binaries.

use crate::config::{LogLevel, SharedConfig};
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` directives take precedence over `level`. Calling this more than
/// once is harmless: later calls leave the first subscriber in place.
pub fn init_logging(level: LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Install the subscriber described by a [`SharedConfig`].
pub fn init_from_config(shared: &SharedConfig) {
    init_logging(shared.log_level, shared.json_logs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_does_not_panic() {
        init_logging(LogLevel::Debug, false);
        init_logging(LogLevel::Info, true);
        init_from_config(&SharedConfig::default());
    }
}
