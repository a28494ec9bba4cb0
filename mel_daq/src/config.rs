//! DAQ configuration.
//!
//! # TOML Example
//!
//! ```toml
//! name = "q8"
//! driver = "simulation"
//! watchdog_timeout_ms = 100
//! range_policy = "clamp"
//!
//! [channels]
//! analog_input = [0, 1]
//! analog_output = [0, 1]
//! digital_output = [0]
//! encoder = [0]
//! velocity = [0]
//!
//! [analog_output]
//! min = -10.0
//! max = 10.0
//! expire_value = 0.0
//! ```

use crate::driver::ModuleKind;
use crate::module::RangePolicy;
use mel_common::config::{ConfigError, Validate};
use mel_common::consts::DEFAULT_WATCHDOG_TIMEOUT_MS;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Channel numbers per module bank. Empty lists leave the bank out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelLists {
    /// Analog input channel numbers
    pub analog_input: Vec<u32>,
    /// Analog output channel numbers
    pub analog_output: Vec<u32>,
    /// Digital input channel numbers
    pub digital_input: Vec<u32>,
    /// Digital output channel numbers
    pub digital_output: Vec<u32>,
    /// Encoder channel numbers
    pub encoder: Vec<u32>,
    /// Velocity channel numbers
    pub velocity: Vec<u32>,
}

impl ChannelLists {
    /// Channel list for `kind`.
    pub fn for_kind(&self, kind: ModuleKind) -> &[u32] {
        match kind {
            ModuleKind::AnalogInput => &self.analog_input,
            ModuleKind::AnalogOutput => &self.analog_output,
            ModuleKind::DigitalInput => &self.digital_input,
            ModuleKind::DigitalOutput => &self.digital_output,
            ModuleKind::Encoder => &self.encoder,
            ModuleKind::Velocity => &self.velocity,
        }
    }

    /// `n` channels `0..n` on every bank.
    pub fn uniform(n: u32) -> Self {
        let all: Vec<u32> = (0..n).collect();
        Self {
            analog_input: all.clone(),
            analog_output: all.clone(),
            digital_input: all.clone(),
            digital_output: all.clone(),
            encoder: all.clone(),
            velocity: all,
        }
    }
}

/// Analog output limits and preset values (applied to every AO channel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogOutputConfig {
    /// Range minimum [V]
    pub min: f64,
    /// Range maximum [V]
    pub max: f64,
    /// Written on enable [V]
    pub enable_value: f64,
    /// Written on disable [V]
    pub disable_value: f64,
    /// Written on watchdog expiry [V]
    pub expire_value: f64,
}

impl Default for AnalogOutputConfig {
    fn default() -> Self {
        Self {
            min: -10.0,
            max: 10.0,
            enable_value: 0.0,
            disable_value: 0.0,
            expire_value: 0.0,
        }
    }
}

/// Digital output preset values (applied to every DO channel).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitalOutputConfig {
    /// Written on enable
    pub enable_value: bool,
    /// Written on disable
    pub disable_value: bool,
    /// Written on watchdog expiry
    pub expire_value: bool,
}

fn default_watchdog_timeout_ms() -> u64 {
    DEFAULT_WATCHDOG_TIMEOUT_MS
}

/// Configuration of one DAQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaqConfig {
    /// DAQ name used in logs and module names
    pub name: String,
    /// Registered driver name
    pub driver: String,
    /// Watchdog timeout [ms]
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,
    /// Out-of-range handling for every module
    #[serde(default)]
    pub range_policy: RangePolicy,
    /// Channels per bank
    #[serde(default)]
    pub channels: ChannelLists,
    /// Analog output limits and presets
    #[serde(default)]
    pub analog_output: AnalogOutputConfig,
    /// Digital output presets
    #[serde(default)]
    pub digital_output: DigitalOutputConfig,
}

impl DaqConfig {
    /// Simulation DAQ with `n` channels on every bank.
    pub fn simulated(name: impl Into<String>, n: u32) -> Self {
        Self {
            name: name.into(),
            driver: "simulation".to_string(),
            watchdog_timeout_ms: DEFAULT_WATCHDOG_TIMEOUT_MS,
            range_policy: RangePolicy::default(),
            channels: ChannelLists::uniform(n),
            analog_output: AnalogOutputConfig::default(),
            digital_output: DigitalOutputConfig::default(),
        }
    }

    /// Watchdog timeout as a `Duration`.
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }
}

impl Validate for DaqConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError("DAQ name cannot be empty".into()));
        }
        if self.driver.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "DAQ '{}': driver cannot be empty",
                self.name
            )));
        }
        if self.watchdog_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "DAQ '{}': watchdog_timeout_ms must be > 0",
                self.name
            )));
        }
        let ao = &self.analog_output;
        if ao.min > ao.max {
            return Err(ConfigError::ValidationError(format!(
                "DAQ '{}': analog_output min {} > max {}",
                self.name, ao.min, ao.max
            )));
        }
        for value in [ao.enable_value, ao.disable_value, ao.expire_value] {
            if value < ao.min || value > ao.max {
                return Err(ConfigError::ValidationError(format!(
                    "DAQ '{}': analog_output preset {} outside [{}, {}]",
                    self.name, value, ao.min, ao.max
                )));
            }
        }
        for kind in ModuleKind::ALL {
            let mut seen = HashSet::new();
            for &channel in self.channels.for_kind(kind) {
                if !seen.insert(channel) {
                    return Err(ConfigError::ValidationError(format!(
                        "DAQ '{}': duplicate {} channel {}",
                        self.name, kind, channel
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mel_common::config::ConfigLoader;
    use std::io::Write;

    const EXAMPLE: &str = r#"
        name = "q8"
        driver = "simulation"
        range_policy = "reject"

        [channels]
        analog_input = [0, 1]
        analog_output = [0, 1]
        encoder = [2]

        [analog_output]
        min = -5.0
        max = 5.0
        expire_value = 0.0
    "#;

    #[test]
    fn test_parse_example() {
        let config = DaqConfig::from_toml(EXAMPLE).unwrap();
        assert_eq!(config.name, "q8");
        assert_eq!(config.range_policy, RangePolicy::Reject);
        assert_eq!(config.watchdog_timeout(), Duration::from_millis(100));
        assert_eq!(config.channels.encoder, vec![2]);
        assert!(config.channels.digital_input.is_empty());
        assert_eq!(config.analog_output.max, 5.0);
        config.validate().unwrap();
    }

    #[test]
    fn test_duplicate_channels_rejected() {
        let mut config = DaqConfig::simulated("dup", 2);
        config.channels.encoder = vec![1, 1];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate encoder channel 1"));
    }

    #[test]
    fn test_zero_timeout_and_bad_range_rejected() {
        let mut config = DaqConfig::simulated("z", 1);
        config.watchdog_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = DaqConfig::simulated("r", 1);
        config.analog_output.min = 1.0;
        config.analog_output.max = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_validated_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{EXAMPLE}").unwrap();
        let config = DaqConfig::load_validated(file.path()).unwrap();
        assert_eq!(config.driver, "simulation");
    }
}
