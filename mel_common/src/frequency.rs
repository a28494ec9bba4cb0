//! Loop frequency value type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A rate in whole hertz.
///
/// A zero frequency is representable (it is the `Default`) but has no
/// period; [`Frequency::to_period`] returns `Duration::ZERO` for it, and
/// consumers that need a period reject it at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frequency {
    hertz: u64,
}

impl Frequency {
    /// Frequency from hertz.
    pub const fn hertz(hertz: u64) -> Self {
        Self { hertz }
    }

    /// Frequency from kilohertz.
    pub const fn kilohertz(khz: u64) -> Self {
        Self { hertz: khz * 1_000 }
    }

    /// Value in hertz.
    pub const fn as_hertz(self) -> u64 {
        self.hertz
    }

    /// Period of one cycle, rounded to the nearest nanosecond.
    pub fn to_period(self) -> Duration {
        if self.hertz == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((1_000_000_000 + self.hertz / 2) / self.hertz)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.hertz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_constructors_agree() {
        assert_eq!(Frequency::kilohertz(1), Frequency::hertz(1_000));
        assert_eq!(Frequency::kilohertz(2).as_hertz(), 2_000);
        assert_eq!(Frequency::kilohertz(2).to_string(), "2000 Hz");
    }

    #[test]
    fn period_of_common_rates() {
        assert_eq!(Frequency::hertz(1_000).to_period(), Duration::from_millis(1));
        assert_eq!(Frequency::hertz(500).to_period(), Duration::from_millis(2));
        assert_eq!(Frequency::hertz(3).to_period(), Duration::from_nanos(333_333_333));
        assert_eq!(Frequency::default().to_period(), Duration::ZERO);
    }

    #[test]
    fn deserializes_as_plain_number() {
        #[derive(Deserialize)]
        struct Wrapper {
            rate: Frequency,
        }
        let parsed: Wrapper = toml::from_str("rate = 250").unwrap();
        assert_eq!(parsed.rate, Frequency::hertz(250));
    }
}
