//! Signal kinds carried by channels.

use std::fmt::Debug;

/// Value type of one channel.
///
/// Implemented for the closed set of kinds the hardware exposes: analog
/// levels and rates (`f64`), logic levels (`bool`) and counts (`i32`).
pub trait Signal: Copy + PartialOrd + Default + Debug + Send + 'static {
    /// Lowest representable value, the default range minimum.
    const MIN: Self;
    /// Highest representable value, the default range maximum.
    const MAX: Self;

    /// Clamp into `[min, max]`.
    fn clamp_to(self, min: Self, max: Self) -> Self {
        if self < min {
            min
        } else if self > max {
            max
        } else {
            self
        }
    }
}

impl Signal for f64 {
    const MIN: Self = f64::MIN;
    const MAX: Self = f64::MAX;
}

impl Signal for bool {
    const MIN: Self = false;
    const MAX: Self = true;
}

impl Signal for i32 {
    const MIN: Self = i32::MIN;
    const MAX: Self = i32::MAX;
}

/// Analog level in volts.
pub type Voltage = f64;

/// Digital logic level.
pub type Logic = bool;

/// Encoder count.
pub type Count = i32;

/// Encoder rate in counts per second.
pub type Rate = f64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_to() {
        assert_eq!(12.0f64.clamp_to(-10.0, 10.0), 10.0);
        assert_eq!((-3i32).clamp_to(0, 5), 0);
        assert!(true.clamp_to(false, true));
    }
}
