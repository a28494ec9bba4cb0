//! Periodic test signals and a running integrator for scope demos.
//!
//! All generators take `(amplitude, frequency [Hz], time [s])` and have
//! period `1 / frequency`, zero mean and peak value `amplitude`.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// `amplitude * sin(2π f t)`.
pub fn sin_wave(amplitude: f64, frequency: f64, time: f64) -> f64 {
    amplitude * (2.0 * PI * frequency * time).sin()
}

/// `+amplitude` for the first half of each period, `-amplitude` after.
pub fn square_wave(amplitude: f64, frequency: f64, time: f64) -> f64 {
    if phase(frequency, time) < 0.5 {
        amplitude
    } else {
        -amplitude
    }
}

/// Triangle in phase with [`sin_wave`]: 0 at t = 0, peak at a quarter period.
pub fn triangle_wave(amplitude: f64, frequency: f64, time: f64) -> f64 {
    let p = phase(frequency, time);
    let unit = if p < 0.25 {
        4.0 * p
    } else if p < 0.75 {
        2.0 - 4.0 * p
    } else {
        4.0 * p - 4.0
    };
    amplitude * unit
}

/// Rising ramp from `-amplitude` to `amplitude`, crossing 0 at t = 0.
pub fn sawtooth_wave(amplitude: f64, frequency: f64, time: f64) -> f64 {
    let p = phase(frequency * time + 0.5, 1.0);
    amplitude * (2.0 * p - 1.0)
}

/// Fractional position within the period, in `[0, 1)`.
fn phase(frequency: f64, time: f64) -> f64 {
    let cycles = frequency * time;
    cycles - cycles.floor()
}

/// Waveform shape, selectable from configuration or the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    /// [`sin_wave`]
    Sine,
    /// [`square_wave`]
    Square,
    /// [`triangle_wave`]
    Triangle,
    /// [`sawtooth_wave`]
    Sawtooth,
}

impl Shape {
    /// All shapes, in scope channel order.
    pub const ALL: [Shape; 4] = [Shape::Sine, Shape::Square, Shape::Triangle, Shape::Sawtooth];
}

/// A shape with fixed amplitude and frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    /// Shape
    pub shape: Shape,
    /// Peak value
    pub amplitude: f64,
    /// Frequency [Hz]
    pub frequency: f64,
}

impl Waveform {
    /// New waveform.
    pub fn new(shape: Shape, amplitude: f64, frequency: f64) -> Self {
        Self {
            shape,
            amplitude,
            frequency,
        }
    }

    /// Value at `time` seconds.
    pub fn evaluate(&self, time: f64) -> f64 {
        let f = match self.shape {
            Shape::Sine => sin_wave,
            Shape::Square => square_wave,
            Shape::Triangle => triangle_wave,
            Shape::Sawtooth => sawtooth_wave,
        };
        f(self.amplitude, self.frequency, time)
    }
}

/// Trapezoidal running integral of a sampled signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Integrator {
    value: f64,
    last: Option<(f64, f64)>,
}

impl Integrator {
    /// Start from `initial`.
    pub fn new(initial: f64) -> Self {
        Self {
            value: initial,
            last: None,
        }
    }

    /// Add the sample `x` taken at `time` and return the integral so far.
    ///
    /// The first sample only sets the starting point. Samples that do not
    /// advance time are ignored.
    pub fn integrate(&mut self, x: f64, time: f64) -> f64 {
        match self.last {
            Some((t0, _)) if time <= t0 => {}
            Some((t0, x0)) => {
                self.value += 0.5 * (x + x0) * (time - t0);
                self.last = Some((time, x));
            }
            None => self.last = Some((time, x)),
        }
        self.value
    }

    /// Current integral.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Restart from `initial`.
    pub fn reset(&mut self, initial: f64) {
        *self = Self::new(initial);
    }
}
