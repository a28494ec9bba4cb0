//! Periodic loop timer.
//!
//! [`Timer::wait`] blocks until the next period boundary measured from the
//! origin set by [`Timer::start`], so pacing never drifts. A late caller is
//! never compensated by shortening the following period: the boundary is
//! skipped over, reported as an overrun and the tick still advances by one.

use crate::error::LoopError;
use mel_common::consts::DEFAULT_HYBRID_GUARD_US;
use mel_common::frequency::Frequency;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How [`Timer::wait`] spends the time until the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitMode {
    /// Spin on the clock; lowest jitter, one full core
    Busy,
    /// One sleep for the remaining time; may overshoot by scheduler latency
    Sleep,
    /// Sleep until a guard interval before the boundary, then spin
    #[default]
    Hybrid,
}

/// Outcome of one [`Timer::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Waited up to the boundary
    OnTime,
    /// The boundary had already passed on entry
    Overrun {
        /// How far past the boundary the call arrived
        late: Duration,
    },
}

/// Drift-free periodic timer.
#[derive(Debug, Clone)]
pub struct Timer {
    period: Duration,
    mode: WaitMode,
    guard: Duration,
    origin: Instant,
    ticks: u64,
    overruns: u64,
}

impl Timer {
    /// Create a timer; the origin is set now and reset by [`Timer::start`].
    pub fn new(period: Duration, mode: WaitMode) -> Result<Self, LoopError> {
        if period.is_zero() {
            return Err(LoopError::ZeroPeriod);
        }
        let guard = Duration::from_micros(DEFAULT_HYBRID_GUARD_US).min(period / 2);
        Ok(Self {
            period,
            mode,
            guard,
            origin: Instant::now(),
            ticks: 0,
            overruns: 0,
        })
    }

    /// Create a timer ticking at `frequency`.
    pub fn from_frequency(frequency: Frequency, mode: WaitMode) -> Result<Self, LoopError> {
        Self::new(frequency.to_period(), mode)
    }

    /// Override the hybrid guard interval; it must be shorter than the period.
    pub fn with_guard(mut self, guard: Duration) -> Result<Self, LoopError> {
        if guard >= self.period {
            return Err(LoopError::GuardTooLong {
                guard_us: guard.as_micros() as u64,
                period_us: self.period.as_micros() as u64,
            });
        }
        self.guard = guard;
        Ok(self)
    }

    /// Reset the origin to now and clear tick and overrun counts.
    pub fn start(&mut self) -> Instant {
        self.origin = Instant::now();
        self.ticks = 0;
        self.overruns = 0;
        debug!("Timer started (period {:?}, {:?})", self.period, self.mode);
        self.origin
    }

    /// Block until the next period boundary and advance the tick by one.
    pub fn wait(&mut self) -> WaitStatus {
        let boundary = self.next_boundary();
        let now = Instant::now();
        self.ticks += 1;

        if now > boundary {
            let late = now - boundary;
            self.overruns += 1;
            if self.overruns <= 10 || self.overruns % 1000 == 0 {
                warn!(
                    "Timer overrun #{}: tick {} arrived {}us late (period {}us)",
                    self.overruns,
                    self.ticks,
                    late.as_micros(),
                    self.period.as_micros()
                );
            }
            return WaitStatus::Overrun { late };
        }

        match self.mode {
            WaitMode::Busy => spin_until(boundary),
            WaitMode::Sleep => sleep_until(boundary),
            WaitMode::Hybrid => {
                if let Some(coarse) = boundary.checked_sub(self.guard) {
                    sleep_until(coarse);
                }
                spin_until(boundary);
            }
        }
        WaitStatus::OnTime
    }

    /// Time since the origin, independent of `wait()`.
    pub fn time(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Alias of [`Timer::time`].
    pub fn elapsed_time(&self) -> Duration {
        self.time()
    }

    /// Instant of the next boundary `wait()` will target.
    pub fn next_boundary(&self) -> Instant {
        self.origin + scaled(self.period, self.ticks + 1)
    }

    /// Completed waits since `start()`.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Waits that found their boundary already passed.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Loop period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait strategy.
    pub fn mode(&self) -> WaitMode {
        self.mode
    }

    /// Hybrid guard interval.
    pub fn guard(&self) -> Duration {
        self.guard
    }
}

/// `period * n` without the `u32` limit of `Duration: Mul`.
fn scaled(period: Duration, n: u64) -> Duration {
    let total = period.as_nanos() * n as u128;
    Duration::new(
        (total / 1_000_000_000) as u64,
        (total % 1_000_000_000) as u32,
    )
}

fn spin_until(deadline: Instant) {
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

fn sleep_until(deadline: Instant) {
    // thread::sleep may wake early on signals; loop until the deadline.
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(deadline - now);
    }
}
