//! # Watchdog
//!
//! Software dead-man's switch over one or more output modules.
//!
//! The watchdog runs no thread of its own. The control loop calls
//! [`Watchdog::kick`] and [`Watchdog::check`] once per cycle on the same
//! thread that updates outputs, so expiry and normal output writes never
//! interleave.
//!
//! ```text
//!            start()                 deadline passed
//! Stopped ─────────────▶ Running ──────────────────────▶ Expired
//!    ▲                     │  ▲ kick()                      │
//!    │      stop()/clear() │  └──────┘                      │
//!    └─────────────────────┴────────────────────────────────┘
//! ```

use crate::device::Device;
use crate::error::{DaqError, DaqResult};
use crate::module::{Expirable, Module};
use crate::signal::Signal;
use serde::{Deserialize, Serialize};
use std::sync::Weak;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Watchdog state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogState {
    /// Not armed
    #[default]
    Stopped,
    /// Armed; must be kicked before the deadline
    Running,
    /// Deadline missed; bound outputs hold their expire values
    Expired,
}

/// Deadline-based safety cutoff bound to output modules.
pub struct Watchdog {
    name: String,
    timeout: Duration,
    state: WatchdogState,
    deadline: Option<Instant>,
    bound: Vec<Weak<dyn Expirable>>,
    expirations: u64,
}

impl Watchdog {
    /// Create a stopped watchdog.
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            state: WatchdogState::Stopped,
            deadline: None,
            bound: Vec::new(),
            expirations: 0,
        }
    }

    /// Protect `module`: on expiry its outputs take their expire values.
    ///
    /// The watchdog does not keep the module alive.
    pub fn bind<T: Signal>(&mut self, module: &Module<T>) {
        debug!("Watchdog '{}' bound to module '{}'", self.name, module.name());
        self.bound.push(module.expirable());
    }

    /// Number of bound modules still alive.
    pub fn bound_count(&self) -> usize {
        self.bound.iter().filter(|m| m.strong_count() > 0).count()
    }

    /// Current state.
    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Whether the deadline has been missed.
    pub fn is_expired(&self) -> bool {
        self.state == WatchdogState::Expired
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of expirations since creation.
    pub fn expirations(&self) -> u64 {
        self.expirations
    }

    /// Arm the watchdog with a deadline of now + timeout.
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    /// Refresh the deadline.
    ///
    /// Fails with [`DaqError::WatchdogExpired`] if the deadline had already
    /// passed (the outputs are safed before returning) or the watchdog is
    /// expired, and with [`DaqError::WatchdogNotRunning`] if stopped.
    pub fn kick(&mut self) -> DaqResult<()> {
        self.kick_at(Instant::now())
    }

    /// Per-cycle expiry check; safes the outputs when the deadline passed.
    pub fn check(&mut self) -> WatchdogState {
        self.check_at(Instant::now())
    }

    /// Disarm without touching output values.
    pub fn stop(&mut self) {
        if self.state != WatchdogState::Stopped {
            info!("Watchdog '{}' stopped", self.name);
        }
        self.state = WatchdogState::Stopped;
        self.deadline = None;
    }

    /// Acknowledge an expiry; equivalent to [`Watchdog::stop`].
    pub fn clear(&mut self) {
        self.stop();
    }

    pub(crate) fn start_at(&mut self, now: Instant) {
        self.state = WatchdogState::Running;
        self.deadline = Some(now + self.timeout);
        info!("Watchdog '{}' started ({:?})", self.name, self.timeout);
    }

    pub(crate) fn kick_at(&mut self, now: Instant) -> DaqResult<()> {
        match self.state {
            WatchdogState::Stopped => Err(DaqError::WatchdogNotRunning {
                name: self.name.clone(),
            }),
            WatchdogState::Expired => Err(DaqError::WatchdogExpired {
                name: self.name.clone(),
            }),
            WatchdogState::Running => {
                if self.is_past_deadline(now) {
                    self.expire();
                    return Err(DaqError::WatchdogExpired {
                        name: self.name.clone(),
                    });
                }
                self.deadline = Some(now + self.timeout);
                Ok(())
            }
        }
    }

    pub(crate) fn check_at(&mut self, now: Instant) -> WatchdogState {
        if self.state == WatchdogState::Running && self.is_past_deadline(now) {
            self.expire();
        }
        self.state
    }

    /// The deadline itself counts as missed, for kicks and checks alike.
    fn is_past_deadline(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    fn expire(&mut self) {
        self.state = WatchdogState::Expired;
        self.deadline = None;
        self.expirations += 1;
        error!("Watchdog '{}' expired, safing outputs", self.name);

        for module in self.bound.iter().filter_map(Weak::upgrade) {
            if let Err(e) = module.expire() {
                warn!(
                    "Watchdog '{}' could not safe module '{}': {}",
                    self.name,
                    module.module_name(),
                    e
                );
            }
        }
    }
}

impl Device for Watchdog {
    fn name(&self) -> &str {
        &self.name
    }

    fn enable(&mut self) -> DaqResult<()> {
        if self.state != WatchdogState::Running {
            self.start();
        }
        Ok(())
    }

    fn disable(&mut self) -> DaqResult<()> {
        self.stop();
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.state == WatchdogState::Running
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("state", &self.state)
            .field("bound", &self.bound_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{IoType, ModuleBackend};

    struct Sink;

    impl ModuleBackend<f64> for Sink {
        fn update(&mut self, _channels: &[u32], _values: &mut [f64]) -> DaqResult<()> {
            Ok(())
        }

        fn update_channel(&mut self, _channel: u32, _value: &mut f64) -> DaqResult<()> {
            Ok(())
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn bound() -> (Watchdog, Module<f64>) {
        let module = Module::new("ao", IoType::Output, &[0], 8, Box::new(Sink)).unwrap();
        let mut watchdog = Watchdog::new("wd", TIMEOUT);
        watchdog.bind(&module);
        (watchdog, module)
    }

    #[test]
    fn test_kick_before_start_fails() {
        let (mut watchdog, _module) = bound();
        assert!(matches!(
            watchdog.kick(),
            Err(DaqError::WatchdogNotRunning { .. })
        ));
    }

    #[test]
    fn test_regular_kicks_never_expire() {
        let (mut watchdog, module) = bound();
        module.set_value(0, 5.0).unwrap();
        let t0 = Instant::now();
        watchdog.start_at(t0);

        for i in 1..=50 {
            let now = t0 + Duration::from_millis(90) * i;
            watchdog.kick_at(now).unwrap();
            assert_eq!(watchdog.check_at(now), WatchdogState::Running);
        }
        assert_eq!(module.get_value(0).unwrap(), 5.0);
    }

    #[test]
    fn test_check_after_deadline_expires() {
        let (mut watchdog, module) = bound();
        module.set_value(0, 5.0).unwrap();
        let t0 = Instant::now();
        watchdog.start_at(t0);

        assert_eq!(watchdog.check_at(t0 + Duration::from_millis(99)), WatchdogState::Running);
        assert_eq!(watchdog.check_at(t0 + Duration::from_millis(150)), WatchdogState::Expired);
        assert_eq!(module.get_value(0).unwrap(), 0.0);
        assert_eq!(watchdog.expirations(), 1);
    }

    #[test]
    fn test_late_kick_expires_and_stays_failed_until_clear() {
        let (mut watchdog, module) = bound();
        module.set_expire_values(&[-1.0]).unwrap();
        module.set_value(0, 5.0).unwrap();
        let t0 = Instant::now();
        watchdog.start_at(t0);

        let late = t0 + Duration::from_millis(101);
        assert!(matches!(
            watchdog.kick_at(late),
            Err(DaqError::WatchdogExpired { .. })
        ));
        assert_eq!(module.get_value(0).unwrap(), -1.0);
        assert!(watchdog.kick_at(late).is_err());

        watchdog.clear();
        assert_eq!(watchdog.state(), WatchdogState::Stopped);
        assert_eq!(module.get_value(0).unwrap(), -1.0);

        watchdog.start();
        assert!(watchdog.kick().is_ok());
    }

    #[test]
    fn test_kick_and_check_agree_at_deadline() {
        let (mut kicked, _a) = bound();
        let (mut checked, _b) = bound();
        let t0 = Instant::now();
        kicked.start_at(t0);
        checked.start_at(t0);

        let deadline = t0 + TIMEOUT;
        assert!(matches!(
            kicked.kick_at(deadline),
            Err(DaqError::WatchdogExpired { .. })
        ));
        assert_eq!(checked.check_at(deadline), WatchdogState::Expired);
        assert_eq!(kicked.state(), checked.state());
    }

    #[test]
    fn test_dropped_module_is_skipped() {
        let (mut watchdog, module) = bound();
        drop(module);
        assert_eq!(watchdog.bound_count(), 0);
        let t0 = Instant::now();
        watchdog.start_at(t0);
        assert_eq!(watchdog.check_at(t0 + TIMEOUT), WatchdogState::Expired);
    }

    #[test]
    fn test_device_interface() {
        let (mut watchdog, _module) = bound();
        watchdog.enable().unwrap();
        assert!(watchdog.is_enabled());
        watchdog.disable().unwrap();
        assert_eq!(watchdog.state(), WatchdogState::Stopped);
    }
}
