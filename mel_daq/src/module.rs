//! Module: a bank of same-typed channels on one piece of hardware.
//!
//! A [`Module`] owns the cached value of every registered channel and a
//! backend that moves those values to or from the hardware. Reads and writes
//! of values only touch the cache; [`Module::update`] and
//! [`Module::update_channel`] are the only calls that perform I/O.

use crate::channel::Channel;
use crate::device::Device;
use crate::error::{DaqError, DaqResult};
use crate::signal::Signal;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Direction of a module's channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    /// Values come from the hardware
    Input,
    /// Values go to the hardware
    Output,
    /// Bidirectional (e.g. configurable digital lines)
    InputOutput,
}

impl IoType {
    /// Whether the module drives hardware outputs.
    pub fn is_output(self) -> bool {
        matches!(self, IoType::Output | IoType::InputOutput)
    }
}

/// What `set_value` does with a value outside the channel range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePolicy {
    /// Clamp into range
    #[default]
    Clamp,
    /// Fail with [`DaqError::ValueOutOfRange`]
    Reject,
}

/// Hardware side of a module, implemented once per driver and signal kind.
///
/// Channel numbers are passed in registration order together with a values
/// slice of the same length. Input backends overwrite `values`; output
/// backends push them.
pub trait ModuleBackend<T: Signal>: Send {
    /// Called when the module is enabled, before enable values are pushed.
    fn on_enable(&mut self) -> DaqResult<()> {
        Ok(())
    }

    /// Called when the module is disabled, after disable values are pushed.
    fn on_disable(&mut self) -> DaqResult<()> {
        Ok(())
    }

    /// Transfer every listed channel in one transaction.
    fn update(&mut self, channels: &[u32], values: &mut [T]) -> DaqResult<()>;

    /// Transfer a single channel.
    fn update_channel(&mut self, channel: u32, value: &mut T) -> DaqResult<()>;

    /// Apply validated ranges to the hardware.
    fn set_ranges(&mut self, _channels: &[u32], _min: &[T], _max: &[T]) -> DaqResult<()> {
        Ok(())
    }

    /// Program hardware-side expiration values.
    fn set_expire_values(&mut self, _channels: &[u32], _values: &[T]) -> DaqResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Preset {
    Enable,
    Disable,
    Expire,
}

/// Shared state behind a [`Module`] and its [`Channel`] handles.
pub(crate) struct ModuleInner<T: Signal> {
    name: String,
    io: IoType,
    policy: RangePolicy,
    backend: Box<dyn ModuleBackend<T>>,
    numbers: Vec<u32>,
    channel_map: HashMap<u32, usize>,
    values: Vec<T>,
    scratch: Vec<T>,
    min: Vec<T>,
    max: Vec<T>,
    enable_values: Vec<T>,
    disable_values: Vec<T>,
    expire_values: Vec<T>,
    enabled: bool,
}

impl<T: Signal> ModuleInner<T> {
    fn index_of(&self, channel: u32) -> DaqResult<usize> {
        self.channel_map
            .get(&channel)
            .copied()
            .ok_or_else(|| DaqError::InvalidChannel {
                module: self.name.clone(),
                channel,
            })
    }

    fn check_len(&self, actual: usize) -> DaqResult<()> {
        if actual != self.numbers.len() {
            return Err(DaqError::LengthMismatch {
                module: self.name.clone(),
                expected: self.numbers.len(),
                actual,
            });
        }
        Ok(())
    }

    fn admit(&self, idx: usize, value: T) -> DaqResult<T> {
        let (min, max) = (self.min[idx], self.max[idx]);
        if value >= min && value <= max {
            return Ok(value);
        }
        match self.policy {
            RangePolicy::Clamp => Ok(value.clamp_to(min, max)),
            RangePolicy::Reject => Err(DaqError::ValueOutOfRange {
                module: self.name.clone(),
                channel: self.numbers[idx],
                value: format!("{value:?}"),
                min: format!("{min:?}"),
                max: format!("{max:?}"),
            }),
        }
    }

    /// Index of `channel` for a preset value, which must lie in its range
    /// whatever the range policy.
    fn preset_index(&self, channel: u32, value: T) -> DaqResult<usize> {
        let idx = self.index_of(channel)?;
        let (min, max) = (self.min[idx], self.max[idx]);
        if value < min || value > max {
            return Err(DaqError::ValueOutOfRange {
                module: self.name.clone(),
                channel,
                value: format!("{value:?}"),
                min: format!("{min:?}"),
                max: format!("{max:?}"),
            });
        }
        Ok(idx)
    }

    pub(crate) fn get_value(&self, channel: u32) -> DaqResult<T> {
        Ok(self.values[self.index_of(channel)?])
    }

    pub(crate) fn set_value(&mut self, channel: u32, value: T) -> DaqResult<()> {
        let idx = self.index_of(channel)?;
        self.values[idx] = self.admit(idx, value)?;
        Ok(())
    }

    /// Batch transfer; the cache changes only if the backend succeeds.
    fn update(&mut self) -> DaqResult<()> {
        let ModuleInner {
            backend,
            numbers,
            values,
            scratch,
            ..
        } = self;
        scratch.clone_from(values);
        backend.update(numbers, scratch)?;
        std::mem::swap(values, scratch);
        Ok(())
    }

    pub(crate) fn update_channel(&mut self, channel: u32) -> DaqResult<()> {
        let idx = self.index_of(channel)?;
        let mut value = self.values[idx];
        self.backend.update_channel(channel, &mut value)?;
        self.values[idx] = value;
        Ok(())
    }

    /// Load a preset into the cache and push it.
    fn push(&mut self, preset: Preset) -> DaqResult<()> {
        let source = match preset {
            Preset::Enable => &self.enable_values,
            Preset::Disable => &self.disable_values,
            Preset::Expire => &self.expire_values,
        };
        self.values.copy_from_slice(source);
        self.update()
    }

    fn enable(&mut self) -> DaqResult<()> {
        if self.enabled {
            return Ok(());
        }
        self.backend.on_enable()?;
        if self.io.is_output() {
            self.push(Preset::Enable)?;
        }
        self.enabled = true;
        info!("Module '{}' enabled", self.name);
        Ok(())
    }

    fn disable(&mut self) -> DaqResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut first_error = None;
        if self.io.is_output()
            && let Err(e) = self.push(Preset::Disable)
        {
            warn!("Module '{}' failed to write disable values: {}", self.name, e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.backend.on_disable() {
            warn!("Module '{}' disable hook failed: {}", self.name, e);
            first_error.get_or_insert(e);
        }
        self.enabled = false;
        info!("Module '{}' disabled", self.name);
        first_error.map_or(Ok(()), Err)
    }
}

/// Something the watchdog can force into a safe state.
pub(crate) trait Expirable: Send + Sync {
    /// Write expiration values to every output channel.
    fn expire(&self) -> DaqResult<()>;
    /// Name for logs.
    fn module_name(&self) -> String;
}

impl<T: Signal> Expirable for Mutex<ModuleInner<T>> {
    fn expire(&self) -> DaqResult<()> {
        let mut inner = self.lock();
        if !inner.io.is_output() {
            return Ok(());
        }
        inner.push(Preset::Expire)
    }

    fn module_name(&self) -> String {
        self.lock().name.clone()
    }
}

/// Bank of same-typed channels on one device.
///
/// Channel numbers are fixed at construction and keep their order; every
/// per-channel array has one entry per registered number.
pub struct Module<T: Signal> {
    name: String,
    io: IoType,
    inner: Arc<Mutex<ModuleInner<T>>>,
}

impl<T: Signal> Module<T> {
    /// Create a module over `channels`.
    ///
    /// Rejects duplicate numbers and numbers `>= hardware_channels`.
    pub fn new(
        name: impl Into<String>,
        io: IoType,
        channels: &[u32],
        hardware_channels: u32,
        backend: Box<dyn ModuleBackend<T>>,
    ) -> DaqResult<Self> {
        let name = name.into();
        let mut channel_map = HashMap::with_capacity(channels.len());
        for (idx, &channel) in channels.iter().enumerate() {
            if channel >= hardware_channels {
                return Err(DaqError::ChannelOutOfRange {
                    module: name,
                    channel,
                    max: hardware_channels,
                });
            }
            if channel_map.insert(channel, idx).is_some() {
                return Err(DaqError::DuplicateChannel {
                    module: name,
                    channel,
                });
            }
        }

        let n = channels.len();
        debug!("Module '{}' created with channels {:?}", name, channels);
        let inner = ModuleInner {
            name: name.clone(),
            io,
            policy: RangePolicy::default(),
            backend,
            numbers: channels.to_vec(),
            channel_map,
            values: vec![T::default(); n],
            scratch: Vec::with_capacity(n),
            min: vec![T::MIN; n],
            max: vec![T::MAX; n],
            enable_values: vec![T::default(); n],
            disable_values: vec![T::default(); n],
            expire_values: vec![T::default(); n],
            enabled: false,
        };
        Ok(Self {
            name,
            io,
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Direction of the channels.
    pub fn io_type(&self) -> IoType {
        self.io
    }

    /// Registered channel numbers in registration order.
    pub fn channel_numbers(&self) -> Vec<u32> {
        self.inner.lock().numbers.clone()
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.inner.lock().numbers.len()
    }

    /// Whether `channel` is registered.
    pub fn contains(&self, channel: u32) -> bool {
        self.inner.lock().channel_map.contains_key(&channel)
    }

    /// Handle onto `channel`, or an invalid handle if it is not registered.
    pub fn get_channel(&self, channel: u32) -> Channel<T> {
        if self.contains(channel) {
            Channel::new(&self.name, Arc::downgrade(&self.inner), channel)
        } else {
            Channel::invalid(&self.name, channel)
        }
    }

    /// Handles onto several channels, invalid for unregistered numbers.
    pub fn get_channels(&self, channels: &[u32]) -> Vec<Channel<T>> {
        channels.iter().map(|&c| self.get_channel(c)).collect()
    }

    /// Handles onto every registered channel.
    pub fn channels(&self) -> Vec<Channel<T>> {
        self.get_channels(&self.channel_numbers())
    }

    /// Cached value of `channel`.
    pub fn get_value(&self, channel: u32) -> DaqResult<T> {
        self.inner.lock().get_value(channel)
    }

    /// Set the cached value of `channel`, applying the range policy.
    pub fn set_value(&self, channel: u32, value: T) -> DaqResult<()> {
        self.inner.lock().set_value(channel, value)
    }

    /// Snapshot of all cached values in registration order.
    pub fn get_values(&self) -> Vec<T> {
        self.inner.lock().values.clone()
    }

    /// Set every cached value; nothing changes if any value is rejected.
    pub fn set_values(&self, values: &[T]) -> DaqResult<()> {
        let mut inner = self.inner.lock();
        inner.check_len(values.len())?;
        let admitted = values
            .iter()
            .enumerate()
            .map(|(idx, &v)| inner.admit(idx, v))
            .collect::<DaqResult<Vec<T>>>()?;
        inner.values = admitted;
        Ok(())
    }

    /// Transfer all channels in one hardware transaction.
    pub fn update(&self) -> DaqResult<()> {
        self.inner.lock().update().inspect_err(|e| {
            error!("Module '{}' update failed: {}", self.name, e);
        })
    }

    /// Transfer one channel.
    pub fn update_channel(&self, channel: u32) -> DaqResult<()> {
        self.inner.lock().update_channel(channel)
    }

    /// Set how out-of-range values are handled.
    pub fn set_range_policy(&self, policy: RangePolicy) {
        self.inner.lock().policy = policy;
    }

    /// Current range policy.
    pub fn range_policy(&self) -> RangePolicy {
        self.inner.lock().policy
    }

    /// Set the range of one channel.
    pub fn set_range(&self, channel: u32, min: T, max: T) -> DaqResult<()> {
        let mut inner = self.inner.lock();
        let idx = inner.index_of(channel)?;
        if min > max {
            return Err(invalid_range(&inner.name, channel, min, max));
        }
        inner.backend.set_ranges(&[channel], &[min], &[max])?;
        inner.min[idx] = min;
        inner.max[idx] = max;
        Ok(())
    }

    /// Set the range of every channel.
    pub fn set_ranges(&self, min: &[T], max: &[T]) -> DaqResult<()> {
        let mut inner = self.inner.lock();
        inner.check_len(min.len())?;
        inner.check_len(max.len())?;
        for (idx, (&lo, &hi)) in min.iter().zip(max).enumerate() {
            if lo > hi {
                return Err(invalid_range(&inner.name, inner.numbers[idx], lo, hi));
            }
        }
        let numbers = inner.numbers.clone();
        inner.backend.set_ranges(&numbers, min, max)?;
        inner.min = min.to_vec();
        inner.max = max.to_vec();
        Ok(())
    }

    /// Range of `channel` as `(min, max)`.
    pub fn range(&self, channel: u32) -> DaqResult<(T, T)> {
        let inner = self.inner.lock();
        let idx = inner.index_of(channel)?;
        Ok((inner.min[idx], inner.max[idx]))
    }

    /// Values written to outputs on enable.
    pub fn set_enable_values(&self, values: &[T]) -> DaqResult<()> {
        let mut inner = self.inner.lock();
        inner.check_len(values.len())?;
        inner.enable_values = values.to_vec();
        Ok(())
    }

    /// Values written to outputs on disable.
    pub fn set_disable_values(&self, values: &[T]) -> DaqResult<()> {
        let mut inner = self.inner.lock();
        inner.check_len(values.len())?;
        inner.disable_values = values.to_vec();
        Ok(())
    }

    /// Values written to outputs when a bound watchdog expires.
    pub fn set_expire_values(&self, values: &[T]) -> DaqResult<()> {
        let mut inner = self.inner.lock();
        inner.check_len(values.len())?;
        let numbers = inner.numbers.clone();
        inner.backend.set_expire_values(&numbers, values)?;
        inner.expire_values = values.to_vec();
        Ok(())
    }

    /// Value written to `channel` on enable.
    pub fn set_enable_value(&self, channel: u32, value: T) -> DaqResult<()> {
        let mut inner = self.inner.lock();
        let idx = inner.preset_index(channel, value)?;
        inner.enable_values[idx] = value;
        Ok(())
    }

    /// Value written to `channel` on disable.
    pub fn set_disable_value(&self, channel: u32, value: T) -> DaqResult<()> {
        let mut inner = self.inner.lock();
        let idx = inner.preset_index(channel, value)?;
        inner.disable_values[idx] = value;
        Ok(())
    }

    /// Value written to `channel` when a bound watchdog expires.
    pub fn set_expire_value(&self, channel: u32, value: T) -> DaqResult<()> {
        let mut inner = self.inner.lock();
        let idx = inner.preset_index(channel, value)?;
        inner.backend.set_expire_values(&[channel], &[value])?;
        inner.expire_values[idx] = value;
        Ok(())
    }

    /// Configured expiration values.
    pub fn expire_values(&self) -> Vec<T> {
        self.inner.lock().expire_values.clone()
    }

    pub(crate) fn expirable(&self) -> Weak<dyn Expirable> {
        let weak: Weak<Mutex<ModuleInner<T>>> = Arc::downgrade(&self.inner);
        weak
    }
}

impl<T: Signal> Device for Module<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn enable(&mut self) -> DaqResult<()> {
        self.inner.lock().enable()
    }

    fn disable(&mut self) -> DaqResult<()> {
        self.inner.lock().disable()
    }

    fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }
}

impl<T: Signal> std::fmt::Debug for Module<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("io", &self.io)
            .field("channels", &self.channel_numbers())
            .finish()
    }
}

fn invalid_range<T: Signal>(module: &str, channel: u32, min: T, max: T) -> DaqError {
    DaqError::InvalidRange {
        module: module.to_string(),
        channel,
        min: format!("{min:?}"),
        max: format!("{max:?}"),
    }
}
