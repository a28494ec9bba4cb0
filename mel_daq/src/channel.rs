//! Channel: a non-owning handle onto one signal of a [`Module`](crate::Module).

use crate::error::{DaqError, DaqResult};
use crate::module::ModuleInner;
use crate::signal::Signal;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Handle onto one registered channel of a module.
///
/// Cheap to clone. A handle becomes invalid once its module is dropped; a
/// handle obtained for an unregistered number, or via `Default`, is invalid
/// from the start. Invalid handles return [`DaqError::InvalidChannel`].
pub struct Channel<T: Signal> {
    module: Weak<Mutex<ModuleInner<T>>>,
    module_name: Arc<str>,
    number: u32,
}

impl<T: Signal> Channel<T> {
    pub(crate) fn new(module_name: &str, module: Weak<Mutex<ModuleInner<T>>>, number: u32) -> Self {
        Self {
            module,
            module_name: Arc::from(module_name),
            number,
        }
    }

    pub(crate) fn invalid(module_name: &str, number: u32) -> Self {
        Self::new(module_name, Weak::new(), number)
    }

    /// Channel number on the hardware.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Name of the module the handle was taken from (empty for `Default`).
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Whether the owning module is still alive.
    pub fn is_valid(&self) -> bool {
        self.module.strong_count() > 0
    }

    fn with_module<R>(&self, f: impl FnOnce(&mut ModuleInner<T>) -> DaqResult<R>) -> DaqResult<R> {
        let module = self.module.upgrade().ok_or(DaqError::InvalidChannel {
            module: self.module_name.to_string(),
            channel: self.number,
        })?;
        let mut inner = module.lock();
        f(&mut inner)
    }

    /// Cached value.
    pub fn get_value(&self) -> DaqResult<T> {
        self.with_module(|m| m.get_value(self.number))
    }

    /// Set the cached value (range policy applies).
    pub fn set_value(&self, value: T) -> DaqResult<()> {
        self.with_module(|m| m.set_value(self.number, value))
    }

    /// Transfer this channel only.
    pub fn update(&self) -> DaqResult<()> {
        self.with_module(|m| m.update_channel(self.number))
    }
}

impl<T: Signal> Default for Channel<T> {
    fn default() -> Self {
        Self::invalid("", 0)
    }
}

impl<T: Signal> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            module: self.module.clone(),
            module_name: Arc::clone(&self.module_name),
            number: self.number,
        }
    }
}

impl<T: Signal> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("module", &self.module_name)
            .field("number", &self.number)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{IoType, Module, ModuleBackend};

    struct Null;

    impl ModuleBackend<i32> for Null {
        fn update(&mut self, _channels: &[u32], values: &mut [i32]) -> DaqResult<()> {
            values.iter_mut().for_each(|v| *v += 1);
            Ok(())
        }

        fn update_channel(&mut self, _channel: u32, value: &mut i32) -> DaqResult<()> {
            *value += 100;
            Ok(())
        }
    }

    fn module() -> Module<i32> {
        Module::new("enc", IoType::Input, &[0, 2, 4], 8, Box::new(Null)).unwrap()
    }

    #[test]
    fn test_registered_channels_are_valid() {
        let module = module();
        for n in [0, 2, 4] {
            assert!(module.get_channel(n).is_valid());
        }
        for n in [1, 3, 5, 100] {
            let channel = module.get_channel(n);
            assert!(!channel.is_valid());
            assert!(matches!(
                channel.get_value(),
                Err(DaqError::InvalidChannel { .. })
            ));
            assert!(channel.set_value(1).is_err());
        }
    }

    #[test]
    fn test_default_channel_is_invalid() {
        let channel = Channel::<f64>::default();
        assert!(!channel.is_valid());
        assert!(channel.update().is_err());
    }

    #[test]
    fn test_channel_invalid_after_module_drop() {
        let module = module();
        let channel = module.get_channel(2);
        channel.set_value(7).unwrap();
        assert_eq!(module.get_value(2).unwrap(), 7);

        drop(module);
        assert!(!channel.is_valid());
        match channel.get_value() {
            Err(DaqError::InvalidChannel { module, channel }) => {
                assert_eq!(module, "enc");
                assert_eq!(channel, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(channel.clone().module_name(), "enc");
    }

    #[test]
    fn test_channel_update_touches_one_value() {
        let module = module();
        let channels = module.channels();
        channels[1].update().unwrap();
        assert_eq!(module.get_values(), vec![0, 100, 0]);
        module.update().unwrap();
        assert_eq!(module.get_values(), vec![1, 101, 1]);
    }
}
