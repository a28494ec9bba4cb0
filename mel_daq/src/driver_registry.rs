//! Driver registry for DAQ drivers.
//!
//! Provides a `DriverRegistry` struct for registering and retrieving DAQ
//! driver factories. This uses constructor-injection rather than global state.

use crate::config::DaqConfig;
use crate::daq::Daq;
use crate::driver::{DaqDriver, DriverFactory};
use crate::drivers::simulation;
use crate::error::{DaqError, DaqResult};
use std::collections::HashMap;

/// Registry of available DAQ drivers.
///
/// Constructed at startup, populated via `register()`, and owned by the
/// application for the lifetime of its control loop.
pub struct DriverRegistry {
    factories: HashMap<&'static str, DriverFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry holding the drivers built into this crate.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        registry.register("simulation", simulation::create_driver);
        registry
    }

    /// Register a driver factory.
    ///
    /// # Panics
    /// Panics if a driver with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: DriverFactory) {
        if self.factories.contains_key(name) {
            panic!("Driver '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a driver factory by name.
    pub fn get_factory(&self, name: &str) -> Option<DriverFactory> {
        self.factories.get(name).copied()
    }

    /// Create a driver instance by name.
    ///
    /// # Errors
    /// Returns `DaqError::DriverNotFound` if no driver with the given name is registered.
    pub fn create_driver(&self, name: &str) -> DaqResult<Box<dyn DaqDriver>> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| DaqError::DriverNotFound(name.to_string()))?;
        Ok(factory())
    }

    /// Create the driver named in `config` and assemble a [`Daq`] on it.
    pub fn create_daq(&self, config: &DaqConfig) -> DaqResult<Daq> {
        let driver = self.create_driver(&config.driver)?;
        Daq::new(config, driver)
    }

    /// List all registered driver names.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DaqBackends, ModuleKind};

    struct TestDriver;

    impl DaqDriver for TestDriver {
        fn name(&self) -> &'static str {
            "test"
        }

        fn version(&self) -> &'static str {
            "0.1.0"
        }

        fn channel_count(&self, _kind: ModuleKind) -> u32 {
            0
        }

        fn open(&mut self) -> DaqResult<()> {
            Ok(())
        }

        fn close(&mut self) -> DaqResult<()> {
            Ok(())
        }

        fn backends(&mut self) -> DaqResult<DaqBackends> {
            Ok(DaqBackends::default())
        }
    }

    fn create_test_driver() -> Box<dyn DaqDriver> {
        Box::new(TestDriver)
    }

    #[test]
    fn registry_register_and_create() {
        let mut reg = DriverRegistry::new();
        reg.register("test_driver", create_test_driver);

        let driver = reg.create_driver("test_driver").expect("should create");
        assert_eq!(driver.name(), "test");
    }

    #[test]
    fn registry_driver_not_found() {
        let reg = DriverRegistry::new();
        let result = reg.create_driver("nonexistent");
        assert!(matches!(result, Err(DaqError::DriverNotFound(_))));
    }

    #[test]
    fn registry_list_drivers() {
        let mut reg = DriverRegistry::with_builtin_drivers();
        reg.register("alpha", create_test_driver);

        let mut names = reg.list_drivers();
        names.sort();
        assert_eq!(names, vec!["alpha", "simulation"]);
    }

    #[test]
    fn registry_unsupported_bank() {
        let mut reg = DriverRegistry::new();
        reg.register("test", create_test_driver);
        let mut config = DaqConfig::simulated("t", 1);
        config.driver = "test".into();
        assert!(matches!(
            reg.create_daq(&config),
            Err(DaqError::Unsupported { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registry_duplicate_panics() {
        let mut reg = DriverRegistry::new();
        reg.register("dup", create_test_driver);
        reg.register("dup", create_test_driver);
    }
}
