//! Composite DAQ: one driver session, its module banks and a watchdog.

use crate::config::DaqConfig;
use crate::device::Device;
use crate::driver::{DaqDriver, ModuleKind};
use crate::error::{DaqError, DaqResult};
use crate::module::{Module, ModuleBackend};
use crate::signal::{Count, Logic, Rate, Signal, Voltage};
use crate::watchdog::Watchdog;
use mel_common::config::Validate;
use tracing::{info, warn};

/// A DAQ assembled from a driver and a [`DaqConfig`].
///
/// Banks without configured channels are absent. The watchdog is bound to
/// the analog and digital output banks. Dropping the DAQ disables it and
/// closes the session.
pub struct Daq {
    name: String,
    driver: Box<dyn DaqDriver>,
    open: bool,
    enabled: bool,
    analog_input: Option<Module<Voltage>>,
    analog_output: Option<Module<Voltage>>,
    digital_input: Option<Module<Logic>>,
    digital_output: Option<Module<Logic>>,
    encoder: Option<Module<Count>>,
    velocity: Option<Module<Rate>>,
    watchdog: Watchdog,
}

impl Daq {
    /// Assemble a DAQ. The session stays closed until [`Daq::open`] or
    /// [`Device::enable`].
    pub fn new(config: &DaqConfig, mut driver: Box<dyn DaqDriver>) -> DaqResult<Self> {
        config.validate()?;
        let mut b = driver.backends()?;
        let d: &dyn DaqDriver = &*driver;

        let analog_input = build(config, d, ModuleKind::AnalogInput, b.analog_input.take())?;
        let analog_output = build(config, d, ModuleKind::AnalogOutput, b.analog_output.take())?;
        let digital_input = build(config, d, ModuleKind::DigitalInput, b.digital_input.take())?;
        let digital_output =
            build(config, d, ModuleKind::DigitalOutput, b.digital_output.take())?;
        let encoder = build(config, d, ModuleKind::Encoder, b.encoder.take())?;
        let velocity = build(config, d, ModuleKind::Velocity, b.velocity.take())?;

        if let Some(ao) = &analog_output {
            let n = ao.channel_count();
            let cfg = &config.analog_output;
            ao.set_ranges(&vec![cfg.min; n], &vec![cfg.max; n])?;
            ao.set_enable_values(&vec![cfg.enable_value; n])?;
            ao.set_disable_values(&vec![cfg.disable_value; n])?;
            ao.set_expire_values(&vec![cfg.expire_value; n])?;
        }
        if let Some(dout) = &digital_output {
            let n = dout.channel_count();
            let cfg = &config.digital_output;
            dout.set_enable_values(&vec![cfg.enable_value; n])?;
            dout.set_disable_values(&vec![cfg.disable_value; n])?;
            dout.set_expire_values(&vec![cfg.expire_value; n])?;
        }

        let mut watchdog = Watchdog::new(
            format!("{}/watchdog", config.name),
            config.watchdog_timeout(),
        );
        if let Some(ao) = &analog_output {
            watchdog.bind(ao);
        }
        if let Some(dout) = &digital_output {
            watchdog.bind(dout);
        }

        info!(
            "DAQ '{}' assembled on driver '{}' v{}",
            config.name,
            driver.name(),
            driver.version()
        );
        Ok(Self {
            name: config.name.clone(),
            driver,
            open: false,
            enabled: false,
            analog_input,
            analog_output,
            digital_input,
            digital_output,
            encoder,
            velocity,
            watchdog,
        })
    }

    /// Name of the driver behind this DAQ.
    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Analog input bank.
    pub fn analog_input(&self) -> Option<&Module<Voltage>> {
        self.analog_input.as_ref()
    }

    /// Analog output bank.
    pub fn analog_output(&self) -> Option<&Module<Voltage>> {
        self.analog_output.as_ref()
    }

    /// Digital input bank.
    pub fn digital_input(&self) -> Option<&Module<Logic>> {
        self.digital_input.as_ref()
    }

    /// Digital output bank.
    pub fn digital_output(&self) -> Option<&Module<Logic>> {
        self.digital_output.as_ref()
    }

    /// Encoder bank.
    pub fn encoder(&self) -> Option<&Module<Count>> {
        self.encoder.as_ref()
    }

    /// Velocity bank.
    pub fn velocity(&self) -> Option<&Module<Rate>> {
        self.velocity.as_ref()
    }

    /// Watchdog bound to the output banks.
    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Mutable watchdog access for start/kick/check.
    pub fn watchdog_mut(&mut self) -> &mut Watchdog {
        &mut self.watchdog
    }

    /// Whether the hardware session is open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Open the hardware session. No-op if already open.
    pub fn open(&mut self) -> DaqResult<()> {
        if self.open {
            return Ok(());
        }
        self.driver.open()?;
        self.open = true;
        info!("DAQ '{}' opened", self.name);
        Ok(())
    }

    /// Disable if needed, then close the session. No-op if closed.
    pub fn close(&mut self) -> DaqResult<()> {
        if !self.open {
            return Ok(());
        }
        if let Err(e) = self.disable() {
            warn!("DAQ '{}' closed after a failed disable: {}", self.name, e);
        }
        self.driver.close()?;
        self.open = false;
        info!("DAQ '{}' closed", self.name);
        Ok(())
    }

    /// Pull every input bank from the hardware.
    pub fn update_input(&self) -> DaqResult<()> {
        self.require_open()?;
        update_bank(&self.analog_input)?;
        update_bank(&self.digital_input)?;
        update_bank(&self.encoder)?;
        update_bank(&self.velocity)?;
        Ok(())
    }

    /// Push every output bank to the hardware.
    pub fn update_output(&self) -> DaqResult<()> {
        self.require_open()?;
        update_bank(&self.analog_output)?;
        update_bank(&self.digital_output)?;
        Ok(())
    }

    pub(crate) fn require_open(&self) -> DaqResult<()> {
        if !self.open {
            return Err(DaqError::NotOpen {
                device: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Banks in enable order.
    fn banks_mut(&mut self) -> Vec<&mut dyn Device> {
        let mut banks: Vec<&mut dyn Device> = Vec::with_capacity(ModuleKind::ALL.len());
        if let Some(m) = self.analog_input.as_mut() {
            banks.push(m);
        }
        if let Some(m) = self.analog_output.as_mut() {
            banks.push(m);
        }
        if let Some(m) = self.digital_input.as_mut() {
            banks.push(m);
        }
        if let Some(m) = self.digital_output.as_mut() {
            banks.push(m);
        }
        if let Some(m) = self.encoder.as_mut() {
            banks.push(m);
        }
        if let Some(m) = self.velocity.as_mut() {
            banks.push(m);
        }
        banks
    }
}

impl Device for Daq {
    fn name(&self) -> &str {
        &self.name
    }

    /// Open if closed, then enable each bank in order. A failing bank aborts
    /// the transition; banks already enabled stay enabled.
    fn enable(&mut self) -> DaqResult<()> {
        if self.enabled {
            return Ok(());
        }
        self.open()?;
        for bank in self.banks_mut() {
            bank.enable()?;
        }
        self.enabled = true;
        info!("DAQ '{}' enabled", self.name);
        Ok(())
    }

    /// Disable every bank even after failures, stop the watchdog, and end
    /// up disabled. Returns the first error.
    fn disable(&mut self) -> DaqResult<()> {
        let mut first_error = None;
        for bank in self.banks_mut() {
            if let Err(e) = bank.disable() {
                first_error.get_or_insert(e);
            }
        }
        self.watchdog.stop();
        if self.enabled {
            info!("DAQ '{}' disabled", self.name);
        }
        self.enabled = false;
        first_error.map_or(Ok(()), Err)
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Drop for Daq {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("DAQ '{}' close on drop failed: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for Daq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daq")
            .field("name", &self.name)
            .field("driver", &self.driver.name())
            .field("open", &self.open)
            .field("enabled", &self.enabled)
            .finish()
    }
}

fn build<T: Signal>(
    config: &DaqConfig,
    driver: &dyn DaqDriver,
    kind: ModuleKind,
    backend: Option<Box<dyn ModuleBackend<T>>>,
) -> DaqResult<Option<Module<T>>> {
    let channels = config.channels.for_kind(kind);
    if channels.is_empty() {
        return Ok(None);
    }
    let backend = backend.ok_or_else(|| DaqError::Unsupported {
        driver: driver.name().to_string(),
        kind: kind.to_string(),
    })?;
    let module = Module::new(
        format!("{}/{}", config.name, kind),
        kind.io_type(),
        channels,
        driver.channel_count(kind),
        backend,
    )?;
    module.set_range_policy(config.range_policy);
    Ok(Some(module))
}

fn update_bank<T: Signal>(bank: &Option<Module<T>>) -> DaqResult<()> {
    match bank {
        Some(module) => module.update(),
        None => Ok(()),
    }
}
