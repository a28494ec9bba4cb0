//! Integration tests for the composite DAQ over the simulated board

use mel_daq::drivers::simulation::{SimHandle, SimulationDriver};
use mel_daq::prelude::*;
use std::thread;
use std::time::Duration;

fn sim_daq(config: &DaqConfig) -> (Daq, SimHandle) {
    let driver = SimulationDriver::new();
    let sim = driver.handle();
    let daq = Daq::new(config, Box::new(driver)).expect("daq");
    (daq, sim)
}

#[test]
fn test_update_before_open_fails() {
    let (daq, sim) = sim_daq(&DaqConfig::simulated("closed", 2));
    assert!(matches!(daq.update_input(), Err(DaqError::NotOpen { .. })));
    assert!(matches!(daq.update_output(), Err(DaqError::NotOpen { .. })));
    assert!(!sim.is_open());
}

#[test]
fn test_enable_opens_and_writes_enable_values() -> DaqResult<()> {
    let mut config = DaqConfig::simulated("en", 2);
    config.analog_output.enable_value = 1.0;
    config.digital_output.enable_value = true;
    let (mut daq, sim) = sim_daq(&config);

    daq.enable()?;
    assert!(daq.is_open());
    assert!(daq.is_enabled());
    assert_eq!(sim.analog_output(0)?, 1.0);
    assert!(sim.digital_output(1)?);

    // Enabling again has no side effects.
    let before = sim.transactions();
    daq.enable()?;
    assert_eq!(sim.transactions(), before);
    Ok(())
}

#[test]
fn test_loopback_cycle() -> DaqResult<()> {
    let (mut daq, sim) = sim_daq(&DaqConfig::simulated("loop", 4));
    daq.enable()?;

    let ao = daq.analog_output().unwrap().get_channels(&[0, 3]);
    ao[0].set_value(2.5)?;
    ao[1].set_value(-1.25)?;
    daq.digital_output().unwrap().set_value(2, true)?;
    daq.update_output()?;
    daq.update_input()?;

    let ai = daq.analog_input().unwrap();
    assert_eq!(ai.get_value(0)?, 2.5);
    assert_eq!(ai.get_value(3)?, -1.25);
    assert!(daq.digital_input().unwrap().get_value(2)?);

    sim.set_analog_input(1, Some(4.0))?;
    daq.update_input()?;
    assert_eq!(ai.get_value(1)?, 4.0);
    Ok(())
}

#[test]
fn test_analog_output_range_from_config() -> DaqResult<()> {
    let mut config = DaqConfig::simulated("range", 1);
    config.analog_output.min = -5.0;
    config.analog_output.max = 5.0;
    let (mut daq, sim) = sim_daq(&config);
    daq.enable()?;

    let ao = daq.analog_output().unwrap();
    ao.set_value(0, 7.0)?;
    daq.update_output()?;
    assert_eq!(sim.analog_output(0)?, 5.0);

    ao.set_range_policy(RangePolicy::Reject);
    assert!(matches!(
        ao.set_value(0, -6.0),
        Err(DaqError::ValueOutOfRange { .. })
    ));
    Ok(())
}

#[test]
fn test_encoder_integrates_rate() -> DaqResult<()> {
    let (mut daq, sim) = sim_daq(&DaqConfig::simulated("enc", 1));
    daq.enable()?;
    daq.update_input()?;

    sim.set_encoder_rate(0, 10_000.0)?;
    thread::sleep(Duration::from_millis(50));
    daq.update_input()?;

    let count = daq.encoder().unwrap().get_value(0)?;
    assert!(count >= 400, "count {count} too low");
    assert_eq!(daq.velocity().unwrap().get_value(0)?, 10_000.0);
    Ok(())
}

#[test]
fn test_failed_enable_aborts_but_stays_open() {
    let (mut daq, sim) = sim_daq(&DaqConfig::simulated("partial", 1));

    sim.set_fail_enable(true);
    assert!(daq.enable().is_err());
    assert!(!daq.is_enabled());
    assert!(daq.is_open());
    assert!(!daq.analog_input().unwrap().is_enabled());

    sim.set_fail_enable(false);
    assert!(daq.enable().is_ok());
    assert!(daq.is_enabled());
}

#[test]
fn test_disable_attempts_every_bank() -> DaqResult<()> {
    let mut config = DaqConfig::simulated("dis", 1);
    config.analog_output.disable_value = -2.0;
    config.digital_output.disable_value = true;
    let (mut daq, sim) = sim_daq(&config);
    daq.enable()?;

    // First output push fails, the digital bank must still be disabled.
    sim.fail_next_transactions(1);
    assert!(daq.disable().is_err());
    assert!(!daq.is_enabled());
    assert!(!daq.analog_output().unwrap().is_enabled());
    assert!(!daq.digital_output().unwrap().is_enabled());
    assert!(sim.digital_output(0)?);
    Ok(())
}

#[test]
fn test_hardware_failure_is_reported_not_fatal() -> DaqResult<()> {
    let (mut daq, sim) = sim_daq(&DaqConfig::simulated("hw", 1));
    daq.enable()?;
    sim.fail_next_transactions(1);
    assert!(matches!(daq.update_input(), Err(DaqError::Hardware { .. })));
    daq.update_input()?;
    Ok(())
}

#[test]
fn test_watchdog_expiry_safes_output() -> DaqResult<()> {
    let mut config = DaqConfig::simulated("wd", 1);
    config.channels = Default::default();
    config.channels.analog_output = vec![0];
    config.watchdog_timeout_ms = 100;
    config.analog_output.expire_value = 0.0;
    let (mut daq, sim) = sim_daq(&config);
    daq.enable()?;

    daq.analog_output().unwrap().set_value(0, 5.0)?;
    daq.update_output()?;
    assert_eq!(sim.analog_output(0)?, 5.0);

    daq.watchdog_mut().start();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(daq.watchdog_mut().check(), WatchdogState::Expired);

    assert_eq!(daq.analog_output().unwrap().get_value(0)?, 0.0);
    assert_eq!(sim.analog_output(0)?, 0.0);
    assert!(matches!(
        daq.watchdog_mut().kick(),
        Err(DaqError::WatchdogExpired { .. })
    ));

    daq.watchdog_mut().clear();
    daq.watchdog_mut().start();
    assert!(daq.watchdog_mut().kick().is_ok());
    Ok(())
}

#[test]
fn test_regular_kicks_keep_outputs_live() -> DaqResult<()> {
    let mut config = DaqConfig::simulated("kick", 1);
    config.watchdog_timeout_ms = 100;
    let (mut daq, sim) = sim_daq(&config);
    daq.enable()?;
    daq.analog_output().unwrap().set_value(0, 3.0)?;
    daq.update_output()?;

    daq.watchdog_mut().start();
    for _ in 0..10 {
        thread::sleep(Duration::from_millis(10));
        daq.watchdog_mut().kick()?;
        assert_eq!(daq.watchdog_mut().check(), WatchdogState::Running);
    }
    assert_eq!(sim.analog_output(0)?, 3.0);
    Ok(())
}

#[test]
fn test_drop_disables_and_closes() -> DaqResult<()> {
    let mut config = DaqConfig::simulated("drop", 1);
    config.analog_output.disable_value = -1.0;
    let (mut daq, sim) = sim_daq(&config);
    daq.enable()?;
    daq.analog_output().unwrap().set_value(0, 4.0)?;
    daq.update_output()?;

    let channel = daq.analog_output().unwrap().get_channel(0);
    drop(daq);
    assert!(!sim.is_open());
    assert_eq!(sim.analog_output(0)?, -1.0);
    assert!(!channel.is_valid());
    Ok(())
}

#[test]
fn test_registry_creates_configured_daq() -> DaqResult<()> {
    let registry = DriverRegistry::with_builtin_drivers();
    let mut config = DaqConfig::simulated("reg", 2);
    config.channels.velocity.clear();

    let daq = registry.create_daq(&config)?;
    assert_eq!(daq.driver_name(), "simulation");
    assert!(daq.velocity().is_none());
    assert_eq!(daq.analog_input().unwrap().channel_numbers(), vec![0, 1]);

    config.channels.encoder = vec![8];
    assert!(matches!(
        registry.create_daq(&config),
        Err(DaqError::ChannelOutOfRange { channel: 8, .. })
    ));

    config.driver = "nope".into();
    assert!(matches!(
        registry.create_daq(&config),
        Err(DaqError::DriverNotFound(_))
    ));
    Ok(())
}

#[test]
fn test_identify_finds_jumpered_channel() -> DaqResult<()> {
    let (mut daq, sim) = sim_daq(&DaqConfig::simulated("ident", 4));
    daq.enable()?;

    // Only channel 2 keeps its DO -> DI loopback.
    for channel in [0, 1, 3] {
        sim.set_digital_input(channel, Some(false))?;
    }
    assert!(!daq.identify_channel(0, Duration::ZERO)?);
    assert!(daq.identify_channel(2, Duration::ZERO)?);
    assert_eq!(daq.identify(Duration::ZERO)?, Some(2));
    // Tested outputs are left low, looped back or not.
    assert!(!sim.digital_output(0)?);
    assert!(!sim.digital_output(2)?);

    sim.set_digital_input(2, Some(true))?;
    assert_eq!(daq.identify(Duration::ZERO)?, None);
    Ok(())
}

#[test]
fn test_identify_requires_digital_banks_and_session() {
    let mut config = DaqConfig::simulated("nodig", 2);
    config.channels.digital_input.clear();
    let (daq, _sim) = sim_daq(&config);
    assert!(matches!(
        daq.identify(Duration::ZERO),
        Err(DaqError::Unsupported { .. })
    ));

    let (closed, _sim) = sim_daq(&DaqConfig::simulated("closed_id", 2));
    assert!(matches!(
        closed.identify_channel(0, Duration::ZERO),
        Err(DaqError::NotOpen { .. })
    ));
}

#[test]
fn test_benchmark_counts_transactions() -> DaqResult<()> {
    let (mut daq, sim) = sim_daq(&DaqConfig::simulated("bench", 2));
    daq.enable()?;
    let before = sim.transactions();

    let report = daq.benchmark(100)?;
    assert_eq!(report.iterations, 100);
    assert!(report.elapsed_s > 0.0);
    assert!(report.mean_read_us >= 0.0 && report.mean_write_us >= 0.0);
    // Six banks per round: four inputs, two outputs.
    assert_eq!(sim.transactions() - before, 600);

    sim.fail_next_transactions(1);
    assert!(matches!(daq.benchmark(10), Err(DaqError::Hardware { .. })));
    Ok(())
}
