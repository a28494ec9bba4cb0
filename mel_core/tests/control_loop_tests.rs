//! Control loop integration tests over the simulated DAQ.

use mel_core::config::LoopConfig;
use mel_core::control_loop::{ControlLoop, StopReason};
use mel_core::error::LoopError;
use mel_core::timer::WaitMode;
use mel_daq::drivers::simulation::{SimHandle, SimulationDriver};
use mel_daq::{Daq, DaqConfig, Device, WatchdogState};
use mel_shared_memory::{MelShare, ShmOptions};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn sim_daq(config: &DaqConfig) -> (Daq, SimHandle) {
    let driver = SimulationDriver::new();
    let sim = driver.handle();
    let daq = Daq::new(config, Box::new(driver)).expect("daq");
    (daq, sim)
}

fn loop_config(duration_s: f64) -> LoopConfig {
    LoopConfig {
        frequency_hz: 1000,
        wait_mode: WaitMode::Hybrid,
        duration_s: Some(duration_s),
        ..LoopConfig::default()
    }
}

#[test]
fn test_runs_for_configured_duration() -> Result<(), LoopError> {
    let (mut daq, sim) = sim_daq(&DaqConfig::simulated("dur", 2));
    let mut control = ControlLoop::new(loop_config(0.1), &ShmOptions::default())?;

    let mut seen = 0u64;
    let summary = control.run(&mut daq, |cycle| {
        assert_eq!(cycle.tick(), seen);
        seen += 1;
        cycle.daq().analog_output().unwrap().set_value(0, 1.5)?;
        Ok(())
    })?;

    assert_eq!(summary.reason, StopReason::DurationElapsed);
    assert!(summary.cycles >= 80 && summary.cycles <= 101, "{}", summary.cycles);
    assert_eq!(summary.cycles, seen);
    assert_eq!(summary.io_failures, 0);
    assert_eq!(summary.watchdog_expirations, 0);

    // The loop disables the DAQ on exit; disable values are 0 V.
    assert!(!daq.is_enabled());
    assert_eq!(sim.analog_output(0)?, 0.0);
    Ok(())
}

#[test]
fn test_outputs_reach_inputs_next_cycle() -> Result<(), LoopError> {
    let (mut daq, _sim) = sim_daq(&DaqConfig::simulated("loopback", 1));
    let mut control = ControlLoop::new(loop_config(0.05), &ShmOptions::default())?;

    let mut readback = Vec::new();
    control.run(&mut daq, |cycle| {
        let daq = cycle.daq();
        readback.push(daq.analog_input().unwrap().get_value(0)?);
        daq.analog_output()
            .unwrap()
            .set_value(0, cycle.tick() as f64 * 0.01)?;
        Ok(())
    })?;

    // Input of cycle n is the output written in cycle n - 1.
    assert_eq!(readback[0], 0.0);
    for (n, value) in readback.iter().enumerate().skip(1) {
        assert!((value - (n - 1) as f64 * 0.01).abs() < 1e-12);
    }
    Ok(())
}

#[test]
fn test_stop_flag_ends_run() -> Result<(), LoopError> {
    let (mut daq, _sim) = sim_daq(&DaqConfig::simulated("stop", 1));
    let mut control = ControlLoop::new(LoopConfig::default(), &ShmOptions::default())?;

    let flag = control.running_flag();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        flag.store(false, Ordering::SeqCst);
    });

    let summary = control.run(&mut daq, |_| Ok(()))?;
    stopper.join().unwrap();
    assert_eq!(summary.reason, StopReason::Stopped);
    assert!(summary.cycles > 0);
    Ok(())
}

#[test]
fn test_watchdog_expiry_stops_loop_and_safes_outputs() -> Result<(), LoopError> {
    let mut config = DaqConfig::simulated("wd", 1);
    config.watchdog_timeout_ms = 20;
    config.analog_output.expire_value = -1.0;
    let (mut daq, sim) = sim_daq(&config);
    let mut control = ControlLoop::new(loop_config(2.0), &ShmOptions::default())?;

    let summary = control.run(&mut daq, |cycle| {
        cycle.daq().analog_output().unwrap().set_value(0, 4.0)?;
        if cycle.tick() == 5 {
            // A stalled body misses the watchdog deadline.
            thread::sleep(Duration::from_millis(40));
        }
        Ok(())
    })?;

    assert_eq!(summary.reason, StopReason::WatchdogExpired);
    assert_eq!(summary.watchdog_expirations, 1);
    assert!(summary.cycles <= 10);
    assert_eq!(daq.watchdog().state(), WatchdogState::Stopped);
    assert!(sim.analog_output(0)? <= 0.0);
    Ok(())
}

#[test]
fn test_expired_outputs_held_when_loop_continues() -> Result<(), LoopError> {
    let mut config = DaqConfig::simulated("hold", 1);
    config.watchdog_timeout_ms = 20;
    config.analog_output.expire_value = -1.0;
    let (mut daq, sim) = sim_daq(&config);
    let control_config = LoopConfig {
        stop_on_watchdog_expiry: false,
        ..loop_config(0.1)
    };
    let mut control = ControlLoop::new(control_config, &ShmOptions::default())?;

    let mut held = Vec::new();
    let summary = control.run(&mut daq, |cycle| {
        cycle.daq().analog_output().unwrap().set_value(0, 4.0)?;
        match cycle.tick() {
            5 => thread::sleep(Duration::from_millis(40)),
            t if t > 10 => held.push(sim.analog_output(0)?),
            _ => {}
        }
        Ok(())
    })?;

    assert_eq!(summary.reason, StopReason::DurationElapsed);
    assert_eq!(summary.watchdog_expirations, 1);
    assert!(!held.is_empty());
    assert!(held.iter().all(|&v| v == -1.0));
    Ok(())
}

#[test]
fn test_io_failures_tolerated_then_fatal() -> Result<(), LoopError> {
    let (mut daq, sim) = sim_daq(&DaqConfig::simulated("io", 1));
    let config = LoopConfig {
        max_consecutive_io_failures: 3,
        ..loop_config(0.1)
    };
    let mut control = ControlLoop::new(config, &ShmOptions::default())?;

    // Two bad transactions are absorbed, then a burst ends the run.
    let summary = control.run(&mut daq, |cycle| {
        match cycle.tick() {
            2 => sim.fail_next_transactions(2),
            10 => sim.fail_next_transactions(100),
            _ => {}
        }
        Ok(())
    })?;

    // Three in a row are tolerated, the fourth ends the run.
    match summary.reason {
        StopReason::IoFailures { consecutive, .. } => assert_eq!(consecutive, 4),
        other => panic!("unexpected stop reason {other:?}"),
    }
    assert!(summary.io_failures >= 5);
    Ok(())
}

#[test]
fn test_zero_tolerance_stops_on_first_io_failure() -> Result<(), LoopError> {
    let (mut daq, sim) = sim_daq(&DaqConfig::simulated("io0", 1));
    let config = LoopConfig {
        max_consecutive_io_failures: 0,
        ..loop_config(1.0)
    };
    let mut control = ControlLoop::new(config, &ShmOptions::default())?;

    let summary = control.run(&mut daq, |cycle| {
        if cycle.tick() == 4 {
            sim.fail_next_transactions(1);
        }
        Ok(())
    })?;

    match summary.reason {
        StopReason::IoFailures { consecutive, .. } => assert_eq!(consecutive, 1),
        other => panic!("unexpected stop reason {other:?}"),
    }
    assert_eq!(summary.io_failures, 1);
    assert_eq!(summary.cycles, 4);
    Ok(())
}

#[test]
fn test_body_error_disables_and_propagates() {
    let (mut daq, _sim) = sim_daq(&DaqConfig::simulated("body", 1));
    let mut control = ControlLoop::new(loop_config(1.0), &ShmOptions::default()).unwrap();

    let result = control.run(&mut daq, |cycle| {
        if cycle.tick() == 3 {
            return Err(LoopError::Body("setpoint out of bounds".into()));
        }
        Ok(())
    });

    assert!(matches!(result, Err(LoopError::Body(_))));
    assert!(!daq.is_enabled());
}

#[test]
fn test_telemetry_published_to_segment() -> Result<(), LoopError> {
    let dir = TempDir::new().unwrap();
    let shm = ShmOptions::in_dir(dir.path());
    let (mut daq, _sim) = sim_daq(&DaqConfig::simulated("tele", 1));

    let config = LoopConfig {
        telemetry_segment: Some("telemetry".into()),
        ..loop_config(0.05)
    };
    let mut control = ControlLoop::new(config, &shm)?;
    let reader = MelShare::attach("telemetry", &shm)?;

    let summary = control.run(&mut daq, |cycle| {
        let tick = cycle.tick() as f64;
        cycle.publish(&[tick, 42.0]);
        Ok(())
    })?;

    let values: Vec<f64> = reader.read_vec()?;
    assert_eq!(values.len(), 2);
    assert_eq!(values[0], (summary.cycles - 1) as f64);
    assert_eq!(values[1], 42.0);
    assert_eq!(summary.telemetry_drops, 0);
    Ok(())
}
