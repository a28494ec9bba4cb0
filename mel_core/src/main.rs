//! # mel
//!
//! Command line front-end for MEL:
//!
//! - `melshare-data` / `melshare-msg`: write or read a MelShare segment
//! - `melscope`: publish demo waveforms for a scope at a fixed rate
//! - `clock`: measure `Timer` pacing for a wait mode
//! - `sim`: run the control loop on the simulated DAQ
//! - `q8`: identify the configured DAQ by loopback and benchmark its I/O
//!
//! Writers keep their segment alive until Ctrl-C, since the last handle to
//! close removes it.

use clap::{Parser, Subcommand};
use mel_common::config::{ConfigError, ConfigLoader, LogLevel};
use mel_common::consts::DEFAULT_MELSHARE_CAPACITY;
use mel_common::frequency::Frequency;
use mel_common::logging::init_logging;
use mel_core::config::AppConfig;
use mel_core::control_loop::ControlLoop;
use mel_core::cycle::CycleStats;
use mel_core::timer::{Timer, WaitMode, WaitStatus};
use mel_core::waveform::{Integrator, Shape, Waveform, sin_wave};
use mel_daq::diagnostics::IDENTIFY_SETTLE;
use mel_daq::{BenchmarkReport, Device, DriverRegistry};
use mel_shared_memory::{MelShare, ShmError, ShmOptions, read_message_from};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// MEL: mechatronics control loops, DAQ access and shared memory exchange
#[derive(Parser, Debug)]
#[command(name = "mel")]
#[command(version)]
#[command(about = "Mechatronics control loops, DAQ access and MelShare exchange")]
struct Args {
    /// Path to the TOML configuration (defaults apply if omitted).
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write numbers to, or read numbers from, a MelShare segment
    MelshareData {
        #[command(subcommand)]
        action: DataAction,
    },
    /// Write text to, or read text from, a MelShare message region
    MelshareMsg {
        #[command(subcommand)]
        action: MsgAction,
    },
    /// Publish sine/square/triangle/sawtooth data for a scope
    Melscope {
        /// Publish rate [Hz]
        #[arg(long, default_value_t = 1000)]
        frequency: u64,
        /// Stop after this many seconds
        #[arg(long, default_value_t = 60.0)]
        duration: f64,
    },
    /// Measure timer pacing
    Clock {
        /// Loop rate [Hz]
        #[arg(long, default_value_t = 1000)]
        frequency: u64,
        /// Number of waits to measure
        #[arg(long, default_value_t = 1000)]
        cycles: u64,
        /// Wait strategy
        #[arg(long, value_enum, default_value_t = ModeArg::Hybrid)]
        mode: ModeArg,
    },
    /// Run the control loop on the configured DAQ
    Sim {
        /// Override the run duration [s]
        #[arg(long)]
        duration: Option<f64>,
        /// Sine amplitude on every analog output [V]
        #[arg(long, default_value_t = 5.0)]
        amplitude: f64,
        /// Sine frequency [Hz]
        #[arg(long, default_value_t = 1.0)]
        sine_hz: f64,
    },
    /// Identify the configured DAQ by DO/DI loopback and benchmark read/write speed
    Q8 {
        /// Read/write rounds to time
        #[arg(long, default_value_t = 100_000)]
        iterations: u64,
        /// Skip loopback identification
        #[arg(long)]
        no_identify: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DataAction {
    /// Write comma separated numbers and hold the segment until Ctrl-C
    Write {
        /// Segment name
        name: String,
        /// Values, e.g. `1.5,2,3`
        #[arg(value_delimiter = ',', allow_negative_numbers = true, required = true)]
        values: Vec<f64>,
    },
    /// Print the numbers currently in a segment
    Read {
        /// Segment name
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum MsgAction {
    /// Write a message and hold the segment until Ctrl-C
    Write {
        /// Segment name
        name: String,
        /// Message text
        text: String,
    },
    /// Print the current message
    Read {
        /// Segment name
        name: String,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Busy,
    Sleep,
    Hybrid,
}

impl From<ModeArg> for WaitMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Busy => WaitMode::Busy,
            ModeArg::Sleep => WaitMode::Sleep,
            ModeArg::Hybrid => WaitMode::Hybrid,
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            init_logging(LogLevel::Info, args.json);
            error!("FATAL: {e}");
            process::exit(1);
        }
    };
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.shared.log_level
    };
    init_logging(level, args.json || config.shared.json_logs);

    info!(
        "mel v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.shared.instance_name
    );

    if let Err(e) = run(&args, config) {
        error!("FATAL: {e}");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<AppConfig, ConfigError> {
    match &args.config {
        Some(path) => AppConfig::load_validated(path),
        None => Ok(AppConfig::default()),
    }
}

fn run(args: &Args, config: AppConfig) -> CliResult {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let shm = config.shm.options();
    match &args.command {
        Command::MelshareData { action } => melshare_data(action, &shm, &running),
        Command::MelshareMsg { action } => melshare_msg(action, &shm, &running),
        Command::Melscope {
            frequency,
            duration,
        } => melscope(Frequency::hertz(*frequency), *duration, &shm, &running),
        Command::Clock {
            frequency,
            cycles,
            mode,
        } => clock(Frequency::hertz(*frequency), *cycles, (*mode).into(), &running),
        Command::Sim {
            duration,
            amplitude,
            sine_hz,
        } => sim(config, *duration, *amplitude, *sine_hz, running),
        Command::Q8 {
            iterations,
            no_identify,
        } => q8(&config, *iterations, !*no_identify),
    }
}

fn hold(running: &AtomicBool) {
    info!("Holding segment, press Ctrl-C to release");
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn melshare_data(action: &DataAction, shm: &ShmOptions, running: &AtomicBool) -> CliResult {
    match action {
        DataAction::Write { name, values } => {
            let capacity = (values.len() * size_of::<f64>()).max(DEFAULT_MELSHARE_CAPACITY);
            let mut share = MelShare::open_with(name, capacity, shm)?;
            share.write_data(values)?;
            info!("Wrote {} values to '{}'", values.len(), name);
            hold(running);
        }
        DataAction::Read { name } => {
            let values: Vec<f64> = match MelShare::attach(name, shm) {
                Ok(share) => share.read_vec()?,
                Err(ShmError::NotFound { .. }) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            println!("{}", serde_json::to_string(&values)?);
        }
    }
    Ok(())
}

fn melshare_msg(action: &MsgAction, shm: &ShmOptions, running: &AtomicBool) -> CliResult {
    match action {
        MsgAction::Write { name, text } => {
            let capacity = text.len().max(DEFAULT_MELSHARE_CAPACITY);
            let mut share = MelShare::open_with(name, capacity, shm)?;
            share.write_message(text)?;
            info!("Wrote {} byte message to '{}'", text.len(), name);
            hold(running);
        }
        MsgAction::Read { name } => {
            println!("{}", read_message_from(name, shm)?);
        }
    }
    Ok(())
}

/// Scope demo: `integrals` carries t, dx/dt, x and the integrated x;
/// `cpp2py` carries four waveforms whose amplitudes and frequencies are read
/// back from `py2cpp_ampl` / `py2cpp_freq` every cycle.
fn melscope(rate: Frequency, duration: f64, shm: &ShmOptions, running: &AtomicBool) -> CliResult {
    let mut integrals = MelShare::open_with("integrals", 256, shm)?;
    let mut scope = MelShare::open_with("cpp2py", 256, shm)?;
    let mut ampl_in = MelShare::open_with("py2cpp_ampl", 256, shm)?;
    let mut freq_in = MelShare::open_with("py2cpp_freq", 256, shm)?;

    let mut amplitudes = [10.0, 8.0, 6.0, 4.0];
    let mut frequencies = [0.4, 0.6, 0.8, 1.0];
    ampl_in.write_data(&amplitudes)?;
    freq_in.write_data(&frequencies)?;

    let mut integrator = Integrator::new(5.0);
    let mut timer = Timer::from_frequency(rate, WaitMode::Hybrid)?;
    timer.start();
    info!("melscope publishing at {} Hz for {}s", rate.as_hertz(), duration);

    while running.load(Ordering::SeqCst) {
        let t = timer.time().as_secs_f64();
        if t >= duration {
            break;
        }

        let dxdt = 0.5 * (t.cos() + 7.0 * (7.0 * t).cos());
        let x = (4.0 * t).sin() * (3.0 * t).cos() + 5.0;
        let integrals_data = [t, dxdt, x, integrator.integrate(dxdt, t)];
        if let Err(e) = integrals.write_data(&integrals_data) {
            warn!("integrals write failed: {}", e);
        }

        // Keep the previous values if the scope side is mid-write.
        let _ = ampl_in.read_data(&mut amplitudes);
        let _ = freq_in.read_data(&mut frequencies);

        let mut waves = [0.0; 4];
        for (i, shape) in Shape::ALL.into_iter().enumerate() {
            waves[i] = Waveform::new(shape, amplitudes[i], frequencies[i]).evaluate(t);
        }
        if let Err(e) = scope.write_data(&waves) {
            warn!("cpp2py write failed: {}", e);
        }

        timer.wait();
    }
    info!(
        "melscope done after {} cycles, {} overruns",
        timer.ticks(),
        timer.overruns()
    );
    Ok(())
}

#[derive(Serialize)]
struct ClockReport {
    frequency_hz: u64,
    mode: WaitMode,
    cycles: u64,
    mean_interval_us: f64,
    min_interval_us: f64,
    max_interval_us: f64,
    overruns: u64,
    stats: CycleStats,
}

fn clock(rate: Frequency, cycles: u64, mode: WaitMode, running: &AtomicBool) -> CliResult {
    let mut timer = Timer::from_frequency(rate, mode)?;
    let mut stats = CycleStats::new();
    let mut last = timer.start();

    for _ in 0..cycles {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let boundary = timer.next_boundary();
        if let WaitStatus::Overrun { .. } = timer.wait() {
            stats.record_overrun();
        }
        let now = Instant::now();
        stats.record(
            (now - last).as_nanos() as u64,
            now.saturating_duration_since(boundary).as_nanos() as u64,
        );
        last = now;
    }

    let report = ClockReport {
        frequency_hz: rate.as_hertz(),
        mode,
        cycles: stats.cycle_count,
        mean_interval_us: stats.avg_cycle_ns() as f64 / 1e3,
        min_interval_us: stats.min_or_zero() as f64 / 1e3,
        max_interval_us: stats.max_cycle_ns as f64 / 1e3,
        overruns: timer.overruns(),
        stats,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn sim(
    mut config: AppConfig,
    duration: Option<f64>,
    amplitude: f64,
    sine_hz: f64,
    running: Arc<AtomicBool>,
) -> CliResult {
    if duration.is_some() {
        config.control.duration_s = duration;
    }

    let registry = DriverRegistry::with_builtin_drivers();
    info!("Available drivers: {:?}", registry.list_drivers());
    let mut daq = registry.create_daq(&config.daq)?;

    let mut control = ControlLoop::new(config.control, &config.shm.options())?;
    let stop = control.running_flag();
    // Forward Ctrl-C to the loop's stop flag.
    std::thread::spawn(move || {
        while running.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(20));
        }
        stop.store(false, Ordering::SeqCst);
    });

    let mut inputs = Vec::new();
    let summary = control.run(&mut daq, |cycle| {
        let t = cycle.time().as_secs_f64();
        let daq = cycle.daq();
        if let Some(ao) = daq.analog_output() {
            for (i, ch) in ao.channel_numbers().into_iter().enumerate() {
                let phase_shift = i as f64 / (4.0 * sine_hz.max(f64::EPSILON));
                ao.set_value(ch, sin_wave(amplitude, sine_hz, t + phase_shift))?;
            }
        }
        inputs.clear();
        inputs.push(t);
        if let Some(ai) = daq.analog_input() {
            inputs.extend(ai.get_values());
        }
        cycle.publish(&inputs);
        Ok(())
    })?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[derive(Serialize)]
struct Q8Report {
    daq: String,
    driver: &'static str,
    identified_channel: Option<u32>,
    benchmark: BenchmarkReport,
}

fn q8(config: &AppConfig, iterations: u64, identify: bool) -> CliResult {
    let registry = DriverRegistry::with_builtin_drivers();
    let mut daq = registry.create_daq(&config.daq)?;
    daq.enable()?;

    let identified_channel = if identify {
        let channel = daq.identify(IDENTIFY_SETTLE)?;
        if channel.is_none() {
            warn!("No DO/DI loopback found on '{}'", daq.name());
        }
        channel
    } else {
        None
    };
    let benchmark = daq.benchmark(iterations)?;
    daq.disable()?;

    let report = Q8Report {
        daq: daq.name().to_string(),
        driver: daq.driver_name(),
        identified_channel,
        benchmark,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
