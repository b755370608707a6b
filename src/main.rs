//! Vibration acquisition - records accelerometer and gyroscope streams and
//! sends one spectral summary per second over the serial downlink
//!
//! Usage:
//!   vibe-acquire --duration 60
//!   vibe-acquire --config vibe.toml --serial-port /dev/ttyUSB0

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vibe_telemetry::devices::host::{HostClock, SysfsThermal};
use vibe_telemetry::devices::sim::{ConstantThermal, CountingGyroscope, SineAccelerometer, TimerLine};
use vibe_telemetry::devices::{DataReadyLine, ThermalSource};
use vibe_telemetry::{
    AccelProducer, CancellationToken, ClockThermalSampler, Downlink, GyroProducer, LogLink,
    Pipeline, RotationQueue, RunConfig, SerialPortLink, TelemetryConsumer,
};

#[derive(Parser, Debug)]
#[command(name = "vibe-acquire")]
#[command(about = "Record vibration data and downlink per-second spectra", long_about = None)]
struct Args {
    /// TOML configuration file (defaults are used for missing keys)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Acquisition duration in seconds (overrides config; runs until Ctrl+C if unset)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Output directory for chunk files and the gyroscope file
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Serial port for telemetry messages; messages are logged if unset
    #[arg(short, long)]
    serial_port: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_thread_names(true)
        .init();

    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(duration) = args.duration {
        config.duration_secs = Some(duration);
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(port) = args.serial_port {
        config.serial.port = Some(port);
    }
    config.validate()?;

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;

    info!(
        output_dir = %config.output_dir.display(),
        samples_per_second = config.samples_per_second,
        chunk_size = config.chunk_size,
        iterations_per_file = config.iterations_per_file,
        "Starting acquisition"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel()).context("installing Ctrl+C handler")?;
    }

    let mut zone = SysfsThermal::new(&config.simulation.thermal_zone);
    let thermal: Box<dyn ThermalSource> = if zone.is_available() {
        Box::new(zone)
    } else {
        warn!(
            zone = %config.simulation.thermal_zone.display(),
            fahrenheit = config.simulation.fallback_fahrenheit,
            "Thermal zone missing, using constant reading"
        );
        Box::new(ConstantThermal(config.simulation.fallback_fahrenheit))
    };
    let sampler = Arc::new(ClockThermalSampler::new(HostClock, thermal));
    let queue = Arc::new(RotationQueue::new());

    let accel_source = SineAccelerometer::new(
        config.samples_per_second,
        config.simulation.tones_hz,
        config.simulation.amplitude,
    )
    .paced();
    let accel = AccelProducer::new(
        accel_source,
        sampler.clone(),
        queue.clone(),
        config.chunk_layout(),
    )?;

    let gyro_path = config.gyro_path();
    let gyro = GyroProducer::create(CountingGyroscope::new(), sampler, &gyro_path)
        .with_context(|| format!("opening {}", gyro_path.display()))?;
    let line = data_ready_line(&config)?;

    let link = match &config.serial.port {
        Some(port) => Downlink::Serial(SerialPortLink::connect(
            port,
            config.serial.baud_rate,
            Duration::from_millis(config.serial.timeout_ms),
        )),
        None => {
            info!("No serial port configured, telemetry messages are logged only");
            Downlink::Log(LogLink::default())
        }
    };
    let consumer = TelemetryConsumer::new(queue, link, config.consumer_config());

    let report = Pipeline::new(accel, gyro, line, consumer).run(&cancel, config.run_duration())?;

    info!(
        elapsed_secs = report.elapsed_secs,
        files = report.accel.files,
        records = report.accel.records,
        accel_failures = report.accel.read_failures,
        "Accelerometer summary"
    );
    info!(
        records = report.gyro.records,
        failures = report.gyro.read_failures + report.gyro.write_failures,
        "Gyroscope summary"
    );
    info!(
        files = report.telemetry.files,
        messages_sent = report.telemetry.messages_sent,
        messages_dropped = report.telemetry.messages_dropped,
        "Telemetry summary"
    );

    Ok(())
}

#[cfg(feature = "rpi")]
fn data_ready_line(config: &RunConfig) -> anyhow::Result<Box<dyn DataReadyLine>> {
    use vibe_telemetry::devices::gpio::GpioLine;

    match config.simulation.data_ready_pin {
        Some(pin) => {
            let line = GpioLine::new(pin).with_context(|| format!("claiming GPIO {}", pin))?;
            Ok(Box::new(line))
        }
        None => Ok(Box::new(TimerLine::new(config.simulation.gyro_rate_hz))),
    }
}

#[cfg(not(feature = "rpi"))]
fn data_ready_line(config: &RunConfig) -> anyhow::Result<Box<dyn DataReadyLine>> {
    if let Some(pin) = config.simulation.data_ready_pin {
        warn!(pin, "GPIO data-ready line needs the `rpi` feature, using the timer line");
    }
    Ok(Box::new(TimerLine::new(config.simulation.gyro_rate_hz)))
}
