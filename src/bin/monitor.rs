//! Sensor monitor - continuous single readings from every source
//!
//! Reads the accelerometer, gyroscope, clock and thermal source once per
//! cycle and displays them live, flagging any source that failed.

use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;

use vibe_telemetry::devices::host::{HostClock, SysfsThermal};
use vibe_telemetry::devices::sim::{ConstantThermal, CountingGyroscope, SineAccelerometer};
use vibe_telemetry::devices::ThermalSource;
use vibe_telemetry::sampler::ticks_to_datetime;
use vibe_telemetry::{create_bar, read_once, CancellationToken, ClockThermalSampler, RunConfig, TimeKeeper};

#[derive(Parser, Debug)]
#[command(name = "monitor")]
#[command(about = "Live single readings from every data source", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Readings per second
    #[arg(short, long, default_value_t = 20)]
    rate: u32,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())?;
    }

    let mut zone = SysfsThermal::new(&config.simulation.thermal_zone);
    let thermal: Box<dyn ThermalSource> = if zone.is_available() {
        Box::new(zone)
    } else {
        Box::new(ConstantThermal(config.simulation.fallback_fahrenheit))
    };
    let sampler = ClockThermalSampler::new(HostClock, thermal);
    let mut accel = SineAccelerometer::new(
        args.rate.max(1),
        config.simulation.tones_hz,
        config.simulation.amplitude,
    );
    let mut gyro = CountingGyroscope::new();

    let scale = config.telemetry.accel_scale;
    let period = Duration::from_secs_f64(1.0 / args.rate.max(1) as f64);
    let timer = TimeKeeper::new();
    let mut sample_count = 0u64;

    // Clear screen once at start
    print!("\x1B[2J\x1B[H");
    io::stdout().flush()?;

    while !cancel.is_cancelled() {
        let reading = read_once(&mut accel, &mut gyro, &sampler);
        sample_count += 1;

        let elapsed = timer.elapsed_secs();
        let rate = if elapsed > 0.0 {
            sample_count as f64 / elapsed
        } else {
            0.0
        };
        let [ax, ay, az] = reading.accel.map(|raw| raw as f64 * scale);
        let timestamp = ticks_to_datetime(reading.ticks)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "invalid".to_owned());

        // Move cursor to top without clearing (reduces flicker)
        print!("\x1B[H");
        println!("Sensor Monitor - Live Data                                     ");
        println!("========================                                       ");
        println!(
            "Time: {:.2}s | Readings: {} | Rate: {:.1} Hz                    ",
            elapsed, sample_count, rate
        );
        println!("Clock: {}   Thermal: {:.1}°F              ", timestamp, reading.thermal);
        println!();

        println!("ACCELEROMETER (g)                    -2g ◄─────────┼─────────► +2g");
        println!("  X: {:7.3}g  [{}]", ax, create_bar(ax, 2.0, 40));
        println!("  Y: {:7.3}g  [{}]", ay, create_bar(ay, 2.0, 40));
        println!("  Z: {:7.3}g  [{}]", az, create_bar(az, 2.0, 40));
        println!();

        let gyro_axes = [reading.gyro.gyro_x, reading.gyro.gyro_y, reading.gyro.gyro_z];
        println!("GYROSCOPE (raw)               -32768 ◄─────────┼─────────► +32767");
        for (label, value) in ["X", "Y", "Z"].iter().zip(gyro_axes) {
            println!(
                "  {}: {:7}   [{}]",
                label,
                value,
                create_bar(value as f64, i16::MAX as f64, 40)
            );
        }
        println!(
            "  Counter: {:6}  Temperature: {:6}                          ",
            reading.gyro.sample_counter, reading.gyro.temperature
        );
        println!();

        if reading.status.all_ok() {
            println!("Status: all sources OK                                         ");
        } else {
            let failed: Vec<String> = reading
                .status
                .failed_devices()
                .iter()
                .map(|device| device.to_string())
                .collect();
            println!("Status: FAILED {:<48}", failed.join(", "));
        }
        println!("Press Ctrl+C to exit                                           ");
        io::stdout().flush()?;

        thread::sleep(period);
    }

    println!();
    Ok(())
}
