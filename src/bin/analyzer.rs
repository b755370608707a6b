//! Recording analyzer
//!
//! Post-processing tool for accelerometer chunk files and the gyroscope file.
//!
//! Usage:
//!   analyzer --accel data/accel_0 data/accel_1 --all
//!   analyzer --gyro data/gyro.bin --statistics
//!   analyzer --accel data/accel_0 --spectrum --top 5

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;

use vibe_telemetry::record::FixedRecord;
use vibe_telemetry::sampler::{ticks_to_datetime, whole_second};
use vibe_telemetry::{AccelRecord, GyroRecord, RecordReader, RunConfig, SpectralAnalyzer};

#[derive(Parser, Debug)]
#[command(name = "analyzer")]
#[command(about = "Analyze recorded accelerometer and gyroscope files", long_about = None)]
struct Args {
    /// Accelerometer chunk files, replayed in the order given
    #[arg(short, long, num_args = 1..)]
    accel: Vec<PathBuf>,

    /// Gyroscope record file
    #[arg(short, long)]
    gyro: Option<PathBuf>,

    /// Compute statistical metrics
    #[arg(long)]
    statistics: bool,

    /// Per-second spectral peaks of the accelerometer axes
    #[arg(long)]
    spectrum: bool,

    /// Run all analyses
    #[arg(long)]
    all: bool,

    /// Peaks listed per axis and second
    #[arg(long, default_value_t = 5)]
    top: usize,

    /// Raw accelerometer counts per g
    #[arg(long)]
    scale: Option<f64>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let run_statistics = args.all || args.statistics;
    let run_spectrum = args.all || args.spectrum;
    if !run_statistics && !run_spectrum {
        bail!("specify at least one analysis type (--statistics, --spectrum, or --all)");
    }
    if args.accel.is_empty() && args.gyro.is_none() {
        bail!("no input files given (--accel and/or --gyro)");
    }

    let scale = args
        .scale
        .map(|counts_per_g| 1.0 / counts_per_g)
        .unwrap_or(RunConfig::default().telemetry.accel_scale);

    let mut accel = Vec::new();
    for path in &args.accel {
        let records = load_records::<AccelRecord>(path)?;
        eprintln!("Loaded {} records from {}", records.len(), path.display());
        accel.extend(records);
    }
    let gyro = match &args.gyro {
        Some(path) => {
            let records = load_records::<GyroRecord>(path)?;
            eprintln!("Loaded {} records from {}", records.len(), path.display());
            records
        }
        None => Vec::new(),
    };

    let mut output: Box<dyn Write> = if let Some(path) = args.output {
        Box::new(File::create(path)?)
    } else {
        Box::new(io::stdout())
    };

    write_header(&mut output, &accel, &gyro)?;

    if run_statistics {
        writeln!(output, "\n{}", "=".repeat(80))?;
        writeln!(output, "STATISTICAL ANALYSIS")?;
        writeln!(output, "{}", "=".repeat(80))?;
        run_statistics_analysis(&mut output, &accel, &gyro, scale)?;
    }

    if run_spectrum {
        writeln!(output, "\n{}", "=".repeat(80))?;
        writeln!(output, "PER-SECOND SPECTRUM")?;
        writeln!(output, "{}", "=".repeat(80))?;
        run_spectrum_analysis(&mut output, &accel, scale, args.top)?;
    }

    writeln!(output, "\n{}", "=".repeat(80))?;
    writeln!(output, "Analysis complete!")?;

    Ok(())
}

/// Read every whole record; a truncated tail is reported and dropped
fn load_records<T: FixedRecord>(path: &Path) -> anyhow::Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut records = Vec::new();
    for record in RecordReader::<_, T>::new(BufReader::new(file)) {
        match record {
            Ok(record) => records.push(record),
            Err(e) => {
                eprintln!("Warning: {}: {}", path.display(), e);
                break;
            }
        }
    }
    Ok(records)
}

fn format_ticks(ticks: i64) -> String {
    ticks_to_datetime(ticks)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format!("{} ticks", ticks))
}

fn write_header(output: &mut dyn Write, accel: &[AccelRecord], gyro: &[GyroRecord]) -> io::Result<()> {
    writeln!(output, "{}", "=".repeat(80))?;
    writeln!(output, "VIBRATION RECORDING REPORT")?;
    writeln!(output, "{}", "=".repeat(80))?;
    writeln!(output)?;
    if let (Some(first), Some(last)) = (accel.first(), accel.last()) {
        writeln!(output, "Accelerometer:")?;
        writeln!(output, "  Records: {}", accel.len())?;
        writeln!(output, "  First: {}", format_ticks(first.ticks))?;
        writeln!(output, "  Last: {}", format_ticks(last.ticks))?;
    }
    if let (Some(first), Some(last)) = (gyro.first(), gyro.last()) {
        writeln!(output, "Gyroscope:")?;
        writeln!(output, "  Records: {}", gyro.len())?;
        writeln!(output, "  First: {}", format_ticks(first.ticks))?;
        writeln!(output, "  Last: {}", format_ticks(last.ticks))?;
    }
    Ok(())
}

// ============================================================================
// STATISTICS ANALYSIS
// ============================================================================

#[derive(Debug)]
struct Stats {
    mean: f64,
    rms: f64,
    std_dev: f64,
    min: f64,
    max: f64,
    peak_to_peak: f64,
}

fn compute_stats(data: &[f64]) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }
    let n = data.len() as f64;

    let mean = data.iter().sum::<f64>() / n;
    let rms = (data.iter().map(|&x| x * x).sum::<f64>() / n).sqrt();
    let variance = data.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Some(Stats {
        mean,
        rms,
        std_dev,
        min,
        max,
        peak_to_peak: max - min,
    })
}

fn write_table_header(output: &mut dyn Write, title: &str) -> io::Result<()> {
    writeln!(output)?;
    writeln!(output, "{}", title)?;
    writeln!(output, "{:-<80}", "")?;
    writeln!(
        output,
        "{:<10} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "Axis", "Mean", "RMS", "Std Dev", "Min", "Max", "Peak-Peak"
    )?;
    writeln!(output, "{:-<80}", "")
}

fn write_stats_row(output: &mut dyn Write, axis: &str, data: &[f64]) -> io::Result<()> {
    match compute_stats(data) {
        Some(stats) => writeln!(
            output,
            "{:<10} {:>12.4} {:>12.4} {:>12.4} {:>12.4} {:>12.4} {:>12.4}",
            axis, stats.mean, stats.rms, stats.std_dev, stats.min, stats.max, stats.peak_to_peak
        ),
        None => writeln!(output, "{:<10} no data", axis),
    }
}

fn run_statistics_analysis(
    output: &mut dyn Write,
    accel: &[AccelRecord],
    gyro: &[GyroRecord],
    scale: f64,
) -> io::Result<()> {
    if !accel.is_empty() {
        let x: Vec<f64> = accel.iter().map(|r| r.x as f64 * scale).collect();
        let y: Vec<f64> = accel.iter().map(|r| r.y as f64 * scale).collect();
        let z: Vec<f64> = accel.iter().map(|r| r.z as f64 * scale).collect();
        let thermal: Vec<f64> = accel.iter().map(|r| r.thermal).collect();

        write_table_header(output, "Accelerometer Statistics (g):")?;
        write_stats_row(output, "X", &x)?;
        write_stats_row(output, "Y", &y)?;
        write_stats_row(output, "Z", &z)?;
        write_stats_row(output, "Thermal", &thermal)?;
    }

    if !gyro.is_empty() {
        let x: Vec<f64> = gyro.iter().map(|r| r.frame.gyro_x as f64).collect();
        let y: Vec<f64> = gyro.iter().map(|r| r.frame.gyro_y as f64).collect();
        let z: Vec<f64> = gyro.iter().map(|r| r.frame.gyro_z as f64).collect();

        write_table_header(output, "Gyroscope Statistics (raw):")?;
        write_stats_row(output, "X", &x)?;
        write_stats_row(output, "Y", &y)?;
        write_stats_row(output, "Z", &z)?;

        let gaps = gyro
            .windows(2)
            .filter(|pair| pair[1].frame.sample_counter != pair[0].frame.sample_counter.wrapping_add(1))
            .count();
        writeln!(output)?;
        writeln!(output, "Sample counter gaps: {}", gaps)?;
    }

    Ok(())
}

// ============================================================================
// SPECTRUM ANALYSIS
// ============================================================================

fn run_spectrum_analysis(
    output: &mut dyn Write,
    accel: &[AccelRecord],
    scale: f64,
    top: usize,
) -> io::Result<()> {
    if accel.is_empty() {
        writeln!(output, "No accelerometer records")?;
        return Ok(());
    }

    let mut analyzer = SpectralAnalyzer::new(top.max(1));
    for second in accel.chunk_by(|a, b| whole_second(a.ticks) == whole_second(b.ticks)) {
        let padded = SpectralAnalyzer::padded_len(second.len());
        // Bin width in Hz when the second holds `len` evenly spaced samples
        let bin_hz = second.len() as f64 / padded as f64;

        writeln!(output)?;
        writeln!(
            output,
            "{} - {} samples, padded to {} ({:.3} Hz per bin)",
            format_ticks(second[0].ticks),
            second.len(),
            padded,
            bin_hz
        )?;

        let axes: [(&str, Vec<f64>); 3] = [
            ("X", second.iter().map(|r| r.x as f64 * scale).collect()),
            ("Y", second.iter().map(|r| r.y as f64 * scale).collect()),
            ("Z", second.iter().map(|r| r.z as f64 * scale).collect()),
        ];
        for (label, samples) in &axes {
            let peaks = analyzer.analyze(samples);
            let listed: Vec<String> = peaks
                .iter()
                .map(|p| format!("{:.1} Hz ({:.4})", p.bin as f64 * bin_hz, p.magnitude))
                .collect();
            writeln!(output, "  {}: {}", label, listed.join(", "))?;
        }
    }

    Ok(())
}
