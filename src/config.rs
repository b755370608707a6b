//! Run configuration loaded from TOML and overridden on the command line

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::accel::ChunkLayout;
use crate::error::{Result, TelemetryError};
use crate::spectrum::DEFAULT_TOP_BINS;
use crate::telemetry::{ConsumedFilePolicy, ConsumerConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Stop after this many seconds; runs until Ctrl+C if unset
    pub duration_secs: Option<u64>,
    /// Expected accelerometer samples per second; also the clock refresh cadence
    pub samples_per_second: u32,
    /// Records per in-memory chunk
    pub chunk_size: usize,
    /// Chunks per rotated file
    pub iterations_per_file: usize,
    pub output_dir: PathBuf,
    /// Chunk files are named `<accel_base_name><index>`
    pub accel_base_name: String,
    pub gyro_file_name: String,
    pub serial: SerialConfig,
    pub telemetry: TelemetryConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// No port means messages are only logged
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub top_bins: usize,
    /// Multiplier from raw accelerometer counts to g
    pub accel_scale: f64,
    pub idle_poll_ms: u64,
    pub consumed_files: ConsumedFilePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Tone per accelerometer axis
    pub tones_hz: [f64; 3],
    /// Peak amplitude in raw counts
    pub amplitude: f64,
    pub gyro_rate_hz: u32,
    /// BCM pin of the gyroscope data-ready line; the timer line is used when unset
    pub data_ready_pin: Option<u8>,
    /// Thermal zone file; a constant reading is used when it is missing
    pub thermal_zone: PathBuf,
    pub fallback_fahrenheit: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_secs: None,
            samples_per_second: 4000,
            chunk_size: 4000,
            iterations_per_file: 60,
            output_dir: PathBuf::from("data"),
            accel_base_name: "accel_".to_owned(),
            gyro_file_name: "gyro.bin".to_owned(),
            serial: SerialConfig::default(),
            telemetry: TelemetryConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            timeout_ms: 500,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            top_bins: DEFAULT_TOP_BINS,
            // 20-bit accelerometer, ±2 g range
            accel_scale: 1.0 / 256_000.0,
            idle_poll_ms: 100,
            consumed_files: ConsumedFilePolicy::Keep,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tones_hz: [60.0, 120.0, 250.0],
            amplitude: 25_600.0,
            gyro_rate_hz: 200,
            data_ready_pin: None,
            thermal_zone: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            fallback_fahrenheit: 98.6,
        }
    }
}

impl RunConfig {
    /// Load from a TOML file; missing keys take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.samples_per_second == 0 {
            return Err(TelemetryError::InvalidParameter(
                "samples_per_second must be non-zero".to_owned(),
            ));
        }
        if self.chunk_size == 0 || self.iterations_per_file == 0 {
            return Err(TelemetryError::InvalidParameter(format!(
                "chunk_size and iterations_per_file must be non-zero, got {} and {}",
                self.chunk_size, self.iterations_per_file
            )));
        }
        if self.telemetry.top_bins == 0 {
            return Err(TelemetryError::InvalidParameter(
                "telemetry.top_bins must be non-zero".to_owned(),
            ));
        }
        if self.accel_base_name.is_empty() || self.gyro_file_name.is_empty() {
            return Err(TelemetryError::InvalidParameter(
                "file names must not be empty".to_owned(),
            ));
        }
        if self.simulation.gyro_rate_hz == 0 {
            return Err(TelemetryError::InvalidParameter(
                "simulation.gyro_rate_hz must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn chunk_layout(&self) -> ChunkLayout {
        ChunkLayout {
            base: self.output_dir.join(&self.accel_base_name),
            chunk_size: self.chunk_size,
            iterations: self.iterations_per_file,
            refresh_every: self.samples_per_second as usize,
        }
    }

    pub fn gyro_path(&self) -> PathBuf {
        self.output_dir.join(&self.gyro_file_name)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            top_bins: self.telemetry.top_bins,
            accel_scale: self.telemetry.accel_scale,
            idle_poll: Duration::from_millis(self.telemetry.idle_poll_ms),
            consumed_files: self.telemetry.consumed_files.clone(),
        }
    }

    pub fn run_duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }
}
