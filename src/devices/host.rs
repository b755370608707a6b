//! Devices backed by the host operating system

use std::fs;
use std::path::{Path, PathBuf};

use super::{ClockSource, ThermalSource};
use crate::error::{Device, Result, TelemetryError};
use crate::sampler::host_ticks;

/// Local wall clock of the host
#[derive(Debug, Default, Clone, Copy)]
pub struct HostClock;

impl ClockSource for HostClock {
    fn current_ticks(&mut self) -> Result<i64> {
        Ok(host_ticks())
    }
}

/// Linux thermal zone exposed through sysfs (millidegrees Celsius)
#[derive(Debug, Clone)]
pub struct SysfsThermal {
    path: PathBuf,
}

impl SysfsThermal {
    pub const DEFAULT_ZONE: &'static str = "/sys/class/thermal/thermal_zone0/temp";

    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Default for SysfsThermal {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ZONE)
    }
}

/// Convert a sysfs millidegree Celsius reading to degrees Fahrenheit
pub fn millicelsius_to_fahrenheit(millidegrees: i64) -> f64 {
    let celsius = millidegrees as f64 / 1000.0;
    celsius * 9.0 / 5.0 + 32.0
}

impl ThermalSource for SysfsThermal {
    fn is_available(&mut self) -> bool {
        self.path.exists()
    }

    fn reading_fahrenheit(&mut self) -> Result<f64> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| TelemetryError::device(Device::Thermal, e.to_string()))?;
        let millidegrees: i64 = raw.trim().parse().map_err(|e| {
            TelemetryError::device(Device::Thermal, format!("bad reading {:?}: {}", raw.trim(), e))
        })?;
        Ok(millicelsius_to_fahrenheit(millidegrees))
    }
}
