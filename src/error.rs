//! Error types for the acquisition and telemetry pipeline

use std::fmt;

use thiserror::Error;

/// Data source a failure (or success) is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Accelerometer,
    Gyroscope,
    Clock,
    Thermal,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Device::Accelerometer => "accelerometer",
            Device::Gyroscope => "gyroscope",
            Device::Clock => "clock",
            Device::Thermal => "thermal",
        };
        f.write_str(name)
    }
}

/// Error type for acquisition and telemetry operations
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A sensor or clock/thermal read failed
    #[error("{device} read failed: {message}")]
    DeviceRead { device: Device, message: String },

    /// Buffer shorter than the fixed record width
    #[error("Corrupt record: expected {expected} bytes, got {actual}")]
    CorruptRecord { expected: usize, actual: usize },

    /// Serial transmission failed
    #[error("Link send failed: {0}")]
    LinkSend(String),

    /// Serial port could not be opened
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl TelemetryError {
    pub fn device(device: Device, message: impl Into<String>) -> Self {
        TelemetryError::DeviceRead {
            device,
            message: message.into(),
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, TelemetryError>;
