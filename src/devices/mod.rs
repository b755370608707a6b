//! Collaborator interfaces for sensors, clock, thermal source and the
//! data-ready line
//!
//! Register-level drivers live outside this crate; anything implementing
//! these traits can be injected into the producers.

use crate::error::Result;
use crate::record::{ACCEL_SEGMENT_LEN, GYRO_FRAME_LEN};

#[cfg(feature = "rpi")]
pub mod gpio;
pub mod host;
pub mod sim;

/// Continuously polled 3-axis accelerometer
pub trait AccelerometerSource: Send {
    /// Fill `buffer` with X, Y, Z as little-endian raw 32-bit counts
    fn read(&mut self, buffer: &mut [u8; ACCEL_SEGMENT_LEN]) -> Result<()>;
}

/// Gyroscope/IMU read in one burst transaction
pub trait GyroscopeSource: Send {
    /// Fill `buffer` with the 10 × 16-bit little-endian burst frame
    fn burst_read(&mut self, buffer: &mut [u8; GYRO_FRAME_LEN]) -> Result<()>;
}

/// Real-time clock
pub trait ClockSource: Send {
    /// Current time in 100 ns ticks
    fn current_ticks(&mut self) -> Result<i64>;
}

/// CPU thermal sensor
pub trait ThermalSource: Send {
    fn is_available(&mut self) -> bool;

    fn reading_fahrenheit(&mut self) -> Result<f64>;
}

/// Callback invoked on every rising edge of a data-ready line
pub type EdgeHandler = Box<dyn FnMut() + Send + 'static>;

/// Digital input that signals new sensor data on a rising edge
pub trait DataReadyLine: Send {
    /// Register `handler`, replacing any previous one
    fn subscribe(&mut self, handler: EdgeHandler) -> Result<()>;

    /// Stop invoking the handler; returns once no invocation is in flight
    fn unsubscribe(&mut self) -> Result<()>;
}

impl<T: AccelerometerSource + ?Sized> AccelerometerSource for Box<T> {
    fn read(&mut self, buffer: &mut [u8; ACCEL_SEGMENT_LEN]) -> Result<()> {
        (**self).read(buffer)
    }
}

impl<T: GyroscopeSource + ?Sized> GyroscopeSource for Box<T> {
    fn burst_read(&mut self, buffer: &mut [u8; GYRO_FRAME_LEN]) -> Result<()> {
        (**self).burst_read(buffer)
    }
}

impl<T: ClockSource + ?Sized> ClockSource for Box<T> {
    fn current_ticks(&mut self) -> Result<i64> {
        (**self).current_ticks()
    }
}

impl<T: ThermalSource + ?Sized> ThermalSource for Box<T> {
    fn is_available(&mut self) -> bool {
        (**self).is_available()
    }

    fn reading_fahrenheit(&mut self) -> Result<f64> {
        (**self).reading_fahrenheit()
    }
}

impl<T: DataReadyLine + ?Sized> DataReadyLine for Box<T> {
    fn subscribe(&mut self, handler: EdgeHandler) -> Result<()> {
        (**self).subscribe(handler)
    }

    fn unsubscribe(&mut self) -> Result<()> {
        (**self).unsubscribe()
    }
}
