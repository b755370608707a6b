//! Single-reading interface and its per-device result status

use crate::devices::{AccelerometerSource, GyroscopeSource};
use crate::error::Device;
use crate::record::{GyroFrame, ACCEL_SEGMENT_LEN, GYRO_FRAME_LEN};
use crate::sampler::ClockThermalSampler;

/// Success of each data source for one reading cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResultStatus {
    pub accelerometer: bool,
    pub gyroscope: bool,
    pub clock: bool,
    pub thermal: bool,
}

impl ResultStatus {
    pub fn set(&mut self, device: Device, ok: bool) {
        match device {
            Device::Accelerometer => self.accelerometer = ok,
            Device::Gyroscope => self.gyroscope = ok,
            Device::Clock => self.clock = ok,
            Device::Thermal => self.thermal = ok,
        }
    }

    pub fn get(&self, device: Device) -> bool {
        match device {
            Device::Accelerometer => self.accelerometer,
            Device::Gyroscope => self.gyroscope,
            Device::Clock => self.clock,
            Device::Thermal => self.thermal,
        }
    }

    pub fn all_ok(&self) -> bool {
        self.accelerometer && self.gyroscope && self.clock && self.thermal
    }

    pub fn failed_devices(&self) -> Vec<Device> {
        [
            Device::Accelerometer,
            Device::Gyroscope,
            Device::Clock,
            Device::Thermal,
        ]
        .into_iter()
        .filter(|&device| !self.get(device))
        .collect()
    }
}

/// One reading from every source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Raw accelerometer counts, zero if the read failed
    pub accel: [i32; 3],
    /// Gyroscope frame, default if the read failed
    pub gyro: GyroFrame,
    pub ticks: i64,
    pub thermal: f64,
    pub status: ResultStatus,
}

/// Take a single reading outside the pipeline, recording which sources failed
pub fn read_once<A, G>(accel: &mut A, gyro: &mut G, sampler: &ClockThermalSampler) -> Reading
where
    A: AccelerometerSource + ?Sized,
    G: GyroscopeSource + ?Sized,
{
    let mut status = ResultStatus::default();

    let mut accel_buf = [0u8; ACCEL_SEGMENT_LEN];
    let accel_values = match accel.read(&mut accel_buf) {
        Ok(()) => {
            status.accelerometer = true;
            let mut values = [0i32; 3];
            for (axis, value) in values.iter_mut().enumerate() {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&accel_buf[axis * 4..axis * 4 + 4]);
                *value = i32::from_le_bytes(bytes);
            }
            values
        }
        Err(_) => [0; 3],
    };

    let mut gyro_buf = [0u8; GYRO_FRAME_LEN];
    let frame = match gyro.burst_read(&mut gyro_buf) {
        Ok(()) => match GyroFrame::decode(&gyro_buf) {
            Ok(frame) => {
                status.gyroscope = true;
                frame
            }
            Err(_) => GyroFrame::default(),
        },
        Err(_) => GyroFrame::default(),
    };

    let clock = sampler.sample_clock();
    status.clock = clock.ok;
    let thermal = sampler.sample_thermal();
    status.thermal = thermal.ok;

    Reading {
        accel: accel_values,
        gyro: frame,
        ticks: clock.ticks,
        thermal: thermal.fahrenheit,
        status,
    }
}
