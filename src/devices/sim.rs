//! Simulated devices for running the pipeline without sensor hardware

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{AccelerometerSource, DataReadyLine, EdgeHandler, GyroscopeSource, ThermalSource};
use crate::error::{Device, Result, TelemetryError};
use crate::record::{GyroFrame, ACCEL_SEGMENT_LEN, GYRO_FRAME_LEN};

/// Accelerometer producing one sine tone per axis
///
/// When paced, `read` blocks until the next sample is due, mimicking a
/// sensor running at its native output data rate.
#[derive(Debug, Clone)]
pub struct SineAccelerometer {
    sample_rate_hz: f64,
    tones_hz: [f64; 3],
    amplitude: f64,
    index: u64,
    pacing: Option<Pacing>,
}

#[derive(Debug, Clone)]
struct Pacing {
    interval: Duration,
    next_sample_time: Option<Instant>,
}

impl SineAccelerometer {
    pub fn new(sample_rate_hz: u32, tones_hz: [f64; 3], amplitude: f64) -> Self {
        Self {
            sample_rate_hz: sample_rate_hz.max(1) as f64,
            tones_hz,
            amplitude,
            index: 0,
            pacing: None,
        }
    }

    /// Block in `read` so samples arrive at the configured rate
    pub fn paced(mut self) -> Self {
        self.pacing = Some(Pacing {
            interval: Duration::from_secs_f64(1.0 / self.sample_rate_hz),
            next_sample_time: None,
        });
        self
    }

    pub fn sample(&self, index: u64) -> [i32; 3] {
        let t = index as f64 / self.sample_rate_hz;
        self.tones_hz
            .map(|tone| (self.amplitude * (2.0 * PI * tone * t).sin()).round() as i32)
    }
}

impl AccelerometerSource for SineAccelerometer {
    fn read(&mut self, buffer: &mut [u8; ACCEL_SEGMENT_LEN]) -> Result<()> {
        if let Some(pacing) = &mut self.pacing {
            let now = Instant::now();
            let due = *pacing.next_sample_time.get_or_insert(now);
            if due > now {
                thread::sleep(due - now);
            }
            // If we're running behind, don't sleep and continue immediately
            pacing.next_sample_time = Some(due + pacing.interval);
        }

        let [x, y, z] = self.sample(self.index);
        buffer[0..4].copy_from_slice(&x.to_le_bytes());
        buffer[4..8].copy_from_slice(&y.to_le_bytes());
        buffer[8..12].copy_from_slice(&z.to_le_bytes());
        self.index += 1;
        Ok(())
    }
}

/// Gyroscope returning a slowly rotating frame with a running sample counter
#[derive(Debug, Default, Clone)]
pub struct CountingGyroscope {
    counter: i16,
}

impl CountingGyroscope {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_frame(&mut self) -> GyroFrame {
        self.counter = self.counter.wrapping_add(1);
        let phase = self.counter as f64 / 100.0;
        let mut frame = GyroFrame {
            diag_flag: 0,
            gyro_x: (phase.sin() * 1000.0) as i16,
            gyro_y: (phase.cos() * 1000.0) as i16,
            gyro_z: 0,
            accel_x: 0,
            accel_y: 0,
            accel_z: 800,
            temperature: 2500,
            sample_counter: self.counter,
            checksum: 0,
        };
        frame.checksum = frame_checksum(&frame);
        frame
    }
}

/// Wrapping sum of every byte preceding the checksum word
pub fn frame_checksum(frame: &GyroFrame) -> i16 {
    let bytes = frame.encode();
    bytes[..GYRO_FRAME_LEN - 2]
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(b as u16)) as i16
}

impl GyroscopeSource for CountingGyroscope {
    fn burst_read(&mut self, buffer: &mut [u8; GYRO_FRAME_LEN]) -> Result<()> {
        buffer.copy_from_slice(&self.next_frame().encode());
        Ok(())
    }
}

/// Thermal source reporting a fixed temperature
#[derive(Debug, Clone, Copy)]
pub struct ConstantThermal(pub f64);

impl ThermalSource for ConstantThermal {
    fn is_available(&mut self) -> bool {
        true
    }

    fn reading_fahrenheit(&mut self) -> Result<f64> {
        Ok(self.0)
    }
}

/// Data-ready line driven by a timer thread instead of a GPIO edge
pub struct TimerLine {
    rate_hz: u32,
    worker: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl TimerLine {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            rate_hz: rate_hz.max(1),
            worker: None,
        }
    }
}

impl DataReadyLine for TimerLine {
    fn subscribe(&mut self, mut handler: EdgeHandler) -> Result<()> {
        self.unsubscribe()?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let interval = Duration::from_secs_f64(1.0 / self.rate_hz as f64);

        let thread = thread::Builder::new()
            .name("data-ready timer".to_owned())
            .spawn(move || {
                let mut next_edge = Instant::now();
                while !stop_clone.load(Ordering::Acquire) {
                    handler();

                    next_edge += interval;
                    let now = Instant::now();
                    if next_edge > now {
                        thread::sleep(next_edge - now);
                    }
                }
            })?;

        debug!(rate_hz = self.rate_hz, "Timer data-ready line armed");
        self.worker = Some((stop, thread));
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<()> {
        if let Some((stop, thread)) = self.worker.take() {
            stop.store(true, Ordering::Release);
            if thread.join().is_err() {
                warn!("Data-ready handler panicked");
                return Err(TelemetryError::device(
                    Device::Gyroscope,
                    "data-ready handler panicked",
                ));
            }
        }
        Ok(())
    }
}

impl Drop for TimerLine {
    fn drop(&mut self) {
        let _ = self.unsubscribe();
    }
}
