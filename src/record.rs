//! Fixed-width binary record layouts
//!
//! All layouts are little-endian with no padding. Files carry no header, so
//! readers must know the record width out of band:
//!
//! | Record        | Layout                                              | Bytes |
//! |---------------|-----------------------------------------------------|-------|
//! | Accelerometer | 3 × i32 (x, y, z) + i64 ticks + f64 thermal         | 28    |
//! | Gyroscope     | 10 × i16 burst frame + i64 ticks + f64 thermal      | 36    |
//! | Clock         | i64 ticks                                           | 8     |
//! | Thermal       | f64 degrees Fahrenheit                              | 8     |

use std::io::{self, Read};

use crate::error::{Result, TelemetryError};

/// Raw accelerometer segment width (3 × i32)
pub const ACCEL_SEGMENT_LEN: usize = 12;
/// Gyroscope burst frame width (10 × i16)
pub const GYRO_FRAME_LEN: usize = 20;
/// Clock segment width
pub const CLOCK_LEN: usize = 8;
/// Thermal segment width
pub const THERMAL_LEN: usize = 8;

/// Full accelerometer record width
pub const ACCEL_RECORD_LEN: usize = ACCEL_SEGMENT_LEN + CLOCK_LEN + THERMAL_LEN;
/// Full gyroscope record width
pub const GYRO_RECORD_LEN: usize = GYRO_FRAME_LEN + CLOCK_LEN + THERMAL_LEN;

fn check_len(buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() < expected {
        return Err(TelemetryError::CorruptRecord {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn le_i16(buf: &[u8], at: usize) -> i16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&buf[at..at + 2]);
    i16::from_le_bytes(bytes)
}

fn le_i32(buf: &[u8], at: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    i32::from_le_bytes(bytes)
}

fn le_i64(buf: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(bytes)
}

fn le_f64(buf: &[u8], at: usize) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    f64::from_le_bytes(bytes)
}

/// Encode a clock sample
pub fn encode_clock(ticks: i64) -> [u8; CLOCK_LEN] {
    ticks.to_le_bytes()
}

/// Decode a clock sample from the start of `buf`
pub fn decode_clock(buf: &[u8]) -> Result<i64> {
    check_len(buf, CLOCK_LEN)?;
    Ok(le_i64(buf, 0))
}

/// Encode a thermal sample
pub fn encode_thermal(fahrenheit: f64) -> [u8; THERMAL_LEN] {
    fahrenheit.to_le_bytes()
}

/// Decode a thermal sample from the start of `buf`
pub fn decode_thermal(buf: &[u8]) -> Result<f64> {
    check_len(buf, THERMAL_LEN)?;
    Ok(le_f64(buf, 0))
}

/// Implemented by every fixed-width record so generic readers can stream them
pub trait FixedRecord: Sized {
    const LEN: usize;

    fn decode(buf: &[u8]) -> Result<Self>;

    fn encode_into(&self, buf: &mut [u8]) -> Result<()>;
}

/// One accelerometer sample with its (possibly stale) clock and thermal fields
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelRecord {
    /// Raw ADC counts
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Clock ticks (100 ns units)
    pub ticks: i64,
    /// CPU temperature in degrees Fahrenheit
    pub thermal: f64,
}

impl AccelRecord {
    pub const LEN: usize = ACCEL_RECORD_LEN;

    pub fn encode(&self) -> [u8; ACCEL_RECORD_LEN] {
        let mut buf = [0u8; ACCEL_RECORD_LEN];
        buf[0..4].copy_from_slice(&self.x.to_le_bytes());
        buf[4..8].copy_from_slice(&self.y.to_le_bytes());
        buf[8..12].copy_from_slice(&self.z.to_le_bytes());
        buf[12..20].copy_from_slice(&encode_clock(self.ticks));
        buf[20..28].copy_from_slice(&encode_thermal(self.thermal));
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, ACCEL_RECORD_LEN)?;
        Ok(Self {
            x: le_i32(buf, 0),
            y: le_i32(buf, 4),
            z: le_i32(buf, 8),
            ticks: le_i64(buf, 12),
            thermal: le_f64(buf, 20),
        })
    }
}

impl FixedRecord for AccelRecord {
    const LEN: usize = ACCEL_RECORD_LEN;

    fn decode(buf: &[u8]) -> Result<Self> {
        AccelRecord::decode(buf)
    }

    fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        check_len(buf, ACCEL_RECORD_LEN)?;
        buf[..ACCEL_RECORD_LEN].copy_from_slice(&self.encode());
        Ok(())
    }
}

/// One gyroscope burst frame as delivered by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GyroFrame {
    pub diag_flag: i16,
    pub gyro_x: i16,
    pub gyro_y: i16,
    pub gyro_z: i16,
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
    pub temperature: i16,
    pub sample_counter: i16,
    pub checksum: i16,
}

impl GyroFrame {
    fn words(&self) -> [i16; 10] {
        [
            self.diag_flag,
            self.gyro_x,
            self.gyro_y,
            self.gyro_z,
            self.accel_x,
            self.accel_y,
            self.accel_z,
            self.temperature,
            self.sample_counter,
            self.checksum,
        ]
    }

    pub fn encode(&self) -> [u8; GYRO_FRAME_LEN] {
        let mut buf = [0u8; GYRO_FRAME_LEN];
        for (i, word) in self.words().iter().enumerate() {
            buf[i * 2..i * 2 + 2].copy_from_slice(&word.to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, GYRO_FRAME_LEN)?;
        Ok(Self {
            diag_flag: le_i16(buf, 0),
            gyro_x: le_i16(buf, 2),
            gyro_y: le_i16(buf, 4),
            gyro_z: le_i16(buf, 6),
            accel_x: le_i16(buf, 8),
            accel_y: le_i16(buf, 10),
            accel_z: le_i16(buf, 12),
            temperature: le_i16(buf, 14),
            sample_counter: le_i16(buf, 16),
            checksum: le_i16(buf, 18),
        })
    }
}

/// One gyroscope burst frame plus the clock and thermal sampled with it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroRecord {
    pub frame: GyroFrame,
    pub ticks: i64,
    pub thermal: f64,
}

impl GyroRecord {
    pub const LEN: usize = GYRO_RECORD_LEN;

    pub fn encode(&self) -> [u8; GYRO_RECORD_LEN] {
        let mut buf = [0u8; GYRO_RECORD_LEN];
        buf[0..20].copy_from_slice(&self.frame.encode());
        buf[20..28].copy_from_slice(&encode_clock(self.ticks));
        buf[28..36].copy_from_slice(&encode_thermal(self.thermal));
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, GYRO_RECORD_LEN)?;
        Ok(Self {
            frame: GyroFrame::decode(&buf[0..GYRO_FRAME_LEN])?,
            ticks: le_i64(buf, 20),
            thermal: le_f64(buf, 28),
        })
    }
}

impl FixedRecord for GyroRecord {
    const LEN: usize = GYRO_RECORD_LEN;

    fn decode(buf: &[u8]) -> Result<Self> {
        GyroRecord::decode(buf)
    }

    fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        check_len(buf, GYRO_RECORD_LEN)?;
        buf[..GYRO_RECORD_LEN].copy_from_slice(&self.encode());
        Ok(())
    }
}

/// Contiguous accelerometer record buffer with three segments
///
/// The accelerometer segment is rewritten every sample while the clock and
/// thermal segments keep their last sampled value until refreshed, so one
/// `as_bytes()` call always yields a complete record.
#[derive(Debug, Clone)]
pub struct RecordFrame {
    buf: [u8; ACCEL_RECORD_LEN],
}

impl RecordFrame {
    const CLOCK_AT: usize = ACCEL_SEGMENT_LEN;
    const THERMAL_AT: usize = ACCEL_SEGMENT_LEN + CLOCK_LEN;

    pub fn new() -> Self {
        Self {
            buf: [0u8; ACCEL_RECORD_LEN],
        }
    }

    /// Accelerometer segment, sized for a direct sensor read
    pub fn accel_segment_mut(&mut self) -> &mut [u8; ACCEL_SEGMENT_LEN] {
        // A rest pattern on an array binds a fixed-size array
        let [accel @ .., _, _, _, _, _, _, _, _, _, _, _, _, _, _, _, _] = &mut self.buf;
        accel
    }

    pub fn clear_accel(&mut self) {
        self.buf[..ACCEL_SEGMENT_LEN].fill(0);
    }

    pub fn set_clock(&mut self, ticks: i64) {
        self.buf[Self::CLOCK_AT..Self::THERMAL_AT].copy_from_slice(&encode_clock(ticks));
    }

    pub fn set_thermal(&mut self, fahrenheit: f64) {
        self.buf[Self::THERMAL_AT..].copy_from_slice(&encode_thermal(fahrenheit));
    }

    pub fn as_bytes(&self) -> &[u8; ACCEL_RECORD_LEN] {
        &self.buf
    }

    pub fn record(&self) -> AccelRecord {
        AccelRecord {
            x: le_i32(&self.buf, 0),
            y: le_i32(&self.buf, 4),
            z: le_i32(&self.buf, 8),
            ticks: le_i64(&self.buf, Self::CLOCK_AT),
            thermal: le_f64(&self.buf, Self::THERMAL_AT),
        }
    }
}

impl Default for RecordFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Streams whole fixed-width records out of a reader
///
/// A short read is retried until the record is complete. Hitting end of file
/// in the middle of a record yields `CorruptRecord` and ends the stream.
pub struct RecordReader<R, T> {
    inner: R,
    buf: Vec<u8>,
    done: bool,
    _record: std::marker::PhantomData<T>,
}

impl<R: Read, T: FixedRecord> RecordReader<R, T> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0u8; T::LEN],
            done: false,
            _record: std::marker::PhantomData,
        }
    }

    /// Read the next whole record, `Ok(None)` at a clean end of file
    pub fn next_record(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }

        let mut filled = 0;
        while filled < T::LEN {
            match self.inner.read(&mut self.buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Err(e.into());
                }
            }
        }

        if filled == 0 {
            self.done = true;
            return Ok(None);
        }
        if filled < T::LEN {
            self.done = true;
            return Err(TelemetryError::CorruptRecord {
                expected: T::LEN,
                actual: filled,
            });
        }

        T::decode(&self.buf).map(Some)
    }
}

impl<R: Read, T: FixedRecord> Iterator for RecordReader<R, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
