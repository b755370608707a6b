//! Shared clock and thermal sampling
//!
//! Both producers (and anything else that needs a timestamp) go through one
//! [`ClockThermalSampler`]. Each device has its own lock, held for a single
//! read, so a slow thermal read never stalls a clock read.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local, NaiveDateTime};
use tracing::warn;

use crate::devices::{ClockSource, ThermalSource};

/// Clock ticks per second (100 ns ticks)
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Host local wall clock expressed in ticks since the Unix epoch
pub fn host_ticks() -> i64 {
    let local = Local::now().naive_local();
    local.and_utc().timestamp_micros() * 10
}

/// Whole-second value of a tick count
pub fn whole_second(ticks: i64) -> i64 {
    ticks.div_euclid(TICKS_PER_SECOND)
}

/// Convert ticks back into a calendar time for display
pub fn ticks_to_datetime(ticks: i64) -> Option<NaiveDateTime> {
    let secs = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
}

/// Clock reading; `ok == false` means host time was substituted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    pub ticks: i64,
    pub ok: bool,
}

/// Thermal reading; `ok == false` means the last good value was repeated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalSample {
    pub fahrenheit: f64,
    pub ok: bool,
}

struct ThermalState {
    source: Box<dyn ThermalSource>,
    last: f64,
}

/// Serializes access to the one clock and one thermal source
pub struct ClockThermalSampler {
    clock: Mutex<Box<dyn ClockSource>>,
    thermal: Mutex<ThermalState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ClockThermalSampler {
    pub fn new(clock: impl ClockSource + 'static, thermal: impl ThermalSource + 'static) -> Self {
        Self {
            clock: Mutex::new(Box::new(clock)),
            thermal: Mutex::new(ThermalState {
                source: Box::new(thermal),
                last: 0.0,
            }),
        }
    }

    /// Read the clock, falling back to host time on failure
    pub fn sample_clock(&self) -> ClockSample {
        let result = lock(&self.clock).current_ticks();
        match result {
            Ok(ticks) => ClockSample { ticks, ok: true },
            Err(e) => {
                warn!(error = %e, "Clock read failed, using host time");
                ClockSample {
                    ticks: host_ticks(),
                    ok: false,
                }
            }
        }
    }

    /// Read the thermal source, repeating the last good value on failure
    pub fn sample_thermal(&self) -> ThermalSample {
        let mut state = lock(&self.thermal);
        if !state.source.is_available() {
            return ThermalSample {
                fahrenheit: state.last,
                ok: false,
            };
        }

        match state.source.reading_fahrenheit() {
            Ok(fahrenheit) => {
                state.last = fahrenheit;
                ThermalSample {
                    fahrenheit,
                    ok: true,
                }
            }
            Err(e) => {
                let last = state.last;
                drop(state);
                warn!(error = %e, "Thermal read failed, repeating last reading");
                ThermalSample {
                    fahrenheit: last,
                    ok: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Device, Result, TelemetryError};
    use std::sync::Arc;
    use std::thread;

    struct FailingClock;

    impl ClockSource for FailingClock {
        fn current_ticks(&mut self) -> Result<i64> {
            Err(TelemetryError::device(Device::Clock, "bus timeout"))
        }
    }

    struct CountingClock(i64);

    impl ClockSource for CountingClock {
        fn current_ticks(&mut self) -> Result<i64> {
            self.0 += 1;
            Ok(self.0)
        }
    }

    /// Yields its readings in order, then fails
    struct ScriptedThermal {
        available: bool,
        readings: Vec<f64>,
    }

    impl ThermalSource for ScriptedThermal {
        fn is_available(&mut self) -> bool {
            self.available
        }

        fn reading_fahrenheit(&mut self) -> Result<f64> {
            if self.readings.is_empty() {
                Err(TelemetryError::device(Device::Thermal, "gone"))
            } else {
                Ok(self.readings.remove(0))
            }
        }
    }

    #[test]
    fn test_whole_second() {
        assert_eq!(whole_second(0), 0);
        assert_eq!(whole_second(TICKS_PER_SECOND - 1), 0);
        assert_eq!(whole_second(3 * TICKS_PER_SECOND), 3);
        assert_eq!(whole_second(-1), -1);
    }

    #[test]
    fn test_ticks_to_datetime() {
        let dt = ticks_to_datetime(86_400 * TICKS_PER_SECOND + 5).unwrap();
        assert_eq!(dt.to_string(), "1970-01-02 00:00:00.000000500");
    }

    #[test]
    fn test_clock_failure_substitutes_host_time() {
        let sampler = ClockThermalSampler::new(FailingClock, ScriptedThermal {
            available: true,
            readings: vec![],
        });
        let before = host_ticks();
        let sample = sampler.sample_clock();
        assert!(!sample.ok);
        assert!(sample.ticks >= before);
    }

    #[test]
    fn test_thermal_failure_repeats_last_reading() {
        let sampler = ClockThermalSampler::new(CountingClock(0), ScriptedThermal {
            available: true,
            readings: vec![98.6],
        });
        assert_eq!(sampler.sample_thermal(), ThermalSample { fahrenheit: 98.6, ok: true });
        assert_eq!(sampler.sample_thermal(), ThermalSample { fahrenheit: 98.6, ok: false });
    }

    #[test]
    fn test_unavailable_thermal_is_tagged_failed() {
        let sampler = ClockThermalSampler::new(CountingClock(0), ScriptedThermal {
            available: false,
            readings: vec![1.0],
        });
        assert_eq!(sampler.sample_thermal(), ThermalSample { fahrenheit: 0.0, ok: false });
    }

    #[test]
    fn test_concurrent_clock_reads_are_serialized() {
        let sampler = Arc::new(ClockThermalSampler::new(CountingClock(0), ScriptedThermal {
            available: false,
            readings: vec![],
        }));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sampler = sampler.clone();
                thread::spawn(move || (0..250).map(|_| sampler.sample_clock().ticks).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }
}
