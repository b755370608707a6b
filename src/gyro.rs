//! Gyroscope producer: one record per data-ready edge, appended to a single file

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::devices::{DataReadyLine, GyroscopeSource};
use crate::error::Result;
use crate::record::{GyroFrame, GyroRecord, GYRO_FRAME_LEN};
use crate::sampler::ClockThermalSampler;

/// Log every Nth failure after the first
const FAILURE_LOG_INTERVAL: u64 = 100;

/// Counters shared between the interrupt context and the owner
#[derive(Debug, Default)]
pub struct GyroCounters {
    records: AtomicU64,
    read_failures: AtomicU64,
    write_failures: AtomicU64,
}

impl GyroCounters {
    pub fn snapshot(&self) -> GyroStats {
        GyroStats {
            records: self.records.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GyroStats {
    pub records: u64,
    pub read_failures: u64,
    pub write_failures: u64,
}

fn should_log(count: u64) -> bool {
    count == 1 || count % FAILURE_LOG_INTERVAL == 0
}

/// Reads a burst frame per edge and appends it, flushed, to the gyroscope file
pub struct GyroProducer<G> {
    source: G,
    sampler: Arc<ClockThermalSampler>,
    writer: BufWriter<File>,
    path: PathBuf,
    frame: [u8; GYRO_FRAME_LEN],
    counters: Arc<GyroCounters>,
}

impl<G: GyroscopeSource + 'static> GyroProducer<G> {
    /// Open (or create) the gyroscope file in append mode
    pub fn create<P: AsRef<Path>>(
        source: G,
        sampler: Arc<ClockThermalSampler>,
        path: P,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            source,
            sampler,
            writer: BufWriter::new(file),
            path,
            frame: [0u8; GYRO_FRAME_LEN],
            counters: Arc::new(GyroCounters::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn counters(&self) -> Arc<GyroCounters> {
        self.counters.clone()
    }

    /// Handle one data-ready edge; failures are logged, never propagated
    pub fn on_data_ready(&mut self) {
        if let Err(e) = self.source.burst_read(&mut self.frame) {
            let failures = self.counters.read_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if should_log(failures) {
                warn!(error = %e, failures, "Gyroscope burst read failed");
            }
            return;
        }

        let clock = self.sampler.sample_clock();
        let thermal = self.sampler.sample_thermal();

        let frame = match GyroFrame::decode(&self.frame) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Gyroscope burst frame rejected");
                return;
            }
        };
        let record = GyroRecord {
            frame,
            ticks: clock.ticks,
            thermal: thermal.fahrenheit,
        };

        let written = self
            .writer
            .write_all(&record.encode())
            .and_then(|()| self.writer.flush());
        match written {
            Ok(()) => {
                self.counters.records.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let failures = self.counters.write_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if should_log(failures) {
                    warn!(file = %self.path.display(), error = %e, failures, "Gyroscope record write failed");
                }
            }
        }
    }

    /// Register the producer on `line`; it runs in the line's callback context
    pub fn attach<L: DataReadyLine>(mut self, mut line: L) -> Result<GyroAttachment<L>> {
        let counters = self.counters();
        info!(file = %self.path.display(), "Gyroscope acquisition started");
        line.subscribe(Box::new(move || self.on_data_ready()))?;
        Ok(GyroAttachment {
            line,
            counters,
            detached: false,
        })
    }
}

/// A gyroscope producer registered on a data-ready line
///
/// Dropping it unregisters the handler, which closes the gyroscope file.
pub struct GyroAttachment<L: DataReadyLine> {
    line: L,
    counters: Arc<GyroCounters>,
    detached: bool,
}

impl<L: DataReadyLine> GyroAttachment<L> {
    pub fn stats(&self) -> GyroStats {
        self.counters.snapshot()
    }

    pub fn detach(mut self) -> Result<GyroStats> {
        self.detached = true;
        self.line.unsubscribe()?;
        let stats = self.counters.snapshot();
        info!(
            records = stats.records,
            read_failures = stats.read_failures,
            write_failures = stats.write_failures,
            "Gyroscope acquisition stopped"
        );
        Ok(stats)
    }
}

impl<L: DataReadyLine> Drop for GyroAttachment<L> {
    fn drop(&mut self) {
        if !self.detached {
            let _ = self.line.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::sim::{ConstantThermal, CountingGyroscope};
    use crate::devices::{ClockSource, EdgeHandler};
    use crate::error::{Device, TelemetryError};
    use crate::record::RecordReader;

    struct FixedClock(i64);

    impl ClockSource for FixedClock {
        fn current_ticks(&mut self) -> Result<i64> {
            Ok(self.0)
        }
    }

    struct DeadGyro;

    impl GyroscopeSource for DeadGyro {
        fn burst_read(&mut self, _buffer: &mut [u8; GYRO_FRAME_LEN]) -> Result<()> {
            Err(TelemetryError::device(Device::Gyroscope, "no response"))
        }
    }

    /// Line fired by hand from the test
    #[derive(Default)]
    struct ManualLine {
        handler: Option<EdgeHandler>,
    }

    impl ManualLine {
        fn fire(&mut self) {
            if let Some(handler) = &mut self.handler {
                handler();
            }
        }
    }

    impl DataReadyLine for ManualLine {
        fn subscribe(&mut self, handler: EdgeHandler) -> Result<()> {
            self.handler = Some(handler);
            Ok(())
        }

        fn unsubscribe(&mut self) -> Result<()> {
            self.handler = None;
            Ok(())
        }
    }

    fn sampler() -> Arc<ClockThermalSampler> {
        Arc::new(ClockThermalSampler::new(FixedClock(42), ConstantThermal(90.5)))
    }

    #[test]
    fn test_each_edge_appends_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gyro.bin");
        let mut producer = GyroProducer::create(CountingGyroscope::new(), sampler(), &path).unwrap();

        producer.on_data_ready();
        producer.on_data_ready();
        producer.on_data_ready();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * 36);
        let records: Vec<GyroRecord> = RecordReader::new(File::open(&path).unwrap())
            .collect::<Result<_>>()
            .unwrap();
        let counters: Vec<i16> = records.iter().map(|r| r.frame.sample_counter).collect();
        assert_eq!(counters, vec![1, 2, 3]);
        assert!(records.iter().all(|r| r.ticks == 42 && r.thermal == 90.5));
    }

    #[test]
    fn test_existing_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gyro.bin");
        std::fs::write(&path, [0u8; 36]).unwrap();

        let mut producer = GyroProducer::create(CountingGyroscope::new(), sampler(), &path).unwrap();
        producer.on_data_ready();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 72);
    }

    #[test]
    fn test_read_failure_is_counted_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gyro.bin");
        let mut producer = GyroProducer::create(DeadGyro, sampler(), &path).unwrap();

        producer.on_data_ready();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        assert_eq!(producer.counters().snapshot().read_failures, 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_failures_are_counted_and_handler_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gyro.bin");
        std::os::unix::fs::symlink("/dev/full", &path).unwrap();
        let mut producer = GyroProducer::create(CountingGyroscope::new(), sampler(), &path).unwrap();

        producer.on_data_ready();
        producer.on_data_ready();

        let stats = producer.counters().snapshot();
        assert_eq!(stats.records, 0);
        assert_eq!(stats.read_failures, 0);
        assert_eq!(stats.write_failures, 2);
    }

    #[test]
    fn test_attach_and_detach() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gyro.bin");
        let producer = GyroProducer::create(CountingGyroscope::new(), sampler(), &path).unwrap();

        let mut attachment = producer.attach(ManualLine::default()).unwrap();
        attachment.line.fire();
        attachment.line.fire();
        assert_eq!(attachment.stats().records, 2);

        let stats = attachment.detach().unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 72);
    }
}
