//! Accelerometer producer: polls the sensor and writes rotating chunk files

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, span, warn, Level};

use crate::cancel::CancellationToken;
use crate::devices::AccelerometerSource;
use crate::error::{Result, TelemetryError};
use crate::record::{RecordFrame, ACCEL_RECORD_LEN};
use crate::rotation::RotationQueue;
use crate::sampler::ClockThermalSampler;

/// Log every Nth consecutive read failure after the first
const FAILURE_LOG_INTERVAL: u64 = 1000;

/// Back-off after a chunk file could not be written
const FILE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Shape of the rotating chunk files
#[derive(Debug, Clone)]
pub struct ChunkLayout {
    /// Path prefix; files are named `<base><index>`
    pub base: PathBuf,
    /// Records buffered in memory before each disk write
    pub chunk_size: usize,
    /// Chunks per file
    pub iterations: usize,
    /// Refresh clock and thermal every this many samples
    pub refresh_every: usize,
}

impl ChunkLayout {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.iterations == 0 || self.refresh_every == 0 {
            return Err(TelemetryError::InvalidParameter(format!(
                "chunk_size, iterations and refresh_every must be non-zero, got {}/{}/{}",
                self.chunk_size, self.iterations, self.refresh_every
            )));
        }
        Ok(())
    }

    pub fn records_per_file(&self) -> usize {
        self.chunk_size * self.iterations
    }

    pub fn file_path(&self, index: u64) -> PathBuf {
        let mut name = self.base.clone().into_os_string();
        name.push(index.to_string());
        PathBuf::from(name)
    }
}

/// Counters reported when the producer stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProducerStats {
    pub files: u64,
    pub records: u64,
    pub read_failures: u64,
    pub clock_failures: u64,
    pub thermal_failures: u64,
}

/// Polls an accelerometer and rotates its records through chunk files
pub struct AccelProducer<A> {
    source: A,
    sampler: Arc<ClockThermalSampler>,
    queue: Arc<RotationQueue>,
    layout: ChunkLayout,
    frame: RecordFrame,
    chunk: Vec<u8>,
    file_index: u64,
    since_refresh: usize,
    consecutive_failures: u64,
    stats: ProducerStats,
}

impl<A: AccelerometerSource> AccelProducer<A> {
    pub fn new(
        source: A,
        sampler: Arc<ClockThermalSampler>,
        queue: Arc<RotationQueue>,
        layout: ChunkLayout,
    ) -> Result<Self> {
        layout.validate()?;
        let chunk = Vec::with_capacity(layout.chunk_size * ACCEL_RECORD_LEN);
        Ok(Self {
            source,
            sampler,
            queue,
            layout,
            frame: RecordFrame::new(),
            chunk,
            file_index: 0,
            since_refresh: 0,
            consecutive_failures: 0,
            stats: ProducerStats::default(),
        })
    }

    pub fn stats(&self) -> ProducerStats {
        self.stats
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    /// Run until cancelled, rotating a new file every `records_per_file`
    pub fn run(&mut self, cancel: &CancellationToken) -> ProducerStats {
        let _span = span!(Level::INFO, "Accelerometer producer").entered();
        info!(
            base = %self.layout.base.display(),
            chunk_size = self.layout.chunk_size,
            iterations = self.layout.iterations,
            "Accelerometer acquisition started"
        );

        while !cancel.is_cancelled() {
            match self.produce_file(cancel) {
                Ok(Some(path)) => debug!(file = %path.display(), "Chunk file rotated"),
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Chunk file failed, starting a new one");
                    thread::sleep(FILE_ERROR_BACKOFF);
                }
            }
        }

        info!(
            files = self.stats.files,
            records = self.stats.records,
            read_failures = self.stats.read_failures,
            "Accelerometer acquisition stopped"
        );
        self.stats
    }

    /// Fill one chunk file and hand it to the rotation queue
    ///
    /// Cancellation is checked before every chunk; a chunk in progress is
    /// always completed and the partial file is still enqueued. Returns
    /// `None` if cancelled before anything was written. A write failure
    /// ends the file early: chunks already on disk are still enqueued and
    /// the error is returned.
    pub fn produce_file(&mut self, cancel: &CancellationToken) -> Result<Option<PathBuf>> {
        let path = self.layout.file_path(self.file_index);
        self.file_index += 1;

        let file = File::create(&path)?;
        self.refresh();
        self.since_refresh = 0;

        let (chunks_written, written) = self.write_chunks(file, cancel);
        self.close_file(path, chunks_written, written)
    }

    /// Sample and write chunks until the file is full, cancelled or a write fails
    fn write_chunks<W: Write>(
        &mut self,
        mut out: W,
        cancel: &CancellationToken,
    ) -> (usize, std::io::Result<()>) {
        let mut chunks_written = 0;
        for _ in 0..self.layout.iterations {
            if cancel.is_cancelled() {
                break;
            }

            self.chunk.clear();
            for _ in 0..self.layout.chunk_size {
                self.sample();
            }
            let written = out.write_all(&self.chunk).and_then(|()| out.flush());
            self.chunk.clear();
            if let Err(e) = written {
                return (chunks_written, Err(e));
            }
            chunks_written += 1;
        }
        (chunks_written, Ok(()))
    }

    fn close_file(
        &mut self,
        path: PathBuf,
        chunks_written: usize,
        written: std::io::Result<()>,
    ) -> Result<Option<PathBuf>> {
        if chunks_written == 0 {
            discard_empty(&path);
            return written.map(|()| None).map_err(TelemetryError::from);
        }

        self.stats.files += 1;
        self.queue.enqueue(&path);
        match written {
            Ok(()) => Ok(Some(path)),
            Err(e) => {
                warn!(file = %path.display(), chunks = chunks_written, "Chunk file cut short, partial file enqueued");
                Err(e.into())
            }
        }
    }

    fn sample(&mut self) {
        if self.since_refresh == self.layout.refresh_every {
            self.refresh();
            self.since_refresh = 0;
        }

        self.frame.clear_accel();
        match self.source.read(self.frame.accel_segment_mut()) {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    debug!(failures = self.consecutive_failures, "Accelerometer recovered");
                    self.consecutive_failures = 0;
                }
            }
            Err(e) => {
                self.frame.clear_accel();
                self.consecutive_failures += 1;
                self.stats.read_failures += 1;
                if self.consecutive_failures == 1
                    || self.consecutive_failures % FAILURE_LOG_INTERVAL == 0
                {
                    warn!(error = %e, consecutive = self.consecutive_failures, "Accelerometer read failed");
                }
            }
        }

        self.since_refresh += 1;
        self.chunk.extend_from_slice(self.frame.as_bytes());
        self.stats.records += 1;
    }

    fn refresh(&mut self) {
        let clock = self.sampler.sample_clock();
        let thermal = self.sampler.sample_thermal();
        if !clock.ok {
            self.stats.clock_failures += 1;
        }
        if !thermal.ok {
            self.stats.thermal_failures += 1;
        }
        self.frame.set_clock(clock.ticks);
        self.frame.set_thermal(thermal.fahrenheit);
    }
}

fn discard_empty(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(file = %path.display(), error = %e, "Could not remove empty chunk file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::sim::ConstantThermal;
    use crate::devices::ClockSource;
    use crate::error::Device;
    use crate::record::{AccelRecord, RecordReader, ACCEL_SEGMENT_LEN};

    struct CountingClock(i64);

    impl ClockSource for CountingClock {
        fn current_ticks(&mut self) -> Result<i64> {
            self.0 += 1;
            Ok(self.0)
        }
    }

    /// Writes its own read index on every axis
    struct IndexAccel {
        reads: i32,
        cancel_after: Option<(i32, CancellationToken)>,
    }

    impl IndexAccel {
        fn new() -> Self {
            Self { reads: 0, cancel_after: None }
        }
    }

    impl AccelerometerSource for IndexAccel {
        fn read(&mut self, buffer: &mut [u8; ACCEL_SEGMENT_LEN]) -> Result<()> {
            for axis in 0..3 {
                buffer[axis * 4..axis * 4 + 4].copy_from_slice(&self.reads.to_le_bytes());
            }
            self.reads += 1;
            if let Some((after, token)) = &self.cancel_after {
                if self.reads == *after {
                    token.cancel();
                }
            }
            Ok(())
        }
    }

    struct BrokenAccel;

    impl AccelerometerSource for BrokenAccel {
        fn read(&mut self, buffer: &mut [u8; ACCEL_SEGMENT_LEN]) -> Result<()> {
            buffer.fill(0xAA);
            Err(TelemetryError::device(Device::Accelerometer, "spi timeout"))
        }
    }

    fn producer<A: AccelerometerSource>(
        source: A,
        dir: &Path,
        chunk_size: usize,
        iterations: usize,
        refresh_every: usize,
    ) -> (AccelProducer<A>, Arc<RotationQueue>) {
        let sampler = Arc::new(ClockThermalSampler::new(CountingClock(0), ConstantThermal(98.6)));
        let queue = Arc::new(RotationQueue::new());
        let layout = ChunkLayout {
            base: dir.join("accel_"),
            chunk_size,
            iterations,
            refresh_every,
        };
        (AccelProducer::new(source, sampler, queue.clone(), layout).unwrap(), queue)
    }

    fn read_records(path: &Path) -> Vec<AccelRecord> {
        let file = File::open(path).unwrap();
        RecordReader::new(file).collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_one_full_file_per_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let (mut producer, queue) = producer(IndexAccel::new(), dir.path(), 50, 4, 10);

        let path = producer.produce_file(&CancellationToken::new()).unwrap().unwrap();

        assert_eq!(path, dir.path().join("accel_0"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 50 * 4 * 28);
        assert_eq!(queue.try_dequeue(), Some(path));
        assert_eq!(queue.try_dequeue(), None);
        assert_eq!(producer.stats().files, 1);
        assert_eq!(producer.stats().records, 200);
    }

    #[test]
    fn test_file_counter_increments() {
        let dir = tempfile::tempdir().unwrap();
        let (mut producer, queue) = producer(IndexAccel::new(), dir.path(), 10, 1, 10);
        let cancel = CancellationToken::new();

        producer.produce_file(&cancel).unwrap();
        producer.produce_file(&cancel).unwrap();

        assert_eq!(queue.try_dequeue(), Some(dir.path().join("accel_0")));
        assert_eq!(queue.try_dequeue(), Some(dir.path().join("accel_1")));
    }

    #[test]
    fn test_records_are_in_sample_order() {
        let dir = tempfile::tempdir().unwrap();
        let (mut producer, _queue) = producer(IndexAccel::new(), dir.path(), 7, 3, 5);
        let path = producer.produce_file(&CancellationToken::new()).unwrap().unwrap();

        let records = read_records(&path);
        assert_eq!(records.len(), 21);
        for (i, record) in records.iter().enumerate() {
            assert_eq!((record.x, record.y, record.z), (i as i32, i as i32, i as i32));
            assert_eq!(record.thermal, 98.6);
        }
    }

    #[test]
    fn test_clock_refreshed_every_k_samples() {
        let dir = tempfile::tempdir().unwrap();
        let (mut producer, _queue) = producer(IndexAccel::new(), dir.path(), 25, 4, 10);
        let path = producer.produce_file(&CancellationToken::new()).unwrap().unwrap();

        let ticks: Vec<i64> = read_records(&path).iter().map(|r| r.ticks).collect();
        for window in ticks.windows(10) {
            let changes = window.windows(2).filter(|pair| pair[0] != pair[1]).count();
            assert!(changes <= 1, "clock changed {} times in {:?}", changes, window);
        }
        // Initial sample plus one refresh per further block of 10
        assert_eq!(ticks[0], 1);
        assert_eq!(ticks[9], 1);
        assert_eq!(ticks[10], 2);
        assert_eq!(*ticks.last().unwrap(), 10);
        assert!(ticks.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_cancel_completes_current_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let source = IndexAccel {
            reads: 0,
            cancel_after: Some((15, cancel.clone())),
        };
        let (mut producer, queue) = producer(source, dir.path(), 10, 5, 10);

        let path = producer.produce_file(&cancel).unwrap().unwrap();

        // Cancelled inside the second chunk: both chunks are on disk
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 20 * 28);
        assert_eq!(queue.try_dequeue(), Some(path));
    }

    #[test]
    fn test_cancel_before_first_chunk_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut producer, queue) = producer(IndexAccel::new(), dir.path(), 10, 5, 10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(producer.produce_file(&cancel).unwrap(), None);
        assert!(queue.is_empty());
        assert!(!dir.path().join("accel_0").exists());
    }

    #[test]
    fn test_read_failures_do_not_stop_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let (mut producer, _queue) = producer(BrokenAccel, dir.path(), 10, 2, 10);
        let path = producer.produce_file(&CancellationToken::new()).unwrap().unwrap();

        let records = read_records(&path);
        assert_eq!(records.len(), 20);
        assert!(records.iter().all(|r| r.x == 0 && r.y == 0 && r.z == 0));
        assert_eq!(producer.stats().read_failures, 20);
    }

    /// Accepts `budget` bytes, then fails every write
    struct FillingWriter {
        inner: File,
        budget: usize,
    }

    impl Write for FillingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.budget == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.inner.write(&buf[..n])
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.inner.flush()
        }
    }

    #[test]
    fn test_write_failure_enqueues_chunks_already_written() {
        let dir = tempfile::tempdir().unwrap();
        let (mut producer, queue) = producer(IndexAccel::new(), dir.path(), 10, 5, 10);
        let path = dir.path().join("accel_0");
        let out = FillingWriter {
            inner: File::create(&path).unwrap(),
            budget: 2 * 10 * 28,
        };

        let (chunks, written) = producer.write_chunks(out, &CancellationToken::new());
        assert_eq!(chunks, 2);
        assert!(written.is_err());

        let err = producer.close_file(path.clone(), chunks, written).unwrap_err();
        assert!(matches!(err, TelemetryError::Io(_)));
        assert_eq!(queue.try_dequeue(), Some(path.clone()));
        assert_eq!(producer.stats().files, 1);
        assert_eq!(read_records(&path).len(), 20);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_full_device_does_not_stop_rotation() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("/dev/full", dir.path().join("accel_0")).unwrap();
        let (mut producer, queue) = producer(IndexAccel::new(), dir.path(), 10, 2, 10);
        let cancel = CancellationToken::new();

        let err = producer.produce_file(&cancel).unwrap_err();
        assert!(matches!(err, TelemetryError::Io(_)));
        assert!(queue.is_empty());
        assert_eq!(producer.stats().files, 0);

        // The next file gets a fresh index and is written normally
        let path = producer.produce_file(&cancel).unwrap().unwrap();
        assert_eq!(path, dir.path().join("accel_1"));
        assert_eq!(queue.try_dequeue(), Some(path.clone()));
        assert_eq!(read_records(&path).len(), 20);
    }

    #[test]
    fn test_zero_layout_rejected() {
        let layout = ChunkLayout {
            base: PathBuf::from("accel_"),
            chunk_size: 0,
            iterations: 1,
            refresh_every: 1,
        };
        assert!(layout.validate().is_err());
    }
}
