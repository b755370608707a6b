//! Telemetry consumer: replays chunk files and emits one spectral message per second
//!
//! Records are grouped by the whole-second value of their clock field. When
//! the second changes, the finished second is analyzed per axis and sent as
//!
//! ```text
//! <second_counter>,<thermal_mean>,<bin>,<mag>,... (X) ,<bin>,<mag>,... (Y) ,<bin>,<mag>,... (Z)
//! ```
//!
//! Delivery is at most once: a message whose send fails is dropped and the
//! link is replaced. The chunk files on disk remain the durable record.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, span, warn, Level};

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::link::SerialLink;
use crate::record::{AccelRecord, RecordReader};
use crate::rotation::RotationQueue;
use crate::sampler::whole_second;
use crate::spectrum::{format_peaks, SpectralAnalyzer, SpectralPeak, DEFAULT_TOP_BINS};

/// What happens to a chunk file once it has been replayed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumedFilePolicy {
    #[default]
    Keep,
    Delete,
    /// Move into this directory
    Archive(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Spectral bins reported per axis
    pub top_bins: usize,
    /// Raw accelerometer counts to physical units
    pub accel_scale: f64,
    /// Sleep between polls of an empty queue
    pub idle_poll: Duration,
    pub consumed_files: ConsumedFilePolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            top_bins: DEFAULT_TOP_BINS,
            accel_scale: 1.0,
            idle_poll: Duration::from_millis(100),
            consumed_files: ConsumedFilePolicy::Keep,
        }
    }
}

/// Consumer loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Queue empty, backing off
    Idle,
    /// Replaying a chunk file
    Draining,
    /// Emitting the second that just finished
    SecondBoundary,
}

/// One second of accumulated samples
#[derive(Debug, Default, Clone)]
pub struct TelemetryAccumulator {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    thermal_mean: f64,
    thermal_count: u64,
    current_second: Option<i64>,
}

impl TelemetryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_second(&self) -> Option<i64> {
        self.current_second
    }

    pub fn thermal_mean(&self) -> f64 {
        self.thermal_mean
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Add one record's scaled axes and fold its thermal reading into the mean
    pub fn push(&mut self, record: &AccelRecord, scale: f64) {
        self.current_second = Some(whole_second(record.ticks));
        self.x.push(record.x as f64 * scale);
        self.y.push(record.y as f64 * scale);
        self.z.push(record.z as f64 * scale);

        self.thermal_count += 1;
        self.thermal_mean += (record.thermal - self.thermal_mean) / self.thermal_count as f64;
    }

    pub fn reset(&mut self) {
        self.x.clear();
        self.y.clear();
        self.z.clear();
        self.thermal_mean = 0.0;
        self.thermal_count = 0;
        self.current_second = None;
    }
}

/// Build the wire message for one second
pub fn format_message(
    second_counter: u64,
    thermal_mean: f64,
    x: &[SpectralPeak],
    y: &[SpectralPeak],
    z: &[SpectralPeak],
) -> String {
    format!(
        "{},{}{}{}{}",
        second_counter,
        thermal_mean,
        format_peaks(x),
        format_peaks(y),
        format_peaks(z)
    )
}

/// Counters reported when the consumer stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub files: u64,
    pub file_failures: u64,
    pub records: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
}

/// Drains the rotation queue and transmits per-second spectra
pub struct TelemetryConsumer<L> {
    queue: Arc<RotationQueue>,
    link: L,
    config: ConsumerConfig,
    analyzer: SpectralAnalyzer,
    accumulator: TelemetryAccumulator,
    second_counter: u64,
    state: ConsumerState,
    stats: ConsumerStats,
}

impl<L: SerialLink> TelemetryConsumer<L> {
    pub fn new(queue: Arc<RotationQueue>, link: L, config: ConsumerConfig) -> Self {
        Self {
            queue,
            link,
            analyzer: SpectralAnalyzer::new(config.top_bins),
            config,
            accumulator: TelemetryAccumulator::new(),
            second_counter: 0,
            state: ConsumerState::Idle,
            stats: ConsumerStats::default(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn accumulator(&self) -> &TelemetryAccumulator {
        &self.accumulator
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Run until cancelled and the queue is empty, then flush the pending second
    pub fn run(&mut self, cancel: &CancellationToken) -> ConsumerStats {
        let _span = span!(Level::INFO, "Telemetry consumer").entered();
        info!("Telemetry consumer started");

        loop {
            match self.poll() {
                ConsumerState::Idle => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    thread::sleep(self.config.idle_poll);
                }
                _ => continue,
            }
        }

        self.finish();
        info!(
            files = self.stats.files,
            records = self.stats.records,
            sent = self.stats.messages_sent,
            dropped = self.stats.messages_dropped,
            "Telemetry consumer stopped"
        );
        self.stats
    }

    /// Replay the next queued file, if any
    pub fn poll(&mut self) -> ConsumerState {
        match self.queue.try_dequeue() {
            Some(path) => {
                self.state = ConsumerState::Draining;
                if let Err(e) = self.drain_file(&path) {
                    self.stats.file_failures += 1;
                    error!(file = %path.display(), error = %e, "Could not replay chunk file");
                }
            }
            None => self.state = ConsumerState::Idle,
        }
        self.state
    }

    /// Stream every whole record of `path` through the accumulator
    ///
    /// A truncated trailing record is logged and ignored. The accumulator is
    /// carried over, so a second may span two files.
    pub fn drain_file(&mut self, path: &Path) -> Result<u64> {
        let file = File::open(path)?;
        let mut reader: RecordReader<_, AccelRecord> = RecordReader::new(BufReader::new(file));

        let mut records = 0u64;
        loop {
            match reader.next_record() {
                Ok(Some(record)) => {
                    self.ingest(&record);
                    records += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, records, "Chunk file ended mid-record");
                    break;
                }
            }
        }

        self.stats.files += 1;
        self.stats.records += records;
        debug!(file = %path.display(), records, "Chunk file replayed");

        self.dispose(path);
        Ok(records)
    }

    /// Feed one record, emitting the previous second if this one starts a new second
    pub fn ingest(&mut self, record: &AccelRecord) {
        let second = whole_second(record.ticks);
        if let Some(current) = self.accumulator.current_second() {
            if current != second {
                let previous = self.state;
                self.state = ConsumerState::SecondBoundary;
                self.emit();
                self.state = previous;
            }
        }
        self.accumulator.push(record, self.config.accel_scale);
    }

    /// Emit whatever is pending; used at shutdown
    pub fn finish(&mut self) {
        if !self.accumulator.is_empty() {
            self.emit();
        }
    }

    fn emit(&mut self) {
        let x = self.analyzer.analyze(&self.accumulator.x);
        let y = self.analyzer.analyze(&self.accumulator.y);
        let z = self.analyzer.analyze(&self.accumulator.z);
        let message = format_message(
            self.second_counter,
            self.accumulator.thermal_mean(),
            &x,
            &y,
            &z,
        );
        let samples = self.accumulator.len();
        self.accumulator.reset();

        match self.link.send(&message) {
            Ok(()) => {
                self.stats.messages_sent += 1;
                debug!(counter = self.second_counter, samples, "Second transmitted");
            }
            Err(e) => {
                self.stats.messages_dropped += 1;
                warn!(counter = self.second_counter, error = %e, "Telemetry send failed, message dropped");
                match self.link.reconnect() {
                    Ok(fresh) => {
                        self.link = fresh;
                        info!("Downlink reconnected");
                    }
                    Err(e) => warn!(error = %e, "Downlink reconnect failed"),
                }
            }
        }

        self.second_counter += 1;
    }

    fn dispose(&self, path: &Path) {
        let result = match &self.config.consumed_files {
            ConsumedFilePolicy::Keep => Ok(()),
            ConsumedFilePolicy::Delete => fs::remove_file(path),
            ConsumedFilePolicy::Archive(dir) => match path.file_name() {
                Some(name) => fs::rename(path, dir.join(name)),
                None => Ok(()),
            },
        };
        if let Err(e) = result {
            warn!(file = %path.display(), error = %e, policy = ?self.config.consumed_files, "Could not dispose of chunk file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use crate::sampler::TICKS_PER_SECOND;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every attempt; fails sends whose counter is in `fail_counters`
    #[derive(Clone, Default)]
    struct RecordingLink {
        sent: Arc<Mutex<Vec<String>>>,
        attempts: Arc<Mutex<Vec<String>>>,
        reconnects: Arc<AtomicUsize>,
        fail_counters: Vec<u64>,
    }

    impl RecordingLink {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl SerialLink for RecordingLink {
        fn send(&mut self, message: &str) -> Result<()> {
            self.attempts.lock().unwrap().push(message.to_owned());
            let counter: u64 = message.split(',').next().unwrap().parse().unwrap();
            if self.fail_counters.contains(&counter) {
                return Err(TelemetryError::LinkSend("cable unplugged".to_owned()));
            }
            self.sent.lock().unwrap().push(message.to_owned());
            Ok(())
        }

        fn reconnect(&self) -> Result<Self> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(self.clone())
        }
    }

    fn record(second: i64, value: i32, thermal: f64) -> AccelRecord {
        AccelRecord {
            x: value,
            y: -value,
            z: 2 * value,
            ticks: second * TICKS_PER_SECOND + 1234,
            thermal,
        }
    }

    fn consumer(link: RecordingLink) -> TelemetryConsumer<RecordingLink> {
        TelemetryConsumer::new(Arc::new(RotationQueue::new()), link, ConsumerConfig::default())
    }

    fn write_chunk(path: &Path, records: &[AccelRecord]) {
        let bytes: Vec<u8> = records.iter().flat_map(|r| r.encode()).collect();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_incremental_thermal_mean() {
        let mut acc = TelemetryAccumulator::new();
        for t in [90.0, 100.0, 110.0, 120.0] {
            acc.push(&record(1, 0, t), 1.0);
        }
        assert!((acc.thermal_mean() - 105.0).abs() < 1e-12);
        assert_eq!(acc.len(), 4);

        acc.reset();
        assert!(acc.is_empty());
        assert_eq!(acc.current_second(), None);
        assert_eq!(acc.thermal_mean(), 0.0);
    }

    #[test]
    fn test_accumulator_scales_axes() {
        let mut acc = TelemetryAccumulator::new();
        acc.push(&record(0, 256, 70.0), 0.5);
        assert_eq!((acc.x[0], acc.y[0], acc.z[0]), (128.0, -128.0, 256.0));
    }

    #[test]
    fn test_second_boundaries() {
        let link = RecordingLink::default();
        let mut consumer = consumer(link.clone());

        for (i, second) in [1, 1, 1, 2, 2, 3].into_iter().enumerate() {
            consumer.ingest(&record(second, i as i32, 98.6));
        }

        let sent = link.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("0,98.6,"));
        assert!(sent[1].starts_with("1,98.6,"));
        assert_eq!(consumer.accumulator().current_second(), Some(3));
        assert_eq!(consumer.accumulator().len(), 1);
    }

    #[test]
    fn test_message_layout() {
        let link = RecordingLink::default();
        let mut consumer = consumer(link.clone());
        for i in 0..100 {
            consumer.ingest(&record(7, i % 10, 80.0));
        }
        consumer.finish();

        let sent = link.sent();
        assert_eq!(sent.len(), 1);
        let fields: Vec<&str> = sent[0].split(',').collect();
        // counter, thermal, then 3 axes of 20 (bin, magnitude) pairs
        assert_eq!(fields.len(), 2 + 3 * 40);
        assert_eq!(fields[0], "0");
        assert_eq!(fields[1], "80");
        for magnitude in fields[3..].iter().step_by(2) {
            let decimals = magnitude.split('.').nth(1).unwrap();
            assert_eq!(decimals.len(), 8);
        }
    }

    #[test]
    fn test_failed_send_is_dropped_not_retried() {
        let link = RecordingLink {
            fail_counters: vec![5],
            ..Default::default()
        };
        let mut consumer = consumer(link.clone());

        for second in 0..8 {
            consumer.ingest(&record(second, 1, 98.6));
            consumer.ingest(&record(second, 2, 98.6));
        }

        let counters: Vec<String> = link
            .sent()
            .iter()
            .map(|m| m.split(',').next().unwrap().to_owned())
            .collect();
        assert_eq!(counters, vec!["0", "1", "2", "3", "4", "6"]);

        let attempts_for_5 = link
            .attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.starts_with("5,"))
            .count();
        assert_eq!(attempts_for_5, 1);
        assert_eq!(link.reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(consumer.stats().messages_dropped, 1);
        assert_eq!(consumer.stats().messages_sent, 6);
    }

    #[test]
    fn test_second_spans_two_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("accel_0");
        let second = dir.path().join("accel_1");
        write_chunk(&first, &[record(1, 1, 70.0), record(1, 2, 70.0)]);
        write_chunk(&second, &[record(1, 3, 80.0), record(2, 4, 70.0)]);

        let link = RecordingLink::default();
        let mut consumer = consumer(link.clone());
        consumer.queue.enqueue(&first);
        consumer.queue.enqueue(&second);

        assert_eq!(consumer.poll(), ConsumerState::Draining);
        assert!(link.sent().is_empty());
        assert_eq!(consumer.poll(), ConsumerState::Draining);
        assert_eq!(consumer.poll(), ConsumerState::Idle);

        let sent = link.sent();
        assert_eq!(sent.len(), 1);
        let thermal: f64 = sent[0].split(',').nth(1).unwrap().parse().unwrap();
        assert!((thermal - 220.0 / 3.0).abs() < 1e-9);
        assert_eq!(consumer.stats().records, 4);
    }

    #[test]
    fn test_truncated_file_keeps_whole_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accel_0");
        let mut bytes: Vec<u8> = [record(1, 1, 70.0), record(1, 2, 70.0)]
            .iter()
            .flat_map(|r| r.encode())
            .collect();
        bytes.extend_from_slice(&[0u8; 10]);
        fs::write(&path, bytes).unwrap();

        let mut consumer = consumer(RecordingLink::default());
        assert_eq!(consumer.drain_file(&path).unwrap(), 2);
        assert_eq!(consumer.accumulator().len(), 2);
    }

    #[test]
    fn test_missing_file_moves_on() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("accel_1");
        write_chunk(&present, &[record(4, 1, 70.0)]);

        let mut consumer = consumer(RecordingLink::default());
        consumer.queue.enqueue(dir.path().join("accel_0"));
        consumer.queue.enqueue(&present);

        consumer.poll();
        consumer.poll();

        assert_eq!(consumer.stats().file_failures, 1);
        assert_eq!(consumer.stats().files, 1);
        assert_eq!(consumer.accumulator().current_second(), Some(4));
    }

    #[test]
    fn test_consumed_file_policies() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive");
        fs::create_dir(&archive).unwrap();
        let deleted = dir.path().join("accel_0");
        let archived = dir.path().join("accel_1");
        write_chunk(&deleted, &[record(1, 1, 70.0)]);
        write_chunk(&archived, &[record(1, 1, 70.0)]);

        let queue = Arc::new(RotationQueue::new());
        let mut config = ConsumerConfig {
            consumed_files: ConsumedFilePolicy::Delete,
            ..Default::default()
        };
        let mut deleting = TelemetryConsumer::new(queue.clone(), RecordingLink::default(), config.clone());
        deleting.drain_file(&deleted).unwrap();
        assert!(!deleted.exists());

        config.consumed_files = ConsumedFilePolicy::Archive(archive.clone());
        let mut archiving = TelemetryConsumer::new(queue, RecordingLink::default(), config);
        archiving.drain_file(&archived).unwrap();
        assert!(!archived.exists());
        assert!(archive.join("accel_1").exists());
    }

    #[test]
    fn test_run_exits_when_cancelled_and_drained() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accel_0");
        write_chunk(&path, &[record(1, 1, 70.0), record(2, 1, 70.0)]);

        let link = RecordingLink::default();
        let mut consumer = consumer(link.clone());
        consumer.queue.enqueue(&path);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = consumer.run(&cancel);

        // Second 1 at the boundary, second 2 flushed on exit
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(link.sent().len(), 2);
        assert_eq!(consumer.state(), ConsumerState::Idle);
    }
}
