//! Vibration telemetry acquisition pipeline
//!
//! Two independently clocked producers record to disk while a consumer turns
//! the accelerometer stream into one spectral summary per second:
//!
//! ```text
//! AccelProducer ──chunk files──> RotationQueue ──> TelemetryConsumer ──> SerialLink
//!        │                                                 │
//!        └──────────── ClockThermalSampler ────────────────┤
//! GyroProducer (data-ready edge) ──> gyro.bin              SpectralAnalyzer
//! ```
//!
//! Devices are injected through the traits in [`devices`]; simulated and
//! host-backed implementations are provided for running without hardware.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vibe_telemetry::devices::host::HostClock;
//! use vibe_telemetry::devices::sim::{ConstantThermal, CountingGyroscope, SineAccelerometer, TimerLine};
//! use vibe_telemetry::{
//!     AccelProducer, CancellationToken, ClockThermalSampler, GyroProducer, LogLink, Pipeline,
//!     RotationQueue, RunConfig, TelemetryConsumer,
//! };
//!
//! let config = RunConfig::default();
//! let sampler = Arc::new(ClockThermalSampler::new(HostClock, ConstantThermal(98.6)));
//! let queue = Arc::new(RotationQueue::new());
//!
//! let accel = SineAccelerometer::new(config.samples_per_second, [60.0, 120.0, 250.0], 25_600.0).paced();
//! let accel = AccelProducer::new(accel, sampler.clone(), queue.clone(), config.chunk_layout())?;
//! let gyro = GyroProducer::create(CountingGyroscope::new(), sampler, config.gyro_path())?;
//! let consumer = TelemetryConsumer::new(queue, LogLink::default(), config.consumer_config());
//!
//! let report = Pipeline::new(accel, gyro, TimerLine::new(200), consumer)
//!     .run(&CancellationToken::new(), Some(std::time::Duration::from_secs(10)))?;
//! println!("{} messages sent", report.telemetry.messages_sent);
//! # Ok::<(), vibe_telemetry::TelemetryError>(())
//! ```

pub mod accel;
pub mod cancel;
pub mod common;
pub mod config;
pub mod devices;
pub mod error;
pub mod gyro;
pub mod link;
pub mod pipeline;
pub mod record;
pub mod rotation;
pub mod sampler;
pub mod spectrum;
pub mod status;
pub mod telemetry;

// Re-export public API
pub use accel::{AccelProducer, ChunkLayout, ProducerStats};
pub use cancel::CancellationToken;
pub use common::{create_bar, TimeKeeper};
pub use config::RunConfig;
pub use error::{Device, Result, TelemetryError};
pub use gyro::{GyroAttachment, GyroProducer, GyroStats};
pub use link::{Downlink, LogLink, SerialLink, SerialPortLink};
pub use pipeline::{Pipeline, PipelineReport};
pub use record::{AccelRecord, GyroFrame, GyroRecord, RecordReader};
pub use rotation::RotationQueue;
pub use sampler::{ClockThermalSampler, TICKS_PER_SECOND};
pub use spectrum::{SpectralAnalyzer, SpectralPeak};
pub use status::{read_once, Reading, ResultStatus};
pub use telemetry::{ConsumedFilePolicy, ConsumerConfig, ConsumerStats, TelemetryConsumer};
