//! Wires the producers and the consumer onto their threads and shuts them
//! down in order

use std::thread;
use std::time::Duration;

use tracing::{error, info};

use crate::accel::{AccelProducer, ProducerStats};
use crate::cancel::CancellationToken;
use crate::common::TimeKeeper;
use crate::devices::{AccelerometerSource, DataReadyLine, GyroscopeSource};
use crate::error::Result;
use crate::gyro::{GyroProducer, GyroStats};
use crate::link::SerialLink;
use crate::telemetry::{ConsumerStats, TelemetryConsumer};

/// How often the supervising thread checks for cancellation or timeout
const SUPERVISOR_TICK: Duration = Duration::from_millis(50);

/// Totals from a completed run
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PipelineReport {
    pub accel: ProducerStats,
    pub gyro: GyroStats,
    pub telemetry: ConsumerStats,
    pub elapsed_secs: f64,
}

/// Accelerometer thread, gyroscope handler and telemetry thread
pub struct Pipeline<A, G, D, L> {
    accel: AccelProducer<A>,
    gyro: GyroProducer<G>,
    line: D,
    consumer: TelemetryConsumer<L>,
}

impl<A, G, D, L> Pipeline<A, G, D, L>
where
    A: AccelerometerSource + 'static,
    G: GyroscopeSource + 'static,
    D: DataReadyLine,
    L: SerialLink + 'static,
{
    pub fn new(
        accel: AccelProducer<A>,
        gyro: GyroProducer<G>,
        line: D,
        consumer: TelemetryConsumer<L>,
    ) -> Self {
        Self {
            accel,
            gyro,
            line,
            consumer,
        }
    }

    /// Run until `cancel` is set or `duration` has passed
    ///
    /// Shutdown order: the accelerometer thread finishes its chunk and
    /// enqueues its last file, the gyroscope handler is unregistered, then
    /// the consumer drains the queue and flushes the pending second.
    pub fn run(self, cancel: &CancellationToken, duration: Option<Duration>) -> Result<PipelineReport> {
        let Self {
            mut accel,
            gyro,
            line,
            mut consumer,
        } = self;
        let timer = TimeKeeper::new();

        let attachment = gyro.attach(line)?;

        let consumer_cancel = CancellationToken::new();
        let consumer_thread = {
            let consumer_cancel = consumer_cancel.clone();
            thread::Builder::new()
                .name("telemetry".to_owned())
                .spawn(move || consumer.run(&consumer_cancel))?
        };

        let accel_thread = {
            let cancel = cancel.clone();
            let spawned = thread::Builder::new()
                .name("accelerometer".to_owned())
                .spawn(move || accel.run(&cancel));
            match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    let _ = attachment.detach();
                    consumer_cancel.cancel();
                    let _ = consumer_thread.join();
                    return Err(e.into());
                }
            }
        };

        info!(duration_secs = ?duration.map(|d| d.as_secs()), "Acquisition running");
        while !cancel.is_cancelled() {
            if timer.has_elapsed(duration) {
                info!("Run duration reached");
                cancel.cancel();
                break;
            }
            thread::sleep(SUPERVISOR_TICK);
        }

        let accel_stats = accel_thread.join().unwrap_or_else(|_| {
            error!("Accelerometer thread panicked");
            ProducerStats::default()
        });

        let gyro_stats = attachment.detach().unwrap_or_else(|e| {
            error!(error = %e, "Could not unregister gyroscope handler");
            GyroStats::default()
        });

        consumer_cancel.cancel();
        let telemetry_stats = consumer_thread.join().unwrap_or_else(|_| {
            error!("Telemetry thread panicked");
            ConsumerStats::default()
        });

        Ok(PipelineReport {
            accel: accel_stats,
            gyro: gyro_stats,
            telemetry: telemetry_stats,
            elapsed_secs: timer.elapsed_secs(),
        })
    }
}
