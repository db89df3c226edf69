//! The station loop and its assembly from configuration.
//!
//! Each cycle generates a reading, gives the persistent transport a chance to
//! reconnect, publishes through the [`FailoverController`], checks the stop
//! conditions and sleeps. The sleep is the only cancellation point, so a
//! publish in progress always completes. Teardown runs exactly once, on
//! normal exit and on interruption alike.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use envstation_mqtt::ConnectionManager;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    encoding::WireFormat,
    failover::{Delivery, FailoverController, TransportMode},
    reading::ReadingGenerator,
    transport::{MqttTransport, RestTransport},
};
use crate::config::{Config, ConfigError};

/// When the loop stops on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationSchedule {
    pub interval: Duration,
    /// Total runtime; checked after each publish.
    pub duration: Option<Duration>,
    /// Number of readings to publish.
    pub count: Option<u64>,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationReport {
    pub iterations: u64,
    pub via_persistent: u64,
    pub via_request: u64,
    pub failed: u64,
}

impl StationReport {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Persistent => self.via_persistent += 1,
            Delivery::Request => self.via_request += 1,
            Delivery::Failed => self.failed += 1,
        }
    }

    pub fn delivered(&self) -> u64 {
        self.via_persistent + self.via_request
    }
}

/// Command line overrides for one station run.
#[derive(Debug, Clone, Default)]
pub struct StationOptions {
    pub station_id: Option<String>,
    pub interval: Option<u64>,
    pub duration: Option<u64>,
    pub count: Option<u64>,
    pub mode: TransportMode,
}

pub struct Station {
    id: String,
    generator: ReadingGenerator,
    controller: FailoverController,
    schedule: StationSchedule,
}

impl Station {
    pub fn new(
        id: impl Into<String>,
        generator: ReadingGenerator,
        controller: FailoverController,
        schedule: StationSchedule,
    ) -> Self {
        Self {
            id: id.into(),
            generator,
            controller,
            schedule,
        }
    }

    /// Wires the transports described by `config`.
    ///
    /// The persistent path exists only when broker credentials are configured
    /// and the mode is not `RestOnly`. `MqttOnly` without credentials is a
    /// configuration error.
    pub fn from_config(config: &Config, options: StationOptions) -> Result<Self, ConfigError> {
        let id = options.station_id.unwrap_or_else(default_station_id);
        let schedule = StationSchedule {
            interval: Duration::from_secs(options.interval.unwrap_or(config.station.interval)),
            duration: options.duration.map(Duration::from_secs),
            count: options.count,
        };

        let rest = Arc::new(RestTransport::from_config(&config.channel));
        let mut controller = FailoverController::new(rest).with_mode(options.mode);

        match (options.mode, config.transport.has_credentials()) {
            (TransportMode::RestOnly, _) => {
                info!("Transport mode rest-only: MQTT disabled");
            }
            (TransportMode::MqttOnly, false) => {
                return Err(ConfigError::Config(
                    "mqtt-only mode requires [transport.credentials]".into(),
                ));
            }
            (_, false) => {
                info!("No MQTT credentials configured: publishing over HTTP only");
            }
            (_, true) => {
                let manager = Arc::new(ConnectionManager::new(
                    config.transport.clone(),
                    fallback_client_id(&id),
                ));
                let format = WireFormat::for_broker(&config.transport, &config.channel);
                let mqtt = Arc::new(MqttTransport::new(manager.clone(), format));
                controller = controller.with_persistent(manager, mqtt);
            }
        }

        Ok(Self::new(
            id,
            ReadingGenerator::new(&config.station),
            controller,
            schedule,
        ))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schedule(&self) -> &StationSchedule {
        &self.schedule
    }

    pub fn controller(&self) -> &FailoverController {
        &self.controller
    }

    /// Runs cycles until a stop condition or `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> StationReport {
        let start = Instant::now();
        let mut report = StationReport::default();

        info!(
            station = %self.id,
            "Station started (interval {}s, mode {:?})",
            self.schedule.interval.as_secs(),
            self.controller.mode()
        );

        loop {
            let reading = self.generator.generate(&self.id);
            report.iterations += 1;
            debug!(
                iteration = report.iterations,
                "Reading: temperature={} humidity={} co2={} at {}",
                reading.temperature,
                reading.humidity,
                reading.co2,
                reading.timestamp
            );

            self.controller.maintain().await;
            let delivery = self.controller.publish_with_failover(&reading).await;
            report.record(delivery);

            if let Some(limit) = self.schedule.duration {
                if start.elapsed() >= limit {
                    info!("Configured duration of {}s elapsed", limit.as_secs());
                    break;
                }
            }
            if let Some(count) = self.schedule.count {
                if report.iterations >= count {
                    info!("Published {} readings", count);
                    break;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Station interrupted");
                    break;
                }
                _ = sleep(self.schedule.interval) => {}
            }
        }

        self.controller.shutdown().await;
        info!(
            station = %self.id,
            "Station stopped: {} readings, {} via MQTT, {} via HTTP, {} failed",
            report.iterations,
            report.via_persistent,
            report.via_request,
            report.failed
        );
        report
    }
}

/// `station_` followed by 8 hex characters of a random UUID.
pub fn default_station_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("station_{}", &uuid[..8])
}

/// Client id for generic brokers: `envstation_<station>_<unix seconds>`.
fn fallback_client_id(station_id: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("envstation_{station_id}_{now}")
}
