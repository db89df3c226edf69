//! Simulated sensor readings.

use rand::Rng;
use serde::{Deserialize, Serialize};
use time::{macros::format_description, OffsetDateTime};

use crate::config::station::{SensorRange, StationConfig};

/// One immutable sample from a station.
///
/// `timestamp` is RFC 3339 in UTC with second precision, e.g.
/// `2026-10-16T08:30:00Z`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub station_id: String,
    pub timestamp: String,
    pub temperature: f64,
    pub humidity: f64,
    pub co2: f64,
}

/// Draws readings uniformly from the configured sensor ranges.
#[derive(Debug, Clone)]
pub struct ReadingGenerator {
    temperature: SensorRange,
    humidity: SensorRange,
    co2: SensorRange,
}

impl Default for ReadingGenerator {
    fn default() -> Self {
        Self::new(&StationConfig::default())
    }
}

impl ReadingGenerator {
    pub fn new(config: &StationConfig) -> Self {
        Self {
            temperature: config.temperature,
            humidity: config.humidity,
            co2: config.co2,
        }
    }

    pub fn generate(&self, station_id: &str) -> Reading {
        self.generate_with(&mut rand::thread_rng(), station_id)
    }

    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R, station_id: &str) -> Reading {
        Reading {
            station_id: station_id.to_string(),
            timestamp: utc_timestamp(OffsetDateTime::now_utc()),
            temperature: sample(rng, self.temperature),
            humidity: sample(rng, self.humidity),
            co2: sample(rng, self.co2),
        }
    }
}

/// Uniform draw rounded to 2 decimals, clamped so rounding never leaves the range.
fn sample<R: Rng + ?Sized>(rng: &mut R, range: SensorRange) -> f64 {
    let raw = rng.gen_range(range.min..=range.max);
    ((raw * 100.0).round() / 100.0).clamp(range.min, range.max)
}

pub fn utc_timestamp(at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    at.to_offset(time::UtcOffset::UTC)
        .format(&format)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
