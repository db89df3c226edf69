//! Station behaviour settings (`[station]` table).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Closed interval `[min, max]` a simulated sensor draws from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_range_order"))]
pub struct SensorRange {
    pub min: f64,
    pub max: f64,
}

impl SensorRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

fn validate_range_order(range: &SensorRange) -> Result<(), ValidationError> {
    if range.min.is_finite() && range.max.is_finite() && range.min <= range.max {
        return Ok(());
    }
    let mut err = ValidationError::new("invalid_sensor_range");
    err.message = Some(format!("Sensor range [{}, {}] must satisfy min <= max", range.min, range.max).into());
    Err(err)
}

/// Physical limits each configured range must stay inside.
pub const TEMPERATURE_LIMITS: SensorRange = SensorRange::new(-50.0, 50.0);
pub const HUMIDITY_LIMITS: SensorRange = SensorRange::new(0.0, 100.0);
pub const CO2_LIMITS: SensorRange = SensorRange::new(300.0, 2000.0);

fn validate_sensor_limits(config: &StationConfig) -> Result<(), ValidationError> {
    let sensors = [
        ("Temperature", config.temperature, TEMPERATURE_LIMITS),
        ("Humidity", config.humidity, HUMIDITY_LIMITS),
        ("CO2", config.co2, CO2_LIMITS),
    ];
    for (name, range, limits) in sensors {
        if !(limits.contains(range.min) && limits.contains(range.max)) {
            let mut err = ValidationError::new("sensor_range_out_of_limits");
            err.message = Some(
                format!(
                    "{} range [{}, {}] must lie within [{}, {}]",
                    name, range.min, range.max, limits.min, limits.max
                )
                .into(),
            );
            return Err(err);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_sensor_limits", skip_on_field_errors = false))]
pub struct StationConfig {
    /// Seconds between two readings.
    #[validate(range(
        min = 1,
        max = 86400,
        message = "Interval must be between 1 and 86400 seconds"
    ))]
    pub interval: u64,

    /// Temperature in °C.
    #[validate(nested)]
    pub temperature: SensorRange,

    /// Relative humidity in %.
    #[validate(nested)]
    pub humidity: SensorRange,

    /// CO2 concentration in ppm.
    #[validate(nested)]
    pub co2: SensorRange,
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            interval: 60,
            temperature: TEMPERATURE_LIMITS,
            humidity: HUMIDITY_LIMITS,
            co2: CO2_LIMITS,
        }
    }
}

impl StationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}
