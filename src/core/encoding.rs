//! Wire formats for publishing readings.
//!
//! The broker identity decides the MQTT layout:
//!
//! | broker      | topic                                   | payload                                  |
//! |-------------|-----------------------------------------|------------------------------------------|
//! | ThingSpeak  | `channels/{channel_id}/publish/{key}`   | `{temp},{hum},{co2},station_id:{id}`     |
//! | any other   | `iot/environment/{station_id}`          | JSON of the full reading                 |
//!
//! The HTTP update call always uses ThingSpeak's `field1..3` + `status` layout.

use super::{reading::Reading, transport::PublishError};
use crate::config::{channel::ChannelConfig, TransportConfig};

const STATUS_PREFIX: &str = "station_id:";

/// Topic and payload layout for the persistent transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFormat {
    ThingSpeak {
        channel_id: String,
        write_api_key: String,
    },
    Generic,
}

impl WireFormat {
    pub fn for_broker(transport: &TransportConfig, channel: &ChannelConfig) -> Self {
        if transport.is_thingspeak() {
            WireFormat::ThingSpeak {
                channel_id: channel.channel_id.clone(),
                write_api_key: channel.write_api_key.clone(),
            }
        } else {
            WireFormat::Generic
        }
    }

    pub fn topic(&self, reading: &Reading) -> String {
        match self {
            WireFormat::ThingSpeak {
                channel_id,
                write_api_key,
            } => format!("channels/{channel_id}/publish/{write_api_key}"),
            WireFormat::Generic => format!("iot/environment/{}", reading.station_id),
        }
    }

    pub fn payload(&self, reading: &Reading) -> Result<String, PublishError> {
        match self {
            WireFormat::ThingSpeak { .. } => Ok(format!(
                "{},{},{},{}",
                field_value(reading.temperature),
                field_value(reading.humidity),
                field_value(reading.co2),
                station_status(&reading.station_id)
            )),
            WireFormat::Generic => Ok(serde_json::to_string(reading)?),
        }
    }
}

/// Sensor value as sent on the wire; whole numbers keep their `.0`.
fn field_value(value: f64) -> String {
    format!("{value:?}")
}

/// `status` value that tags an entry with its station.
pub fn station_status(station_id: &str) -> String {
    format!("{STATUS_PREFIX}{station_id}")
}

/// Query parameters of the HTTP update call, in request order.
pub fn update_query(write_api_key: &str, reading: &Reading) -> Vec<(&'static str, String)> {
    vec![
        ("api_key", write_api_key.to_string()),
        ("field1", field_value(reading.temperature)),
        ("field2", field_value(reading.humidity)),
        ("field3", field_value(reading.co2)),
        ("status", station_status(&reading.station_id)),
    ]
}

/// Station id from a `status` field; `"Unknown"` when absent or untagged.
pub fn parse_station_id(status: Option<&str>) -> String {
    status
        .and_then(|s| s.split(':').nth(1))
        .map(str::to_string)
        .unwrap_or_else(|| "Unknown".to_string())
}
