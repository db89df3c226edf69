//! Read side: querying and rendering published channel data.
//!
//! Backs the `latest` and `history` commands. Data is fetched straight from
//! the ThingSpeak channel feed with the read API key; nothing is stored
//! locally.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime};
use tracing::debug;
use ureq::{Agent, AgentBuilder};

use crate::{config::channel::ChannelConfig, core::encoding::parse_station_id};

mod table;

pub use table::render_grid;

/// ThingSpeak's maximum page size for the feed endpoint.
const MAX_RESULTS: u32 = 8000;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Invalid feed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("No data available")]
    NoData,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One channel entry as returned by the feed endpoints.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FeedEntry {
    pub created_at: Option<String>,
    pub entry_id: Option<i64>,
    pub field1: Option<String>,
    pub field2: Option<String>,
    pub field3: Option<String>,
    pub status: Option<String>,
}

impl FeedEntry {
    pub fn station_id(&self) -> String {
        parse_station_id(self.status.as_deref())
    }

    pub fn field(&self, sensor: SensorKind) -> Option<&str> {
        match sensor {
            SensorKind::Temperature => self.field1.as_deref(),
            SensorKind::Humidity => self.field2.as_deref(),
            SensorKind::Co2 => self.field3.as_deref(),
        }
    }

    pub fn created_at(&self) -> Option<PrimitiveDateTime> {
        self.created_at.as_deref().and_then(parse_feed_time)
    }
}

#[derive(Debug, Deserialize)]
struct FeedPage {
    #[serde(default)]
    feeds: Vec<FeedEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SensorKind {
    Temperature,
    Humidity,
    Co2,
}

impl SensorKind {
    pub fn title(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "Temperature",
            SensorKind::Humidity => "Humidity",
            SensorKind::Co2 => "CO2",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Co2 => "ppm",
        }
    }
}

#[derive(Clone)]
pub struct FeedClient {
    agent: Agent,
    base_url: String,
    channel_id: String,
    read_api_key: String,
}

impl FeedClient {
    pub fn new(
        base_url: &str,
        channel_id: impl Into<String>,
        read_api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent: AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            channel_id: channel_id.into(),
            read_api_key: read_api_key.into(),
        }
    }

    pub fn from_config(channel: &ChannelConfig) -> Self {
        Self::new(
            channel.base_url(),
            channel.channel_id.clone(),
            channel.read_api_key.clone(),
            channel.request_timeout(),
        )
    }

    /// Most recent entry of the channel.
    pub async fn latest(&self) -> Result<FeedEntry, FeedError> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || {
            let url = format!("{}/channels/{}/feeds/last.json", client.base_url, client.channel_id);
            let body = client.get(&url, &[])?;
            // An empty channel answers with a bare `-1`.
            if body.trim() == "-1" {
                return Err(FeedError::NoData);
            }
            Ok(serde_json::from_str(&body)?)
        })
        .await?
    }

    /// Entries created in the last `hours` hours, oldest first.
    pub async fn history(&self, hours: u32) -> Result<Vec<FeedEntry>, FeedError> {
        let end = OffsetDateTime::now_utc();
        let start = end - time::Duration::hours(i64::from(hours));
        let (start, end) = (format_feed_time(start), format_feed_time(end));

        let client = self.clone();
        tokio::task::spawn_blocking(move || {
            let url = format!("{}/channels/{}/feeds.json", client.base_url, client.channel_id);
            let results = MAX_RESULTS.to_string();
            let body = client.get(
                &url,
                &[("start", &start), ("end", &end), ("results", &results)],
            )?;
            let page: FeedPage = serde_json::from_str(&body)?;
            Ok(page.feeds)
        })
        .await?
    }

    fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<String, FeedError> {
        debug!("GET {}", url);
        let mut request = self.agent.get(url).query("api_key", &self.read_api_key);
        for (key, value) in params {
            request = request.query(key, value);
        }
        match request.call() {
            Ok(response) => response
                .into_string()
                .map_err(|e| FeedError::Request(e.to_string())),
            Err(ureq::Error::Status(code, _)) => Err(FeedError::HttpStatus(code)),
            Err(ureq::Error::Transport(e)) => Err(FeedError::Request(e.to_string())),
        }
    }
}

fn parse_feed_time(value: &str) -> Option<PrimitiveDateTime> {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    PrimitiveDateTime::parse(value, &format).ok()
}

fn format_feed_time(at: OffsetDateTime) -> String {
    crate::core::reading::utc_timestamp(at)
}

fn display_time(at: PrimitiveDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    at.format(&format).unwrap_or_default()
}

/// Grid table for the `latest` command.
pub fn render_latest(entry: &FeedEntry) -> String {
    let timestamp = match (entry.created_at(), entry.created_at.as_deref()) {
        (Some(parsed), _) => display_time(parsed),
        (None, Some(raw)) => raw.to_string(),
        (None, None) => "Unknown".to_string(),
    };
    let value = |sensor: SensorKind| {
        format!("{} {}", entry.field(sensor).unwrap_or("-"), sensor.unit())
    };

    let rows = vec![
        vec!["Station ID".to_string(), entry.station_id()],
        vec!["Timestamp".to_string(), timestamp],
        vec!["Temperature".to_string(), value(SensorKind::Temperature)],
        vec!["Humidity".to_string(), value(SensorKind::Humidity)],
        vec!["CO2".to_string(), value(SensorKind::Co2)],
    ];

    format!(
        "Latest Environmental Sensor Data\n{}\n{}",
        "=".repeat(40),
        render_grid(None, &rows)
    )
}

/// One valid sample of a historical series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub at: PrimitiveDateTime,
    pub value: f64,
}

/// Valid points for `sensor`, skipping entries with a bad timestamp or value,
/// plus the station id of the first tagged entry.
pub fn extract_series(entries: &[FeedEntry], sensor: SensorKind) -> (Option<String>, Vec<SeriesPoint>) {
    let station = entries
        .iter()
        .find(|e| e.status.as_deref().is_some_and(|s| !s.is_empty()))
        .map(FeedEntry::station_id);

    let points = entries
        .iter()
        .filter_map(|entry| {
            let at = entry.created_at()?;
            let value = entry.field(sensor)?.trim().parse::<f64>().ok()?;
            Some(SeriesPoint { at, value })
        })
        .collect();

    (station, points)
}

/// Report for the `history` command, or `None` when there is nothing to show.
pub fn render_history(entries: &[FeedEntry], sensor: SensorKind, hours: u32) -> Option<String> {
    let (station, points) = extract_series(entries, sensor);
    if points.is_empty() {
        return None;
    }

    let header = format!("{} ({})", sensor.title(), sensor.unit());
    let rows: Vec<Vec<String>> = points
        .iter()
        .map(|p| vec![display_time(p.at), format!("{} {}", p.value, sensor.unit())])
        .collect();

    Some(format!(
        "Historical {} Data for the Last {} Hours\nStation ID: {}\n{}\n{}",
        sensor.title(),
        hours,
        station.unwrap_or_else(|| "Unknown".to_string()),
        "=".repeat(60),
        render_grid(Some(&["Timestamp", header.as_str()]), &rows)
    ))
}
