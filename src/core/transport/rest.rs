//! Request/response transport over ThingSpeak's HTTP update API.
//!
//! Each publish is an independent `GET {rest_url}/update?...` call; there is no
//! session to maintain. The endpoint answers with a bare integer: the new
//! entry id, or `0` when the update was refused (rate limit, bad key).

use std::time::Duration;

use tracing::{debug, info};
use ureq::{Agent, AgentBuilder};

use super::{PublishError, Transport, TransportKind};
use crate::{
    config::channel::ChannelConfig,
    core::{encoding::update_query, reading::Reading},
};

#[derive(Clone)]
pub struct RestTransport {
    agent: Agent,
    update_url: String,
    write_api_key: String,
}

impl RestTransport {
    pub fn new(base_url: &str, write_api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: AgentBuilder::new().timeout(timeout).build(),
            update_url: format!("{}/update", base_url.trim_end_matches('/')),
            write_api_key: write_api_key.into(),
        }
    }

    pub fn from_config(channel: &ChannelConfig) -> Self {
        Self::new(
            channel.base_url(),
            channel.write_api_key.clone(),
            channel.request_timeout(),
        )
    }

    /// Blocking update call; returns the accepted entry id.
    fn send(&self, reading: &Reading) -> Result<i64, PublishError> {
        let mut request = self.agent.get(&self.update_url);
        for (key, value) in update_query(&self.write_api_key, reading) {
            request = request.query(key, &value);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(PublishError::HttpStatus(code)),
            Err(ureq::Error::Transport(e)) => return Err(PublishError::Request(e.to_string())),
        };

        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(PublishError::HttpStatus(status));
        }
        let body = response
            .into_string()
            .map_err(|e| PublishError::Request(e.to_string()))?;
        parse_entry_id(&body)
    }
}

#[async_trait::async_trait]
impl Transport for RestTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn publish(&self, reading: &Reading) -> Result<(), PublishError> {
        let transport = self.clone();
        let owned = reading.clone();
        let entry_id = tokio::task::spawn_blocking(move || transport.send(&owned)).await??;

        info!(
            station = %reading.station_id,
            "Published via HTTP (entry id {})", entry_id
        );
        Ok(())
    }
}

/// Interprets an update response body. Only a positive integer is success.
pub fn parse_entry_id(body: &str) -> Result<i64, PublishError> {
    let trimmed = body.trim();
    let entry_id: i64 = trimmed.parse().map_err(|_| {
        debug!("Unexpected update response body: {:?}", trimmed);
        PublishError::InvalidBody(trimmed.to_string())
    })?;
    if entry_id <= 0 {
        return Err(PublishError::Rejected(entry_id));
    }
    Ok(entry_id)
}
