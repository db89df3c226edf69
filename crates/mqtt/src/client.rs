//! MQTT client builder.
//!
//! `ClientBuilder` turns a validated [`Config`] into rumqttc's `AsyncClient`
//! and `EventLoop` pair. The pair must be used together: the client queues
//! requests and the event loop drives them over the network.
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::from_config(&config, "station_1a2b3c4d")?
//!     .build()?;
//! ```

use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use validator::Validate;

use super::{config::Config, error::TransferError};

/// Builder for constructing MQTT clients with a fluent API.
pub struct ClientBuilder {
    opts: MqttOptions,
    cap: usize,
}

impl ClientBuilder {
    pub fn new(
        client_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        cap: usize,
    ) -> Result<Self, TransferError> {
        Ok(Self {
            opts: MqttOptions::new(client_id, host, port),
            cap,
        })
    }

    /// Creates a builder from configuration.
    ///
    /// `fallback_id` is used as the client identifier when neither the
    /// configuration nor the broker identity provides one (see
    /// [`resolve_client_id`]). Credentials, when present, are attached here.
    pub fn from_config(config: &Config, fallback_id: &str) -> Result<Self, TransferError> {
        config.validate()?;

        let client_id = resolve_client_id(config, fallback_id);
        let cap = config.request_channel_capacity.unwrap_or(10) as usize;

        let mut builder = Self::new(client_id, config.host.clone(), config.port, cap)?
            .keep_alive(config.keep_alive)
            .clean_session(config.clean_session);

        if let Some(creds) = &config.credentials {
            builder = builder.credentials(creds.username.clone(), creds.password.clone());
        }

        Ok(builder)
    }

    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    /// Sets the username/password sent in CONNECT.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    pub fn client_id(&self) -> String {
        self.opts.client_id()
    }

    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        if self.cap == 0 {
            return Err(TransferError::ClientSetup(
                "Request channel capacity must be positive".into(),
            ));
        }
        Ok(AsyncClient::new(self.opts, self.cap))
    }
}

/// Picks the client identifier presented to the broker.
///
/// Priority: the configured id, then the username for ThingSpeak brokers
/// (which bind device credentials to the client id), then `fallback_id`.
/// An empty fallback yields a random UUID.
pub fn resolve_client_id(config: &Config, fallback_id: &str) -> String {
    if !config.client_id.is_empty() {
        return config.client_id.clone();
    }
    if config.is_thingspeak() {
        if let Some(creds) = &config.credentials {
            return creds.username.clone();
        }
    }
    if fallback_id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        fallback_id.to_string()
    }
}
