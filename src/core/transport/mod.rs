//! Transports that deliver a [`Reading`] to ThingSpeak.
//!
//! Both transports share the [`Transport`] trait so the failover controller
//! can hold them behind `Arc<dyn Transport>` and tests can substitute mocks.

use std::fmt;

use thiserror::Error;

use super::reading::Reading;

pub mod mqtt;
pub mod rest;

pub use mqtt::MqttTransport;
pub use rest::RestTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Persistent MQTT session.
    Mqtt,
    /// Stateless HTTP update call.
    Http,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Mqtt => "mqtt",
            TransportKind::Http => "http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT publish failed: {0}")]
    Mqtt(#[from] envstation_mqtt::TransferError),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// The update endpoint answered with a non-positive entry id.
    #[error("Update rejected (entry id {0})")]
    Rejected(i64),

    #[error("Response body is not an entry id: {0:?}")]
    InvalidBody(String),

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Something that can deliver one reading.
///
/// `Ok(())` means the transport accepted the reading; what that implies
/// (queued vs. acknowledged) depends on the implementation.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn publish(&self, reading: &Reading) -> Result<(), PublishError>;
}
