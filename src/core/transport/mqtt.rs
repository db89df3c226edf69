//! Persistent-connection transport over the shared MQTT session.

use std::sync::Arc;

use envstation_mqtt::{ConnectionManager, TransferError};
use tracing::info;

use super::{PublishError, Transport, TransportKind};
use crate::core::{encoding::WireFormat, reading::Reading};

/// Publishes readings at QoS 1 through a [`ConnectionManager`].
///
/// Requires the manager to be `Connected`; success means the message was
/// handed to the client, not that the broker acknowledged it.
pub struct MqttTransport {
    manager: Arc<ConnectionManager>,
    format: WireFormat,
}

impl MqttTransport {
    pub fn new(manager: Arc<ConnectionManager>, format: WireFormat) -> Self {
        Self { manager, format }
    }

    pub fn format(&self) -> &WireFormat {
        &self.format
    }
}

#[async_trait::async_trait]
impl Transport for MqttTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mqtt
    }

    async fn publish(&self, reading: &Reading) -> Result<(), PublishError> {
        let state = self.manager.state();
        if !state.is_connected() {
            return Err(TransferError::NotConnected(state.to_string()).into());
        }

        let topic = self.format.topic(reading);
        let payload = self.format.payload(reading)?;
        self.manager.publish(&topic, payload).await?;

        info!(station = %reading.station_id, "Published via MQTT");
        Ok(())
    }
}
