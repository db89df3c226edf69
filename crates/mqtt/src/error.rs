//! Error handling for the persistent connection.
//!
//! `TransferError` is the single error type of this crate. Every variant is
//! recoverable from the station's point of view: the caller logs it, leaves the
//! connection in `Failed` or `Disconnected`, and falls back to HTTP.
//!
//! # Error Categories
//!
//! **Setup** (caught when the client is built):
//! - `ClientSetup`: options could not be turned into a client
//! - `ConfigError`: validation failures in the `[transport]` section
//!
//! **Connect path** (consume one unit of the retry budget):
//! - `ProbeUnreachable`: the TCP reachability probe failed
//! - `ClientConnection`: the MQTT event loop returned an error
//! - `HandshakeFailed`: the session ended before it was acknowledged
//! - `ConnectTimeout`: no acknowledgement inside the settle window
//! - `RetryBudgetExhausted`: no attempts left for this process
//!
//! **Publish path**:
//! - `NotConnected`: publish attempted outside the `Connected` state
//! - `ClientTransfer`: the request could not be queued on the client

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// MQTT client initialization failed.
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// Configuration validation failed.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// The broker address did not accept a TCP connection within the timeout.
    #[error("Broker {addr} unreachable: {reason}")]
    ProbeUnreachable { addr: String, reason: String },

    /// MQTT connection to broker failed or was lost.
    ///
    /// Boxed to keep the enum small.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// The event loop ended the handshake without a session.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The broker did not acknowledge the handshake in time.
    #[error("No connection acknowledgement within {0:?}")]
    ConnectTimeout(Duration),

    /// Every connection attempt allowed for this run has been used.
    #[error("Retry budget exhausted after {0} attempts")]
    RetryBudgetExhausted(u32),

    /// Publish requested while the connection is not established.
    #[error("Not connected (state: {0})")]
    NotConnected(String),

    /// MQTT client failed to queue a packet.
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}
