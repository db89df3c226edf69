//! Persistent MQTT connection for envstation.
//!
//! This crate manages a single broker session under a bounded retry budget:
//! TCP reachability probe, handshake with a settle window, out-of-band state
//! tracking through a background kernel, QoS 1 publishing and best-effort
//! teardown. It knows nothing about readings or payload formats; callers pass
//! ready-made topics and payloads.

pub mod budget;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod probe;
pub mod state;

pub use budget::RetryBudget;
pub use client::{resolve_client_id, ClientBuilder};
pub use config::{Config, Credentials};
pub use connection::{describe_return_code, ConnectionKernel};
pub use error::TransferError;
pub use manager::ConnectionManager;
pub use state::{ConnectionState, StateCell};
