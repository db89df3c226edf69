//! envstation: virtual environmental sensor station for ThingSpeak
//!
//! A station generates temperature, humidity and CO2 readings at a fixed
//! interval and publishes them over a persistent MQTT session, falling back
//! to ThingSpeak's HTTP update API whenever the session is unavailable.
//! Companion commands read the channel back.
//!
//! ## Modules
//!
//! * `config`: TOML configuration, loading and validation.
//!
//! * `core`: Runtime components:
//!   - Reading generator
//!   - MQTT and HTTP transports
//!   - Failover controller
//!   - Station loop
//!
//! * `feed`: Latest-entry and historical queries with table rendering.
//!
//! * `logger`: Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.
//!
//! The MQTT session itself lives in the `envstation-mqtt` workspace crate.

pub mod config;
pub mod core;
pub mod feed;
pub mod logger;

#[cfg(test)]
pub(crate) mod test_support;
