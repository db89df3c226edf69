//! Configuration structures for the persistent MQTT connection.
//!
//! All configurations support serde deserialization, so they can be embedded
//! in the application's TOML file under the `[transport]` table.
//!
//! # Validation
//!
//! Every constraint is declared with the `validator` crate, so an invalid
//! broker section fails at load time rather than at connect time.
//!
//! # Examples
//!
//! ```ignore
//! let config = Config {
//!     host: "mqtt3.thingspeak.com".into(),
//!     port: 1883,
//!     credentials: Some(Credentials::new("device-user", "device-pass")),
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Host fragment that identifies the ThingSpeak broker.
const THINGSPEAK_MARKER: &str = "thingspeak";

/// Main MQTT connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Broker hostname or IP address.
    ///
    /// Also decides the broker identity: any host containing `thingspeak`
    /// (case-insensitive) gets the ThingSpeak topic and payload layout.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port number (1883 plain, 8883 TLS).
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// Client identifier presented in CONNECT.
    ///
    /// Empty means "derive one": the username for ThingSpeak brokers,
    /// otherwise a station-scoped identifier chosen by the caller.
    #[validate(length(max = 64, message = "Client ID must not exceed 64 characters"))]
    pub client_id: String,

    /// Whether to request a clean session from the broker.
    pub clean_session: bool,

    /// Capacity of the client request channel.
    #[validate(range(
        min = 1,
        max = 255,
        message = "Request channel capacity must be between 1 and 255"
    ))]
    pub request_channel_capacity: Option<u8>,

    /// Optional username/password pair.
    ///
    /// When absent the persistent transport is never used and every reading
    /// goes over HTTP.
    #[validate(nested)]
    pub credentials: Option<Credentials>,

    /// Seconds to wait for the CONNACK after the handshake is started.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect wait must be between 1 and 60 seconds"
    ))]
    pub connect_wait: u64,

    /// Seconds allowed for the TCP reachability probe.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Probe timeout must be between 1 and 60 seconds"
    ))]
    pub probe_timeout: u64,

    /// Connection attempts allowed for the lifetime of the process.
    #[validate(range(
        min = 1,
        max = 100,
        message = "Max connect attempts must be between 1 and 100"
    ))]
    pub max_connect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "mqtt3.thingspeak.com".to_string(),
            port: 1883,
            keep_alive: 60,
            client_id: String::new(),
            clean_session: true,
            request_channel_capacity: Some(10),
            credentials: None,
            connect_wait: 3,
            probe_timeout: 5,
            max_connect_attempts: 3,
        }
    }
}

impl Config {
    /// True when the broker host identifies as ThingSpeak.
    pub fn is_thingspeak(&self) -> bool {
        self.host.to_lowercase().contains(THINGSPEAK_MARKER)
    }

    /// True when a username/password pair is configured.
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn connect_wait(&self) -> Duration {
        Duration::from_secs(self.connect_wait)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    /// `host:port` for log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opaque broker credentials.
#[derive(Clone, Serialize, Deserialize, Validate, Default)]
pub struct Credentials {
    #[validate(length(min = 1, message = "Username must not be empty"))]
    pub username: String,

    #[validate(length(min = 1, message = "Password must not be empty"))]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keeps the password out of `{:?}` dumps of the configuration.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}
