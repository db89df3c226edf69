//! ThingSpeak channel settings (`[channel]` table).
//!
//! The channel id and both API keys are required: a configuration without
//! them fails validation and the process refuses to start.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ChannelConfig {
    #[validate(length(min = 1, message = "channel_id is required"))]
    pub channel_id: String,

    /// Key used by the station to publish (MQTT topic and HTTP update).
    #[validate(length(min = 1, message = "write_api_key is required"))]
    pub write_api_key: String,

    /// Key used by the `latest` and `history` commands.
    #[validate(length(min = 1, message = "read_api_key is required"))]
    pub read_api_key: String,

    /// Base URL of the HTTP API, without a trailing slash.
    #[validate(custom(function = "validate_rest_url"))]
    pub rest_url: String,

    /// Per-request timeout in seconds for every HTTP call.
    #[validate(range(
        min = 1,
        max = 120,
        message = "Request timeout must be between 1 and 120 seconds"
    ))]
    pub request_timeout: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            channel_id: String::new(),
            write_api_key: String::new(),
            read_api_key: String::new(),
            rest_url: "https://api.thingspeak.com".to_string(),
            request_timeout: 10,
        }
    }
}

impl ChannelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Base URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.rest_url.trim_end_matches('/')
    }
}

fn validate_rest_url(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(());
    }
    let mut err = ValidationError::new("invalid_rest_url");
    err.message = Some(format!("REST URL must start with http:// or https://: {}", url).into());
    Err(err)
}
