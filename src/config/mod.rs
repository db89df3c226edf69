//! Application configuration loading, validation, and management.
//!
//! This module provides the top-level `Config` structure that aggregates
//! logging, ThingSpeak channel, MQTT transport and station settings. It
//! handles locating the TOML file, parsing, and validation.
//!
//! The configuration is loaded once at startup, before the tracing
//! subscriber exists, and is passed down explicitly afterwards.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::{channel::ChannelConfig, logger::LoggerConfig, station::StationConfig};

pub mod channel;
pub mod logger;
pub mod station;

/// MQTT broker settings live in the transport crate.
pub type TransportConfig = envstation_mqtt::Config;

/// Environment variable that points at the configuration file.
pub const CONFIG_ENV: &str = "ENVSTATION_CONFIG";

const LOCAL_CONFIG: &str = "config.toml";
const SYSTEM_CONFIG: &str = "/etc/envstation/config.toml";

/// Timestamp used by the `print_*` macros.
#[doc(hidden)]
pub fn early_timestamp() -> String {
    let format = time::macros::format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
    );
    time::OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_default()
}

/// Simple macros for printing timestamped messages before the tracing subscriber
/// is initialized. These are used during early configuration loading.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {{
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {{
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {{
        eprintln!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    }};
}

/// Errors that can occur during configuration loading, parsing, or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    /// Validation failure after successful parsing.
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// ThingSpeak channel identity, API keys and HTTP settings.
    #[validate(nested)]
    pub channel: ChannelConfig,

    /// Persistent MQTT broker settings.
    #[validate(nested)]
    pub transport: TransportConfig,

    #[validate(nested)]
    pub station: StationConfig,
}

impl Config {
    /// Locates and loads the configuration file.
    ///
    /// `explicit` is the `--config` command line value, if any.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the configuration file cannot be found,
    /// read, parsed, or validated.
    pub fn new(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_ENV).ok();
        let config_path = Self::get_config_path(explicit, env_path.as_deref())?;
        Self::load(&config_path)
    }

    /// Determines the configuration file path.
    ///
    /// Priority:
    /// 1. `--config` flag
    /// 2. `ENVSTATION_CONFIG` environment variable
    /// 3. `./config.toml`
    /// 4. `/etc/envstation/config.toml`
    fn get_config_path(
        explicit: Option<&Path>,
        env_path: Option<&str>,
    ) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            print_info!("Using config from --config: {}", path.display());
            return Ok(path.to_path_buf());
        }

        if let Some(path) = env_path {
            let path = PathBuf::from(path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(path);
        }

        for candidate in [LOCAL_CONFIG, SYSTEM_CONFIG] {
            let path = Path::new(candidate);
            if path.exists() {
                print_info!("Using default config path: {}", path.display());
                return Ok(path.to_path_buf());
            }
        }

        Err(ConfigError::Config(format!(
            "No configuration file found (tried --config, {}, ./{}, {})",
            CONFIG_ENV, LOCAL_CONFIG, SYSTEM_CONFIG
        )))
    }

    /// Loads and validates configuration from the specified path.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "File not found: {}",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        let config = Self::from_toml(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates configuration text.
    pub fn from_toml(text: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(config)
    }
}
