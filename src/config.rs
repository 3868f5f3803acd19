// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon configuration.
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! [global]
//! socket_path = "/run/bluewalker/measurements.sock"
//! min_interval_secs = 60
//! verbosity = "info"          # optional, default "off"
//!
//! [mqtt]
//! broker = "localhost:1883"
//! topic = "sensors"
//!
//! [influx]
//! url = "http://localhost:8086"
//! token = "..."
//! bucket = "telemetry"
//! org = "home"
//! ```
//!
//! Every key except `verbosity` is required; a missing file or key fails
//! startup before any socket is opened.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub global: GlobalConfig,
    pub mqtt: MqttConfig,
    pub influx: InfluxConfig,
}

/// Ingestion socket and rate-limit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Filesystem path of the Unix stream socket the scanner writes to.
    pub socket_path: PathBuf,

    /// Minimum interval between accepted records per device, in seconds.
    pub min_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error, off).
    #[serde(default = "default_verbosity")]
    pub verbosity: String,
}

fn default_verbosity() -> String {
    "off".to_string()
}

/// MQTT sink settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker address as `host` or `host:port` (default port 1883).
    pub broker: String,

    /// Base topic; records publish to `<topic>/<device-address>`.
    pub topic: String,
}

/// InfluxDB v2 sink settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    /// InfluxDB URL (e.g., "http://localhost:8086").
    pub url: String,
    /// Authentication token.
    pub token: String,
    /// Target bucket.
    pub bucket: String,
    /// Organization.
    pub org: String,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("global.socket_path is empty".into()));
        }
        if self.mqtt.broker.is_empty() {
            return Err(ConfigError::Invalid("mqtt.broker is empty".into()));
        }
        if self.mqtt.topic.is_empty() {
            return Err(ConfigError::Invalid("mqtt.topic is empty".into()));
        }
        if self.influx.url.is_empty() {
            return Err(ConfigError::Invalid("influx.url is empty".into()));
        }
        Ok(())
    }

    /// Minimum accept interval as a [`Duration`].
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.global.min_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_TOML: &str = r#"
[global]
socket_path = "/run/bluewalker/measurements.sock"
min_interval_secs = 60
verbosity = "debug"

[mqtt]
broker = "broker.local:1883"
topic = "sensors"

[influx]
url = "http://localhost:8086"
token = "test-token"
bucket = "telemetry"
org = "home"
"#;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(FULL_TOML).expect("parse");
        config.validate().expect("valid");

        assert_eq!(
            config.global.socket_path,
            PathBuf::from("/run/bluewalker/measurements.sock")
        );
        assert_eq!(config.min_interval(), Duration::from_secs(60));
        assert_eq!(config.global.verbosity, "debug");
        assert_eq!(config.mqtt.broker, "broker.local:1883");
        assert_eq!(config.mqtt.topic, "sensors");
        assert_eq!(config.influx.bucket, "telemetry");
        assert_eq!(config.influx.org, "home");
    }

    #[test]
    fn test_verbosity_defaults_to_off() {
        let toml_str = FULL_TOML.replace("verbosity = \"debug\"\n", "");
        let config: Config = toml::from_str(&toml_str).expect("parse");
        assert_eq!(config.global.verbosity, "off");
    }

    #[test]
    fn test_missing_required_key_names_the_key() {
        let toml_str = FULL_TOML.replace("min_interval_secs = 60\n", "");
        let err = toml::from_str::<Config>(&toml_str).unwrap_err();
        assert!(err.to_string().contains("min_interval_secs"));
    }

    #[test]
    fn test_missing_section_is_an_error() {
        let toml_str = r#"
[global]
socket_path = "/tmp/x.sock"
min_interval_secs = 1
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_empty_broker_rejected() {
        let toml_str = FULL_TOML.replace("broker = \"broker.local:1883\"", "broker = \"\"");
        let config: Config = toml::from_str(&toml_str).expect("parse");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mqtt.broker"));
    }

    #[test]
    fn test_from_file_missing_file() {
        let err = Config::from_file("/nonexistent/bluesink.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
