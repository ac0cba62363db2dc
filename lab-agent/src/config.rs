//! Agent configuration from environment variables.
//!
//! | Variable                   | Meaning                                   |
//! |----------------------------|-------------------------------------------|
//! | `SERIAL_PORT`              | default capture port                      |
//! | `SERIAL_BAUDRATE`          | default baud rate (`SERIAL_BAUD` accepted) |
//! | `LOG_DIR`                  | directory for sink files                  |
//! | `DEVICE_FILTERS`           | `vid:pid,...` allow list for `devices`    |
//! | `CAPTURE_READ_TIMEOUT_MS`  | bounded wait per serial read              |
//! | `CAPTURE_STOP_TIMEOUT_MS`  | how long `stop` waits for the loop        |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serial_capture_core::CaptureConfiguration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub capture: CaptureConfiguration,
    pub device_filters: Option<String>,
    /// Environment variables that overrode a default, for the startup log.
    pub env_overrides: Vec<&'static str>,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut capture = CaptureConfiguration::default();
        let mut device_filters = None;
        let mut env_overrides = Vec::new();

        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SERIAL_PORT") {
            capture.default_port = Some(v.trim().to_string());
            env_overrides.push("SERIAL_PORT");
        }
        for var in ["SERIAL_BAUD", "SERIAL_BAUDRATE"] {
            if let Some(v) = get(var) {
                capture.default_baud_rate = parse_number(var, &v)?;
                env_overrides.push(var);
            }
        }
        if let Some(v) = get("LOG_DIR") {
            capture.log_directory = PathBuf::from(v.trim());
            env_overrides.push("LOG_DIR");
        }
        if let Some(v) = get("DEVICE_FILTERS") {
            device_filters = Some(v);
            env_overrides.push("DEVICE_FILTERS");
        }
        if let Some(v) = get("CAPTURE_READ_TIMEOUT_MS") {
            capture.read_timeout = Duration::from_millis(parse_number("CAPTURE_READ_TIMEOUT_MS", &v)?);
            env_overrides.push("CAPTURE_READ_TIMEOUT_MS");
        }
        if let Some(v) = get("CAPTURE_STOP_TIMEOUT_MS") {
            capture.stop_timeout = Duration::from_millis(parse_number("CAPTURE_STOP_TIMEOUT_MS", &v)?);
            env_overrides.push("CAPTURE_STOP_TIMEOUT_MS");
        }

        capture.validate().map_err(ConfigError::Invalid)?;

        Ok(Self {
            capture,
            device_filters,
            env_overrides,
        })
    }
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
