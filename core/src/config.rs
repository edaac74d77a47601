//! Breaker configuration, validation and serialized loaders

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Reasons a configuration is rejected
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failure_threshold must be greater than 0")]
    ZeroFailureThreshold,
    #[error("reset_timeout must be greater than 0")]
    ZeroResetTimeout,
    #[error("execution_timeout must be greater than 0 when set")]
    ZeroExecutionTimeout,
    #[error("jitter_factor must be within [0, 1], got {0}")]
    JitterOutOfRange(f64),
    #[error("invalid duration {value:?} for {field}: {reason}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Qualifying failures needed to trip the breaker
    pub failure_threshold: u32,

    /// How long the breaker stays Open before probing
    pub reset_timeout: Duration,

    /// Maximum run time of a protected call; `None` enforces no timeout.
    /// A caller-supplied deadline always takes precedence.
    pub execution_timeout: Option<Duration>,

    /// Trailing interval in which failures count; zero counts without bound
    pub window_size: Duration,

    /// Status codes that qualify as failures; empty means every error does
    pub failure_codes: Vec<i64>,

    /// Jitter applied to `reset_timeout` on each trip (0.0 = none, 1.0 = full)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            execution_timeout: None,
            window_size: Duration::ZERO,
            failure_codes: Vec::new(),
            jitter_factor: 0.0,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.reset_timeout.is_zero() {
            return Err(ConfigError::ZeroResetTimeout);
        }
        if self.execution_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroExecutionTimeout);
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterOutOfRange(self.jitter_factor));
        }
        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(document)?;
        raw.into_config()
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(document: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(document)?;
        raw.into_config()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }
}

/// Document shape shared by the JSON and YAML loaders
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    failure_threshold: Option<u32>,
    reset_timeout: Option<String>,
    execution_timeout: Option<String>,
    window_size: Option<String>,
    failure_codes: Vec<i64>,
    jitter_factor: Option<f64>,
}

impl RawConfig {
    fn into_config(self) -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let field = |name, value: Option<String>| {
            value
                .map(|v| parse_duration(name, &v))
                .transpose()
        };

        let config = Config {
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            reset_timeout: field("reset_timeout", self.reset_timeout)?
                .unwrap_or(defaults.reset_timeout),
            execution_timeout: field("execution_timeout", self.execution_timeout)?,
            window_size: field("window_size", self.window_size)?.unwrap_or(defaults.window_size),
            failure_codes: self.failure_codes,
            jitter_factor: self.jitter_factor.unwrap_or(defaults.jitter_factor),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Parse a duration such as `"3s"`, `"250ms"`, `"1m30s"` or `"1.5h"`
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `"0"` is
/// accepted; negative durations are not.
pub fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
        reason,
    };

    let text = value.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err(invalid("empty duration"));
    }
    if text.starts_with('-') {
        return Err(invalid("negative duration"));
    }
    let mut rest = text.strip_prefix('+').unwrap_or(text);

    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };
        rest = &rest[unit_len..];

        total_nanos += number * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(invalid("duration out of range"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
