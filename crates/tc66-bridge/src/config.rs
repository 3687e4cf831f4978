//! Bridge configuration.
//!
//! Settings come from an optional TOML file and are then overridden by
//! command-line arguments. A complete file looks like this:
//!
//! ```toml
//! [device]
//! address = "AA:BB:CC:DD:EE:FF"
//! alias = "bench"
//! connect_timeout_secs = 30
//! discovery_timeout_secs = 15
//!
//! [mqtt]
//! broker = "localhost:1883"
//! namespace = "tc66c"
//! qos = 0
//! retain = false
//!
//! [polling]
//! interval_ms = 2000
//! skip_failed_cycles = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mqtt::BrokerAddress;

/// Bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Meter settings.
    pub device: DeviceConfig,
    /// Broker settings.
    pub mqtt: MqttConfig,
    /// Poll loop settings.
    pub polling: PollingConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file yields the defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - A device address and a broker are present
    /// - The broker address parses
    /// - The alias and namespace are usable as topic segments
    /// - Timeouts are non-zero and QoS is 0, 1 or 2
    ///
    /// # Example
    ///
    /// ```
    /// use tc66_bridge::Config;
    ///
    /// let mut config = Config::default();
    /// assert!(config.validate().is_err());
    ///
    /// config.device.address = "AA:BB:CC:DD:EE:FF".to_string();
    /// config.mqtt.broker = "localhost".to_string();
    /// config.validate().expect("config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.device.validate());
        errors.extend(self.mqtt.validate());
        errors.extend(self.polling.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Topic segment identifying the meter.
    ///
    /// The configured alias if there is one, otherwise the lower-cased device
    /// address. Either way the value is passed through [`sanitize_alias`].
    pub fn alias(&self) -> String {
        match &self.device.alias {
            Some(alias) => sanitize_alias(alias),
            None => sanitize_alias(&self.device.address.to_lowercase()),
        }
    }

    /// MQTT client identifier.
    pub fn client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("tc66-bridge-{}", self.alias()))
    }
}

/// Meter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Bluetooth address (or platform identifier on macOS).
    pub address: String,
    /// Topic alias for the meter.
    pub alias: Option<String>,
    /// Seconds to wait for the meter to appear, and again for it to connect.
    pub connect_timeout_secs: u64,
    /// Seconds allowed for service discovery and characteristic resolution.
    pub discovery_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            alias: None,
            connect_timeout_secs: 30,
            discovery_timeout_secs: 15,
        }
    }
}

impl DeviceConfig {
    /// Validate device configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.address.trim().is_empty() {
            errors.push(ValidationError::new(
                "device.address",
                "device address is required",
            ));
        }

        if let Some(alias) = &self.alias
            && sanitize_alias(alias).trim_matches('_').is_empty()
        {
            errors.push(ValidationError::new(
                "device.alias",
                format!("alias '{}' contains no word characters", alias),
            ));
        }

        if self.connect_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "device.connect_timeout_secs",
                "timeout must be greater than 0",
            ));
        }
        if self.discovery_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "device.discovery_timeout_secs",
                "timeout must be greater than 0",
            ));
        }

        errors
    }

    /// Time allowed for the meter to appear and accept a connection.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Time allowed for service discovery and characteristic resolution.
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

/// MQTT settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker address: `host[:port]`, `tcp://host[:port]` or `mqtt://host[:port]`.
    pub broker: String,
    /// First topic segment.
    pub namespace: String,
    /// Client identifier (default: `tc66-bridge-<alias>`).
    pub client_id: Option<String>,
    /// Quality of service (0, 1 or 2).
    pub qos: u8,
    /// Publish with the retain flag.
    pub retain: bool,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// Seconds to wait for the broker to acknowledge the connection.
    pub connect_timeout_secs: u64,
    /// Seconds allowed for each publish.
    pub publish_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            namespace: "tc66c".to_string(),
            client_id: None,
            qos: 0,
            retain: false,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            publish_timeout_secs: 5,
        }
    }
}

impl MqttConfig {
    /// Validate MQTT configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.broker.trim().is_empty() {
            errors.push(ValidationError::new("mqtt.broker", "broker is required"));
        } else if let Err(e) = self.broker.parse::<BrokerAddress>() {
            errors.push(ValidationError::new(
                "mqtt.broker",
                format!("invalid broker '{}': {}", self.broker, e),
            ));
        }

        if self.namespace.is_empty() {
            errors.push(ValidationError::new(
                "mqtt.namespace",
                "namespace cannot be empty",
            ));
        } else if self.namespace.contains(['#', '+']) {
            errors.push(ValidationError::new(
                "mqtt.namespace",
                format!("namespace '{}' contains a topic wildcard", self.namespace),
            ));
        }

        if let Some(id) = &self.client_id
            && id.is_empty()
        {
            errors.push(ValidationError::new(
                "mqtt.client_id",
                "client id cannot be empty string (omit it instead)",
            ));
        }

        if self.qos > 2 {
            errors.push(ValidationError::new(
                "mqtt.qos",
                format!("QoS {} is invalid (must be 0, 1 or 2)", self.qos),
            ));
        }

        if self.connect_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "mqtt.connect_timeout_secs",
                "timeout must be greater than 0",
            ));
        }
        if self.publish_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "mqtt.publish_timeout_secs",
                "timeout must be greater than 0",
            ));
        }

        errors
    }

    /// MQTT keep-alive interval.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Time allowed for the broker to acknowledge the connection.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Time allowed for each publish, including time queued during an outage.
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

/// Poll loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Target cycle length in milliseconds; 0 polls back to back.
    pub interval_ms: u64,
    /// Milliseconds allowed for a complete response frame.
    pub response_timeout_ms: u64,
    /// Milliseconds allowed for each notification toggle and write.
    pub operation_timeout_ms: u64,
    /// Log and continue after a response timeout or framing error.
    pub skip_failed_cycles: bool,
    /// Stop after this many cycles.
    pub max_cycles: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            response_timeout_ms: 5000,
            operation_timeout_ms: 5000,
            skip_failed_cycles: false,
            max_cycles: None,
        }
    }
}

impl PollingConfig {
    /// Validate poll loop configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.response_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "polling.response_timeout_ms",
                "timeout must be greater than 0",
            ));
        }
        if self.operation_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "polling.operation_timeout_ms",
                "timeout must be greater than 0",
            ));
        }
        if self.max_cycles == Some(0) {
            errors.push(ValidationError::new(
                "polling.max_cycles",
                "max cycles must be at least 1 (omit it to poll forever)",
            ));
        }

        errors
    }

    /// Target cycle length.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Time allowed for a complete measurement response.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Time allowed for each GATT operation and each shutdown disconnect.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `mqtt.broker`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Make `raw` safe for use as a topic segment.
///
/// Every run of characters other than ASCII letters, digits and `_` is
/// collapsed into a single `_`. Case is preserved.
///
/// ```
/// use tc66_bridge::config::sanitize_alias;
///
/// assert_eq!(sanitize_alias("aa:bb:cc:dd:ee:ff"), "aa_bb_cc_dd_ee_ff");
/// assert_eq!(sanitize_alias("Bench #2"), "Bench_2");
/// ```
pub fn sanitize_alias(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tc66-bridge")
        .join("config.toml")
}
