//! Bridge configuration
//!
//! Loaded from TOML (or JSON, by file extension). Every section has defaults,
//! so a config file only needs the keys it changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::bridge::BridgeSettings;
use crate::frame::MacAddress;
use crate::radio::PromiscuousFilter;
use crate::{BridgeError, Result, DEFAULT_QUEUE_CAPACITY};

/// Main bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub general: GeneralConfig,
    pub logging: LoggingConfig,
    pub queue: QueueConfig,
    pub bridge: LoopConfig,
    pub transport: TransportConfig,
    pub radio: RadioConfig,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Instance name used in logs
    pub name: String,
    /// Interval between statistics reports, 0 disables them
    pub stats_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
}

/// Frame queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Slots per direction
    pub capacity: usize,
}

/// Polling loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Upper bound on one block channel transaction (ms)
    pub exchange_timeout_ms: u64,
    /// Pause between transactions (ms)
    pub poll_interval_ms: u64,
    /// Inbound payloads longer than this are injected as radio frames
    pub inject_threshold: usize,
}

/// Block channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address the channel emulation listens on
    pub listen: String,
}

/// Radio backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Address receiving captured frames
    pub bind: String,
    /// Where injected frames are sent; injection is disabled when unset
    pub inject_peer: Option<String>,
    /// Station interface address
    pub mac_address: String,
    /// Frame kinds passed up by the capture backend
    pub filter: PromiscuousFilter,
}

/// Configuration validation result
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: "radiolink-bridge".to_string(),
            stats_interval_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        let settings = BridgeSettings::default();
        Self {
            exchange_timeout_ms: settings.exchange_timeout.as_millis() as u64,
            poll_interval_ms: settings.poll_interval.as_millis() as u64,
            inject_threshold: settings.inject_threshold,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7700".to_string(),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7701".to_string(),
            inject_peer: Some("127.0.0.1:7702".to_string()),
            mac_address: "02:00:00:00:00:01".to_string(),
            filter: PromiscuousFilter::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a `.toml` or `.json` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config file: {}", e)))?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| BridgeError::Config(format!("Failed to parse JSON config: {}", e))),
            Some("toml") | None => Self::from_toml(&content),
            Some(other) => Err(BridgeError::Config(format!("Unsupported config file format: {}", other))),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BridgeError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Save configuration as TOML
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.queue.capacity == 0 {
            result.errors.push("Queue capacity cannot be 0".to_string());
        } else if self.queue.capacity > 1024 {
            result
                .warnings
                .push(format!("Queue capacity {} is unusually large", self.queue.capacity));
        }

        if self.bridge.exchange_timeout_ms == 0 {
            result.errors.push("Exchange timeout cannot be 0".to_string());
        }
        if self.bridge.poll_interval_ms == 0 {
            result
                .warnings
                .push("Poll interval is 0, the loop will only yield between transactions".to_string());
        }

        if let Err(e) = self.transport_addr() {
            result.errors.push(e.to_string());
        }
        if let Err(e) = self.radio_bind_addr() {
            result.errors.push(e.to_string());
        }
        match self.inject_peer_addr() {
            Ok(None) => result
                .warnings
                .push("No radio inject peer, inbound frames will be dropped".to_string()),
            Ok(Some(_)) => {}
            Err(e) => result.errors.push(e.to_string()),
        }
        if let Err(e) = self.mac_address() {
            result.errors.push(e.to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            result.errors.push(format!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        result.valid = result.errors.is_empty();
        result
    }

    pub fn transport_addr(&self) -> Result<SocketAddr> {
        parse_addr("transport.listen", &self.transport.listen)
    }

    pub fn radio_bind_addr(&self) -> Result<SocketAddr> {
        parse_addr("radio.bind", &self.radio.bind)
    }

    pub fn inject_peer_addr(&self) -> Result<Option<SocketAddr>> {
        self.radio
            .inject_peer
            .as_deref()
            .map(|peer| parse_addr("radio.inject_peer", peer))
            .transpose()
    }

    pub fn mac_address(&self) -> Result<MacAddress> {
        self.radio.mac_address.parse()
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            exchange_timeout: Duration::from_millis(self.bridge.exchange_timeout_ms),
            poll_interval: Duration::from_millis(self.bridge.poll_interval_ms),
            inject_threshold: self.bridge.inject_threshold,
        }
    }
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| BridgeError::Config(format!("Invalid {} address '{}': {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.queue.capacity, 10);
        assert_eq!(config.bridge.exchange_timeout_ms, 500);
        assert_eq!(config.bridge.poll_interval_ms, 1);
        assert_eq!(config.bridge.inject_threshold, 24);

        let result = config.validate();
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = BridgeConfig::default();
        config.queue.capacity = 0;
        config.bridge.exchange_timeout_ms = 0;
        config.radio.mac_address = "not-a-mac".to_string();
        config.transport.listen = "nowhere".to_string();
        config.logging.level = "loud".to_string();

        let result = config.validate();
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 5);
    }

    #[test]
    fn test_missing_inject_peer_warns() {
        let mut config = BridgeConfig::default();
        config.radio.inject_peer = None;

        let result = config.validate();
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(config.inject_peer_addr().unwrap(), None);
    }

    #[test]
    fn test_partial_toml() {
        let config = BridgeConfig::from_toml(
            r#"
            [queue]
            capacity = 4

            [radio]
            mac_address = "24:0a:c4:11:22:33"

            [radio.filter]
            management = true
            control = false
            data = true
            misc = false
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.capacity, 4);
        assert_eq!(config.bridge.exchange_timeout_ms, 500);
        assert_eq!(config.mac_address().unwrap().to_string(), "24:0a:c4:11:22:33");
        assert!(!config.radio.filter.control);
        assert_eq!(config.radio.bind, "127.0.0.1:7701");
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = BridgeConfig::default();
        config.general.name = "bench".to_string();
        config.bridge.poll_interval_ms = 5;

        let text = config.to_toml().unwrap();
        let parsed = BridgeConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.general.name, "bench");
        assert_eq!(parsed.bridge_settings().poll_interval, Duration::from_millis(5));
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("radiolink-bridge-{}.toml", std::process::id()));
        BridgeConfig::default().to_file(&path).unwrap();

        let loaded = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.transport.listen, "127.0.0.1:7700");
        std::fs::remove_file(&path).unwrap();

        assert!(BridgeConfig::from_file("/nonexistent/bridge.toml").is_err());
    }
}
