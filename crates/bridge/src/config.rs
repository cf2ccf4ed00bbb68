//! Bridge configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub bridge: BridgeSettings,
    pub usb: UsbSettings,
    #[serde(default)]
    pub serial: SerialSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID patterns limiting which devices the bridge exposes
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Per-iteration read timeout for the pump thread
    #[serde(default = "SerialSettings::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Capacity of each event stream (hotplug and per-session data)
    #[serde(default = "SerialSettings::default_event_buffer")]
    pub event_buffer: usize,
    /// Port index used when a create request does not name one
    #[serde(default)]
    pub default_port: usize,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: Self::default_read_timeout_ms(),
            event_buffer: Self::default_event_buffer(),
            default_port: 0,
        }
    }
}

impl SerialSettings {
    fn default_read_timeout_ms() -> u64 {
        50
    }

    fn default_event_buffer() -> usize {
        256
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeSettings {
                log_level: "info".to_string(),
            },
            usb: UsbSettings {
                filters: Vec::new(),
            },
            serial: SerialSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-serial-bridge/bridge.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: BridgeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-serial-bridge").join("bridge.toml")
        } else {
            PathBuf::from(".config/usb-serial-bridge/bridge.toml")
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.bridge.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.bridge.log_level,
                valid_levels.join(", ")
            ));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        if self.serial.read_timeout_ms == 0 {
            return Err(anyhow!("read_timeout_ms must be greater than 0"));
        }
        if self.serial.event_buffer == 0 {
            return Err(anyhow!("event_buffer must be greater than 0"));
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);

        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }
        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        if !id.starts_with("0x") && !id.starts_with("0X") {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
                name,
                id
            ));
        }

        let hex_part = &id[2..];
        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.bridge.log_level, "info");
        assert!(config.usb.filters.is_empty());
        assert_eq!(config.serial.read_timeout_ms, 50);
        assert_eq!(config.serial.event_buffer, 256);
        assert_eq!(config.serial.default_port, 0);
    }

    #[test]
    fn test_validate_filter_valid() {
        assert!(BridgeConfig::validate_filter("0x1234:0x5678").is_ok());
        assert!(BridgeConfig::validate_filter("0x1234:*").is_ok());
        assert!(BridgeConfig::validate_filter("*:0x5678").is_ok());
        assert!(BridgeConfig::validate_filter("*:*").is_ok());
        assert!(BridgeConfig::validate_filter("0xABCD:0xEF01").is_ok());
    }

    #[test]
    fn test_validate_filter_invalid() {
        assert!(BridgeConfig::validate_filter("1234:5678").is_err());
        assert!(BridgeConfig::validate_filter("0x1234").is_err());
        assert!(BridgeConfig::validate_filter("0x1234:0x5678:0x9abc").is_err());
        assert!(BridgeConfig::validate_filter("0xGHIJ:0x5678").is_err());
        assert!(BridgeConfig::validate_filter("0x12345:0x5678").is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = BridgeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: BridgeConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.bridge.log_level, parsed.bridge.log_level);
        assert_eq!(config.serial.read_timeout_ms, parsed.serial.read_timeout_ms);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = BridgeConfig::default();
        assert!(config.validate().is_ok());

        config.bridge.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.bridge.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_serial_settings() {
        let mut config = BridgeConfig::default();
        config.serial.read_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.serial.read_timeout_ms = 50;
        config.serial.event_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");

        let mut config = BridgeConfig::default();
        config.usb.filters.push("0x1a86:*".to_string());
        config.serial.read_timeout_ms = 25;
        config.save(&path).unwrap();

        let loaded = BridgeConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.usb.filters, vec!["0x1a86:*".to_string()]);
        assert_eq!(loaded.serial.read_timeout_ms, 25);
    }

    #[test]
    fn test_load_rejects_invalid_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");

        let content = r#"
            [bridge]
            log_level = "info"

            [usb]
            filters = ["1a86:7523"]
        "#;
        fs::write(&path, content).unwrap();

        assert!(BridgeConfig::load(Some(path)).is_err());
    }
}
