//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use can_mqtt_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// DBC file with the signal definitions (relative to the config file)
    pub dbc_file: PathBuf,
    pub can: CanConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanConfig {
    /// SocketCAN interface name, e.g. `can0` or `vcan0`
    pub interface: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "can-mqtt-bridge".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

impl AppConfig {
    /// Check the settings the bridge cannot start without
    pub fn validate(&self) -> Result<()> {
        if self.can.interface.trim().is_empty() {
            bail!("[can] interface must not be empty");
        }
        if self.mqtt.host.trim().is_empty() {
            bail!("[mqtt] host must not be empty");
        }
        if self.mqtt.password.is_some() && self.mqtt.username.is_none() {
            bail!("[mqtt] password given without username");
        }
        self.bridge.validate().context("Invalid [bridge] section")?;
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    if config.dbc_file.is_relative() {
        if let Some(dir) = path.parent() {
            config.dbc_file = dir.join(&config.dbc_file);
        }
    }

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_mqtt_bridge::{NamingConvention, UnknownFramePolicy};

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            dbc_file = "vehicle.dbc"

            [can]
            interface = "vcan0"

            [mqtt]
            host = "localhost"

            [bridge]
            topic-prefix = "vehicle/rx"
            naming-convention = "by-id"
            unknown-frame-policy = "drop"
            publish-on-change = true
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.can.interface, "vcan0");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.client_id, "can-mqtt-bridge");
        assert_eq!(config.bridge.topic_prefix, "vehicle/rx");
        assert_eq!(config.bridge.command_prefix, "can/send");
        assert_eq!(config.bridge.naming_convention, NamingConvention::ById);
        assert_eq!(config.bridge.unknown_frame_policy, UnknownFramePolicy::Drop);
        assert!(config.bridge.publish_on_change);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bridge_section_is_optional() {
        let toml_content = r#"
            dbc_file = "vehicle.dbc"

            [can]
            interface = "can0"

            [mqtt]
            host = "broker.local"
            port = 8883
            username = "bridge"
            password = "secret"
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.bridge, BridgeConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let toml_content = r#"
            dbc_file = "vehicle.dbc"

            [can]
            interface = ""

            [mqtt]
            host = "localhost"

            [bridge]
            qos = 3
        "#;

        let mut config: AppConfig = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_err());

        config.can.interface = "can0".to_string();
        assert!(config.validate().is_err());

        config.bridge.qos = 1;
        assert!(config.validate().is_ok());
    }
}
