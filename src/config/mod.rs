//! Configuration management.
//!
//! Meshops reads a TOML file with three sections:
//!
//! - [`ConsoleConfig`] - collection windows, timeouts and rendering tunables
//! - [`MqttConfig`] - broker connection details, surfaced in the banner and
//!   handed to whatever transport bridge drives the link backend
//! - [`LoggingConfig`] - level and optional log file
//!
//! All values have working defaults; `meshops init` writes them out as a
//! starter file.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Broadcast collection stops after this many seconds of silence.
    pub silence_timeout_secs: u64,
    /// How long to wait for a gateway acknowledgement.
    pub ack_timeout_secs: u64,
    /// Countdown handed to nodes in the packed update sequence. The update
    /// sweep waits twice this long for silence.
    pub update_countdown_secs: u16,
    /// Pre-seeded hop-count buckets in the ping histogram.
    pub histogram_base_size: u32,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            silence_timeout_secs: 10,
            ack_timeout_secs: 10,
            update_countdown_secs: 30,
            histogram_base_size: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Plaintext connection; for bench setups only.
    #[serde(default)]
    pub force_unsecure: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            username: "mqttmasteruser".to_string(),
            force_unsecure: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("meshops.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            console: ConsoleConfig::default(),
            mqtt: MqttConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.console.silence_timeout_secs, 10);
        assert_eq!(config.console.update_countdown_secs, 30);
        assert_eq!(config.console.histogram_base_size, 20);
        assert_eq!(config.mqtt.port, 8883);
        assert!(!config.mqtt.force_unsecure);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [console]
            silence_timeout_secs = 3
            ack_timeout_secs = 5
            update_countdown_secs = 10
            histogram_base_size = 8

            [mqtt]
            host = "broker.example"
            port = 1883
            username = "op"
            "#,
        )
        .unwrap();
        assert_eq!(config.console.silence_timeout_secs, 3);
        assert_eq!(config.mqtt.host, "broker.example");
        // unset sections come from defaults
        assert_eq!(config.logging.level, "info");
        assert!(!config.mqtt.force_unsecure);
    }

    #[tokio::test]
    async fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.console.ack_timeout_secs, 10);
        assert_eq!(loaded.logging.file.as_deref(), Some("meshops.log"));
    }
}
