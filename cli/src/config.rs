// Configuration management for the DeskBridge CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/deskbridge/config.json
// - Linux: ~/.config/deskbridge/config.json
// - Windows: %APPDATA%\deskbridge\config.json

use anyhow::{Context, Result};
use deskbridge_core::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CIPHER_SECRET: &str = "my_secret_16byte";
pub const DEFAULT_MAC_SECRET: &str = "my_hmac_secret_key";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Companion name from the last pairing
    pub hostname: Option<String>,

    /// Encrypt command bodies (signing is always on)
    pub encryption: bool,

    /// Pairing secret for the body cipher
    pub cipher_secret: String,

    /// Pairing secret for packet signatures
    pub mac_secret: String,

    /// Outbox location; defaults to the data directory
    pub storage_path: Option<String>,

    /// Newest chat message already synced, unix millis
    pub last_chat_sync_ms: i64,

    /// Peer address and timings
    pub transport: TransportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: None,
            encryption: true,
            cipher_secret: DEFAULT_CIPHER_SECRET.to_string(),
            mac_secret: DEFAULT_MAC_SECRET.to_string(),
            storage_path: None,
            last_chat_sync_ms: 0,
            transport: TransportConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("deskbridge");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("deskbridge");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it on first use
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Where the outbox database lives
    pub fn outbox_path(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("outbox")),
        }
    }

    /// Set a config value in memory; the caller saves
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "peer_ip" => {
                self.transport.peer_ip = value.parse().context("Invalid IP address")?;
            }
            "hostname" => {
                self.hostname = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "encryption" => {
                self.encryption = value.parse().context("Invalid boolean value")?;
            }
            "cipher_secret" => {
                anyhow::ensure!(!value.is_empty(), "Secret must not be empty");
                self.cipher_secret = value.to_string();
            }
            "mac_secret" => {
                anyhow::ensure!(!value.is_empty(), "Secret must not be empty");
                self.mac_secret = value.to_string();
            }
            "storage_path" => {
                self.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "last_chat_sync_ms" => {
                self.last_chat_sync_ms = value.parse().context("Invalid number")?;
            }
            "monitor_interval_ms" => {
                self.transport.monitor_interval_ms = value.parse().context("Invalid number")?;
            }
            "max_in_flight" => {
                self.transport.max_in_flight = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "peer_ip" => Some(self.transport.peer_ip.to_string()),
            "hostname" => self.hostname.clone(),
            "encryption" => Some(self.encryption.to_string()),
            "cipher_secret" => Some(self.cipher_secret.clone()),
            "mac_secret" => Some(self.mac_secret.clone()),
            "storage_path" => self.storage_path.clone(),
            "last_chat_sync_ms" => Some(self.last_chat_sync_ms.to_string()),
            "monitor_interval_ms" => Some(self.transport.monitor_interval_ms.to_string()),
            "max_in_flight" => Some(self.transport.max_in_flight.to_string()),
            _ => None,
        }
    }

    /// List all config values, secrets masked
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("peer_ip".to_string(), self.transport.peer_ip.to_string()),
            (
                "hostname".to_string(),
                self.hostname.clone().unwrap_or_else(|| "(unknown)".to_string()),
            ),
            ("encryption".to_string(), self.encryption.to_string()),
            (
                "cipher_secret".to_string(),
                display_value("cipher_secret", &self.cipher_secret),
            ),
            (
                "mac_secret".to_string(),
                display_value("mac_secret", &self.mac_secret),
            ),
            (
                "storage_path".to_string(),
                self.storage_path.clone().unwrap_or_else(|| "(auto)".to_string()),
            ),
            ("last_chat_sync_ms".to_string(), self.last_chat_sync_ms.to_string()),
            (
                "monitor_interval_ms".to_string(),
                self.transport.monitor_interval_ms.to_string(),
            ),
            ("max_in_flight".to_string(), self.transport.max_in_flight.to_string()),
        ]
    }
}

const SECRET_KEYS: &[&str] = &["cipher_secret", "mac_secret"];

/// Value as it may be echoed to the terminal: secrets are masked
pub fn display_value(key: &str, value: &str) -> String {
    if SECRET_KEYS.contains(&key) {
        mask(value)
    } else {
        value.to_string()
    }
}

fn mask(secret: &str) -> String {
    let shown: String = secret.chars().take(2).collect();
    format!("{}{}", shown, "*".repeat(secret.chars().count().saturating_sub(2)))
}
