// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::bluetooth::{
    BluezOptions, Framing, PumpOptions, ServiceRecord, SERVICE_NAME, SERVICE_UUID,
};
use crate::session::SessionOptions;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service record shared by both peers.
    pub service: ServiceConfig,

    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Connection settings.
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Both peers must use the same UUID to find each other.
    pub uuid: Uuid,

    /// Name published in the service record.
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            uuid: SERVICE_UUID,
            name: SERVICE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter name such as "hci0". The default adapter when unset.
    pub adapter: Option<String>,

    /// Fixed RFCOMM channel for the listener.
    pub channel: Option<u16>,

    pub require_authentication: bool,

    pub require_authorization: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Give up accept/connect after this many seconds. Waits until
    /// cancelled when unset.
    pub connect_timeout_secs: Option<u64>,

    /// "raw" (compatible with existing peers) or "length-prefixed".
    pub framing: Framing,

    /// Size of the stream read buffer in bytes.
    pub read_buffer_size: usize,

    /// Pause after a transient read error.
    pub read_retry_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: None,
            framing: Framing::Raw,
            read_buffer_size: 1024,
            read_retry_delay_ms: 100,
        }
    }
}

impl Config {
    /// Location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rfcomm-chat")
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path`, writing the defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Invalid configuration in {}", path.display()))?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            info!("Default configuration written to {}", path.display());
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.read_buffer_size == 0 {
            bail!("connection.read_buffer_size must be greater than zero");
        }
        if self.service.name.is_empty() {
            bail!("service.name must not be empty");
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connection.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            service: ServiceRecord {
                uuid: self.service.uuid,
                name: self.service.name.clone(),
            },
            connect_timeout: self.connect_timeout(),
            pump: PumpOptions {
                framing: self.connection.framing,
                read_buffer_size: self.connection.read_buffer_size,
                read_retry_delay: Duration::from_millis(self.connection.read_retry_delay_ms),
            },
        }
    }

    pub fn bluez_options(&self) -> BluezOptions {
        BluezOptions {
            channel: self.bluetooth.channel,
            require_authentication: self.bluetooth.require_authentication,
            require_authorization: self.bluetooth.require_authorization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.service.uuid, SERVICE_UUID);
        assert_eq!(config.connection.framing, Framing::Raw);
        assert_eq!(config.connection.read_buffer_size, 1024);
        assert_eq!(config.connect_timeout(), None);

        let options = config.session_options();
        assert_eq!(options.service, ServiceRecord::default());
        assert_eq!(options.pump.read_retry_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, Config::default());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[connection]\nconnect_timeout_secs = 30\nframing = \"length-prefixed\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.connection.framing, Framing::LengthPrefixed);
        assert_eq!(config.connection.read_buffer_size, 1024);
        assert_eq!(config.service, ServiceConfig::default());
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[connection]\nread_buffer_size = 0\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_save_roundtrip_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.bluetooth.adapter = Some("hci1".to_string());
        config.bluetooth.channel = Some(3);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.bluetooth.adapter.as_deref(), Some("hci1"));
        assert_eq!(loaded.bluez_options().channel, Some(3));
    }
}
