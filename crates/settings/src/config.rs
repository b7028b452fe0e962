//! Configuration types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Network settings
    #[serde(default)]
    pub network: NetworkSettings,

    /// Relay settings (when running as a relay node)
    #[serde(default)]
    pub relay: RelaySettings,

    /// Client settings
    #[serde(default)]
    pub client: ClientSettings,

    /// Where these settings came from (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Settings from the default location; a missing file is not an error,
    /// it just means nothing has been customized yet.
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Settings from `path`. A malformed file is an error (silently reverting
    /// a node to defaults would mask operator mistakes); a missing one yields
    /// defaults bound to that path so a later `save` lands there.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = match std::fs::read(path) {
            Ok(raw) => {
                debug!(path = %path.display(), bytes = raw.len(), "settings file read");
                serde_json::from_slice::<Settings>(&raw).map_err(SettingsError::ParseError)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => return Err(SettingsError::ReadError(e)),
        };
        settings.config_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Write back to wherever the settings were loaded from
    pub fn save(&self) -> Result<()> {
        match self.config_path.as_deref() {
            Some(path) => self.save_to(path),
            None => self.save_to(&default_settings_path()),
        }
    }

    /// Write to `path`, creating missing directories along the way
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(SettingsError::CreateDirError)?;
        }

        let mut body = serde_json::to_vec_pretty(self).map_err(SettingsError::ParseError)?;
        body.push(b'\n');
        std::fs::write(path, body).map_err(SettingsError::WriteError)?;
        debug!(path = %path.display(), "settings written");
        Ok(())
    }
}

/// Network settings shared by clients and relays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// DHT listen address
    #[serde(default = "default_dht_listen")]
    pub dht_listen: String,

    /// DHT bootstrap nodes ("host:port")
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,

    /// Known relay addresses (hex) to track descriptors for
    #[serde(default)]
    pub known_relays: Vec<String>,
}

fn default_dht_listen() -> String {
    "0.0.0.0:9460".to_string()
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            dht_listen: default_dht_listen(),
            bootstrap_nodes: Vec::new(),
            known_relays: Vec::new(),
        }
    }
}

/// Relay node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Accept peer connections on this address
    #[serde(default = "default_relay_listen")]
    pub listen_addr: String,

    /// Advertised region code
    #[serde(default = "default_unknown")]
    pub region: String,

    /// Advertised operator name
    #[serde(default = "default_unknown")]
    pub operator: String,

    /// Maximum concurrent peer connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Offline queue capacity (messages)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_relay_listen() -> String {
    "0.0.0.0:9470".to_string()
}

fn default_unknown() -> String {
    "unknown".to_string()
}

fn default_max_connections() -> u32 {
    512
}

fn default_queue_capacity() -> usize {
    4096
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            listen_addr: default_relay_listen(),
            region: default_unknown(),
            operator: default_unknown(),
            max_connections: default_max_connections(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Onion circuit length
    #[serde(default = "default_circuit_hops")]
    pub circuit_hops: usize,

    /// Directory for the keystore and persisted sessions
    #[serde(default)]
    pub data_dir: Option<String>,

    /// One-time prekeys to keep published
    #[serde(default = "default_prekey_target")]
    pub one_time_prekeys: usize,
}

fn default_circuit_hops() -> usize {
    3
}

fn default_prekey_target() -> usize {
    20
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            circuit_hops: default_circuit_hops(),
            data_dir: None,
            one_time_prekeys: default_prekey_target(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.network.dht_listen, "0.0.0.0:9460");
        assert_eq!(settings.relay.listen_addr, "0.0.0.0:9470");
        assert_eq!(settings.client.circuit_hops, 3);
        assert!(settings.network.bootstrap_nodes.is_empty());
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.relay.queue_capacity, settings.relay.queue_capacity);
    }

    #[test]
    fn test_partial_settings_get_defaults() {
        let parsed: Settings =
            serde_json::from_str(r#"{"relay": {"region": "eu"}}"#).unwrap();
        assert_eq!(parsed.relay.region, "eu");
        assert_eq!(parsed.relay.operator, "unknown");
        assert_eq!(parsed.client.one_time_prekeys, 20);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::default();
        settings.relay.region = "ap".to_string();
        settings.network.bootstrap_nodes = vec!["10.0.0.1:9460".to_string()];
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.relay.region, "ap");
        assert_eq!(loaded.network.bootstrap_nodes.len(), 1);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.client.circuit_hops, 3);
    }

    #[test]
    fn test_malformed_file_is_an_error_not_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(SettingsError::ParseError(_))
        ));
    }

    #[test]
    fn test_save_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep").join("nested").join("settings.json");
        Settings::default().save_to(&path).unwrap();
        assert!(path.exists());
        // Written file parses back
        Settings::load_from(&path).unwrap();
    }
}
