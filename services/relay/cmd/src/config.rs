//! Configuration handling for the relay service.
//!
//! Values are layered, lowest precedence first: built-in defaults, the YAML
//! config file, the legacy `port.info` file, environment variables, and
//! finally command-line flags (applied by `main`).

use anyhow::{bail, Context, Result};
use relay_storage::StorageMode;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Relay service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen host (an IP address)
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Listen queue length
    pub backlog: u32,
    /// Persistence settings
    pub storage: StorageConfig,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `memory` or `file`
    pub mode: String,
    /// Data directory for file storage
    pub data_dir: PathBuf,
    /// Sync every write to disk
    pub fsync: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: "memory".to_string(),
            data_dir: PathBuf::from("./relaydata"),
            fsync: true,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1357,
            backlog: relay_server::DEFAULT_BACKLOG,
            storage: StorageConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from the config file, the port file and the
    /// process environment
    pub fn load(config_path: &Path, port_file: &Path) -> Result<Self> {
        let mut config = Self::load_from_file(config_path);
        config.apply_port_file(port_file);
        config.apply_environment_overrides(|key| std::env::var(key).ok());

        info!(
            "Relay configuration: listen={}:{}, backlog={}, storage={} ({:?})",
            config.host, config.port, config.backlog, config.storage.mode, config.storage.data_dir
        );
        Ok(config)
    }

    /// Defaults overlaid with the YAML file, if it exists and parses
    pub fn load_from_file(config_path: &Path) -> Self {
        let content = match std::fs::read_to_string(config_path) {
            Ok(content) => content,
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path);
                return Self::default();
            }
        };

        match serde_yaml::from_str::<RelayConfig>(&content) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", config_path);
                config
            }
            Err(e) => {
                warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path, e
                );
                Self::default()
            }
        }
    }

    /// Take the port from the first line of a `port.info` file
    pub fn apply_port_file(&mut self, port_file: &Path) {
        let Ok(content) = std::fs::read_to_string(port_file) else {
            debug!("No port file at {:?}", port_file);
            return;
        };

        match content.lines().next().map(str::trim).map(str::parse::<u16>) {
            Some(Ok(port)) => {
                self.port = port;
                info!("Port {} read from {:?}", port, port_file);
            }
            _ => warn!(
                "Port file {:?} does not start with a valid port, keeping {}",
                port_file, self.port
            ),
        }
    }

    /// Apply `RELAY_*` overrides looked up through `var`
    pub fn apply_environment_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("RELAY_HOST") {
            info!("Host overridden by environment: {}", host);
            self.host = host;
        }

        if let Some(port) = var("RELAY_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.port = port;
                    info!("Port overridden by environment: {}", port);
                }
                Err(_) => warn!("Ignoring invalid RELAY_PORT {:?}", port),
            }
        }

        if let Some(mode) = var("RELAY_STORAGE_MODE") {
            info!("Storage mode overridden by environment: {}", mode);
            self.storage.mode = mode;
        }

        if let Some(data_dir) = var("RELAY_DATA_DIR") {
            info!("Data directory overridden by environment: {}", data_dir);
            self.storage.data_dir = PathBuf::from(data_dir);
        }
    }

    /// Socket address to listen on
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid listen host {:?}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Storage backend selected by the configuration
    pub fn storage_mode(&self) -> Result<StorageMode> {
        match self.storage.mode.as_str() {
            "memory" => Ok(StorageMode::InMemory),
            "file" => Ok(StorageMode::File {
                data_dir: self.storage.data_dir.clone(),
                fsync: self.storage.fsync,
            }),
            other => bail!("Invalid storage mode: {}. Use 'memory' or 'file'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 1357);
        assert_eq!(config.backlog, 5);
        assert_eq!(config.storage.mode, "memory");
        assert!(config.storage.fsync);
        assert!(matches!(config.storage_mode().unwrap(), StorageMode::InMemory));
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
host: 0.0.0.0
port: 4000
storage:
  mode: file
  data_dir: /var/lib/relay
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = RelayConfig::load_from_file(temp_file.path());
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 4000);
        // Unset keys keep their defaults
        assert_eq!(config.backlog, 5);
        assert!(config.storage.fsync);

        match config.storage_mode().unwrap() {
            StorageMode::File { data_dir, fsync } => {
                assert_eq!(data_dir, PathBuf::from("/var/lib/relay"));
                assert!(fsync);
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_missing_or_broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            RelayConfig::load_from_file(&dir.path().join("absent.yaml")),
            RelayConfig::default()
        );

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"port: [not a port").unwrap();
        assert_eq!(
            RelayConfig::load_from_file(temp_file.path()),
            RelayConfig::default()
        );
    }

    #[test]
    fn test_port_file() {
        let mut config = RelayConfig::default();

        let mut port_file = NamedTempFile::new().unwrap();
        port_file.write_all(b"8080\n").unwrap();
        config.apply_port_file(port_file.path());
        assert_eq!(config.port, 8080);

        let mut bad = NamedTempFile::new().unwrap();
        bad.write_all(b"eighty\n").unwrap();
        config.apply_port_file(bad.path());
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RELAY_HOST", "::1"),
            ("RELAY_PORT", "not-a-port"),
            ("RELAY_STORAGE_MODE", "file"),
            ("RELAY_DATA_DIR", "/tmp/relay"),
        ]);

        let mut config = RelayConfig::default();
        config.apply_environment_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.host, "::1");
        assert_eq!(config.port, 1357);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/relay"));
        assert_eq!(
            config.listen_addr().unwrap(),
            "[::1]:1357".parse::<SocketAddr>().unwrap()
        );
        assert!(matches!(config.storage_mode().unwrap(), StorageMode::File { .. }));
    }

    #[test]
    fn test_invalid_storage_mode_is_an_error() {
        let mut config = RelayConfig::default();
        config.storage.mode = "redis".to_string();
        assert!(config.storage_mode().is_err());

        config.host = "localhost".to_string();
        assert!(config.listen_addr().is_err());
    }
}
