//! Driver configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via NINALINK_CONFIG)
//! 3. Environment variables

use ninalink_spi::LinkConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Driver configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Link handshake timing.
    pub link: LinkConfig,
    /// Socket polling budgets.
    pub sockets: SocketConfig,
    /// Station scan and join budgets.
    pub wifi: WifiConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("NINALINK_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.link.apply_env_overrides();
        self.sockets.apply_env_overrides();
        self.wifi.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        self.sockets.validate()?;
        self.wifi.validate()
    }
}

/// Socket polling budgets and cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Receive cache capacity per socket.
    pub buffer_size: usize,
    pub connect_attempts: u32,
    pub connect_interval_ms: u64,
    pub send_confirm_attempts: u32,
    pub send_confirm_interval_ms: u64,
    pub stop_attempts: u32,
    pub stop_interval_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            buffer_size: 255,
            connect_attempts: 50,
            connect_interval_ms: 100,
            send_confirm_attempts: 25,
            send_confirm_interval_ms: 100,
            stop_attempts: 50,
            stop_interval_ms: 100,
        }
    }
}

impl SocketConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("NINALINK_BUFFER_SIZE") {
            if let Ok(n) = size.parse() {
                self.buffer_size = n;
            }
        }

        if let Ok(attempts) = std::env::var("NINALINK_CONNECT_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.connect_attempts = n;
            }
        }

        if let Ok(ms) = std::env::var("NINALINK_CONNECT_INTERVAL_MS") {
            if let Ok(ms) = ms.parse() {
                self.connect_interval_ms = ms;
            }
        }

        if let Ok(attempts) = std::env::var("NINALINK_STOP_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.stop_attempts = n;
            }
        }
    }

    /// Polling interval shared by every socket loop, for tests and emulators.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        self.connect_interval_ms = ms;
        self.send_confirm_interval_ms = ms;
        self.stop_interval_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size < 2 || self.buffer_size > ninalink_protocol::MAX_FRAME_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "buffer_size must be between 2 and {}",
                ninalink_protocol::MAX_FRAME_SIZE
            )));
        }
        if self.connect_attempts == 0 || self.stop_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "polling budgets must allow at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }

    pub fn send_confirm_interval(&self) -> Duration {
        Duration::from_millis(self.send_confirm_interval_ms)
    }

    pub fn stop_interval(&self) -> Duration {
        Duration::from_millis(self.stop_interval_ms)
    }
}

/// Station scan and join budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub scan_attempts: u32,
    pub scan_interval_ms: u64,
    pub join_attempts: u32,
    pub join_interval_ms: u64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            scan_attempts: 10,
            scan_interval_ms: 2000,
            join_attempts: 10,
            join_interval_ms: 5000,
        }
    }
}

impl WifiConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(attempts) = std::env::var("NINALINK_SCAN_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.scan_attempts = n;
            }
        }

        if let Ok(ms) = std::env::var("NINALINK_SCAN_INTERVAL_MS") {
            if let Ok(ms) = ms.parse() {
                self.scan_interval_ms = ms;
            }
        }

        if let Ok(attempts) = std::env::var("NINALINK_JOIN_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.join_attempts = n;
            }
        }

        if let Ok(ms) = std::env::var("NINALINK_JOIN_INTERVAL_MS") {
            if let Ok(ms) = ms.parse() {
                self.join_interval_ms = ms;
            }
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        self.scan_interval_ms = ms;
        self.join_interval_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_attempts == 0 || self.join_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "scan and join budgets must allow at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn join_interval(&self) -> Duration {
        Duration::from_millis(self.join_interval_ms)
    }
}

/// Errors raised while loading or checking configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {0:?}: {1}")]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("bad YAML in {0:?}: {1}")]
    ParseError(PathBuf, String),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sockets.buffer_size, 255);
        assert_eq!(config.sockets.connect_attempts, 50);
        assert_eq!(config.sockets.connect_interval(), Duration::from_millis(100));
        assert_eq!(config.sockets.send_confirm_attempts, 25);
        assert_eq!(config.sockets.stop_attempts, 50);
        assert_eq!(config.wifi.scan_interval(), Duration::from_secs(2));
        assert_eq!(config.wifi.join_interval(), Duration::from_secs(5));
        assert_eq!(config.link.boot_delay_ms, 750);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sockets:\n  connect_attempts: 5\nlink:\n  ready_timeout_ms: 250").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.sockets.connect_attempts, 5);
        assert_eq!(config.sockets.stop_attempts, 50);
        assert_eq!(config.link.ready_timeout_ms, Some(250));
        assert_eq!(config.wifi, WifiConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ninalink.yaml");

        let config = Config {
            sockets: SocketConfig::default().with_poll_interval(Duration::from_millis(1)),
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.sockets.stop_interval_ms, 1);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/ninalink.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
        assert!(err.to_string().contains("/nonexistent/ninalink.yaml"));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.sockets.buffer_size = 1024;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        // One byte is always the terminator, leaving no room for data.
        let mut config = Config::default();
        config.sockets.buffer_size = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.link.max_frame_size = 2;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.wifi.join_attempts = 0;
        assert!(config.validate().is_err());
    }
}
