//! Configuration Module
//!
//! Handles application configuration loading, validation, and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// WhatsApp session configuration
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address (default: "0.0.0.0")
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Directory of static frontend assets, served as a fallback when it
    /// exists (default: "public")
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
}

fn default_port() -> u16 {
    8080
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            public_dir: default_public_dir(),
        }
    }
}

/// WhatsApp session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Application data directory (default: ~/.wagate)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Device name shown in the phone's linked-devices list
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wagate")
}

fn default_device_name() -> String {
    "Wagate".to_string()
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            device_name: default_device_name(),
        }
    }
}

impl WhatsAppConfig {
    /// Directory holding the session database and its WAL/shm siblings.
    pub fn session_dir(&self) -> PathBuf {
        self.data_dir.join("session")
    }

    /// Directory for debug log files.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter when RUST_LOG is unset (e.g. "wagate=info")
    #[serde(default)]
    pub level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: None }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Priority (lowest to highest):
    /// 1. Default values
    /// 2. System config: ~/.config/wagate/config.toml
    /// 3. Local config: ./wagate.toml
    /// 4. Environment variables
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_config_path) = Self::system_config_path()
            && system_config_path.exists()
        {
            tracing::debug!("Loading system config from: {:?}", system_config_path);
            config = Self::merge_from_file(config, &system_config_path)?;
        }

        let local_config_path = Self::local_config_path();
        if local_config_path.exists() {
            tracing::debug!("Loading local config from: {:?}", local_config_path);
            config = Self::merge_from_file(config, &local_config_path)?;
        }

        config = Self::apply_env_overrides(config)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::default();
        if !path.exists() {
            anyhow::bail!("Config file not found: {:?}", path);
        }
        let config = Self::merge_from_file(config, path)?;
        Self::apply_env_overrides(config)
    }

    /// System config path: ~/.config/wagate/config.toml
    fn system_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wagate").join("config.toml"))
    }

    /// Local config path: ./wagate.toml
    fn local_config_path() -> PathBuf {
        PathBuf::from("./wagate.toml")
    }

    /// Load and merge configuration from a TOML file. The file replaces the
    /// base wholesale; unspecified fields fall back to serde defaults.
    fn merge_from_file(_base: Self, path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(mut config: Self) -> Result<Self> {
        if let Ok(port) = std::env::var("WAGATE_PORT") {
            config.server.port = port
                .parse()
                .with_context(|| format!("Invalid WAGATE_PORT value: {}", port))?;
        }

        if let Ok(bind) = std::env::var("WAGATE_BIND") {
            config.server.bind = bind;
        }

        if let Ok(data_dir) = std::env::var("WAGATE_DATA_DIR") {
            config.whatsapp.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(public_dir) = std::env::var("WAGATE_PUBLIC_DIR") {
            config.server.public_dir = PathBuf::from(public_dir);
        }

        if let Ok(level) = std::env::var("WAGATE_LOG_LEVEL") {
            config.logging.level = Some(level);
        }

        Ok(config)
    }

    /// Persist the configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.public_dir, PathBuf::from("public"));
        assert!(config.whatsapp.data_dir.ends_with(".wagate"));
        assert_eq!(config.whatsapp.device_name, "Wagate");
    }

    #[test]
    fn test_session_dir_under_data_dir() {
        let mut config = Config::default();
        config.whatsapp.data_dir = PathBuf::from("/var/lib/wagate");
        assert_eq!(
            config.whatsapp.session_dir(),
            PathBuf::from("/var/lib/wagate/session")
        );
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_content = r#"
            [server]
            port = 3000
        "#;
        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.server.port, 3000);
        // Unspecified fields keep their defaults
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.whatsapp.device_name, "Wagate");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_content = r#"
            [server]
            port = 9090
            bind = "127.0.0.1"
            public_dir = "/srv/wagate/public"

            [whatsapp]
            data_dir = "/srv/wagate/data"
            device_name = "Office Gateway"

            [logging]
            level = "wagate=debug"
        "#;
        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.whatsapp.device_name, "Office Gateway");
        assert_eq!(config.logging.level.as_deref(), Some("wagate=debug"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wagate.toml");

        let mut config = Config::default();
        config.server.port = 4242;
        config.save(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let loaded: Config = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.server.port, 4242);
    }

    #[test]
    fn test_load_from_missing_path_fails() {
        let result = Config::load_from_path("/nonexistent/wagate.toml");
        assert!(result.is_err());
    }
}
