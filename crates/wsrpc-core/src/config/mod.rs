//! Configuration loading and validation.
//!
//! JSON5 format. Config location: `~/.wsrpc/wsrpc.json`, or
//! `$WSRPC_STATE_DIR/wsrpc.json` when the variable is set.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// WebSocket server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Router (dispatch engine) configuration.
    #[serde(default)]
    pub router: RouterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns error if config exists but cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid JSON5 or fails validation.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("wsrpc.json")
    }

    /// Get the wsrpc state directory.
    ///
    /// Uses `WSRPC_STATE_DIR` env var if set, otherwise `~/.wsrpc`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("WSRPC_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".wsrpc")
        } else {
            PathBuf::from(".wsrpc")
        }
    }

    /// Apply `WSRPC_PORT` and `WSRPC_BIND` overrides.
    ///
    /// Unparsable values are ignored with a warning.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("WSRPC_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(e) => tracing::warn!("Ignoring WSRPC_PORT={}: {}", port, e),
            }
        }

        if let Ok(bind) = std::env::var("WSRPC_BIND") {
            self.server.bind_address = bind;
        }

        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        if !self.server.path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "Server path '{}' must start with '/'",
                self.server.path
            )));
        }

        if self.router.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "Router queue capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Route that upgrades to a WebSocket.
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            path: default_path(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    18790
}

fn default_path() -> String {
    "/ws".to_string()
}

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    /// Capacity of the inbound queue shared by all connections.
    ///
    /// When full, ingestion loops wait for space (and stop reading their sockets).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

const fn default_queue_capacity() -> usize {
    1024
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`).
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 18790);
        assert_eq!(config.server.path, "/ws");
        assert_eq!(config.router.queue_capacity, 1024);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("wsrpc.json");

        let mut config = Config::default();
        config.server.port = 9000;
        config.logging.format = LogFormat::Json;
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.port, 9000);
        assert_eq!(loaded.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_json5_parsing() {
        let config = Config::parse(
            r#"{
                // comments and trailing commas are allowed
                server: { port: 8080, path: "/rpc", },
                router: { queueCapacity: 16 },
            }"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.path, "/rpc");
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.router.queue_capacity, 16);
    }

    #[test]
    fn test_validation_failures() {
        assert!(matches!(
            Config::parse("{ server: { port: 0 } }"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            Config::parse(r#"{ server: { path: "ws" } }"#),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            Config::parse("{ router: { queueCapacity: 0 } }"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(Config::parse("{ server: "), Err(ConfigError::Parse(_))));
    }
}
