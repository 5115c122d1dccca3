//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::websocket::{HubConfig, Profile};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory the whiteboard page is served from
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Largest WebSocket message accepted from a client
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./static")
}

fn default_max_message_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl ServerConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Relay session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub profile: Profile,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Frames queued per connection before it is treated as a failed write
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Keep only the newest N messages for replay; unset keeps all of them
    #[serde(default)]
    pub history_limit: Option<usize>,
}

fn default_max_connections() -> usize {
    1000
}

fn default_outbound_buffer() -> usize {
    1024
}

fn default_write_timeout() -> u64 {
    5000 // 5 seconds
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            max_connections: default_max_connections(),
            outbound_buffer: default_outbound_buffer(),
            write_timeout_ms: default_write_timeout(),
            history_limit: None,
        }
    }
}

impl SessionConfig {
    /// Hub settings derived from this section
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            profile: self.profile,
            max_connections: self.max_connections,
            outbound_buffer: self.outbound_buffer,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            history_limit: self.history_limit,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        for path in Self::default_paths() {
            if path.exists() {
                match Self::load_with_env(&path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Config file locations, in search order
    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::config_dir().map(|p| p.join("sketchboard").join("config.toml")),
            Some(PathBuf::from("/etc/sketchboard/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Server overrides
        if let Some(host) = var("SKETCHBOARD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("SKETCHBOARD_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(dir) = var("SKETCHBOARD_STATIC_DIR") {
            self.server.static_dir = PathBuf::from(dir);
        }

        // Session overrides
        if let Some(profile) = var("SKETCHBOARD_PROFILE") {
            match profile.parse() {
                Ok(p) => self.session.profile = p,
                Err(e) => tracing::warn!("Ignoring SKETCHBOARD_PROFILE: {}", e),
            }
        }
        if let Some(max) = var("SKETCHBOARD_MAX_CONNECTIONS").and_then(|m| m.parse().ok()) {
            self.session.max_connections = max;
        }
        if let Some(limit) = var("SKETCHBOARD_HISTORY_LIMIT").and_then(|l| l.parse().ok()) {
            self.session.history_limit = Some(limit);
        }

        // Logging overrides
        if let Some(level) = var("SKETCHBOARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("SKETCHBOARD_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Sketchboard Configuration
#
# Environment variables override these settings:
# - SKETCHBOARD_HOST
# - SKETCHBOARD_PORT
# - SKETCHBOARD_STATIC_DIR
# - SKETCHBOARD_PROFILE
# - SKETCHBOARD_MAX_CONNECTIONS
# - SKETCHBOARD_HISTORY_LIMIT
# - SKETCHBOARD_LOG_LEVEL
# - SKETCHBOARD_LOG_FORMAT

[server]
# Address to listen on
host = "0.0.0.0"
port = 8080

# Directory served at /
static_dir = "./static"

# Largest WebSocket message accepted from a client (bytes)
max_message_bytes = 1048576

[session]
# full: join handshake, sender attribution, history replay, user counts
# minimal: relay raw frames to every other connection
profile = "full"

# Maximum number of simultaneous connections
max_connections = 1000

# Frames queued per connection before a slow client is dropped
outbound_buffer = 1024

# Socket write timeout (ms)
write_timeout_ms = 5000

# Keep only the newest N messages for replay (unset = keep everything)
# history_limit = 10000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
