//! Application configuration.
//!
//! Loaded in layers by the binary: built-in defaults, then `config.toml`,
//! then `TRACKMYORDER__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;
use crate::db::DEFAULT_MAX_CONNECTIONS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when no verbosity flag is given.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Directory overrides. Supports `~` and environment variables.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file name, relative to the data directory.
    pub file: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file: "trackmyorder.db".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Realtime hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Seconds between websocket Ping frames.
    pub ping_interval_secs: u64,

    /// Outbound events buffered per connection before new ones are dropped.
    pub connection_buffer: usize,

    /// Accept the staff identity asserted in event payloads without checking
    /// the connection's credential. Only for legacy clients.
    pub trust_asserted_identity: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            connection_buffer: 64,
            trust_asserted_identity: false,
        }
    }
}
