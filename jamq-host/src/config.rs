//! Configuration for the host daemon
//!
//! Settings resolve in priority order:
//! 1. Command line arguments (highest)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Built-in defaults (lowest)
//!
//! Command line and environment handling lives in main.rs (clap); this module
//! owns the TOML file format, the defaults, and the override merge.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::resolver::DEFAULT_INSTANCES;

/// Complete daemon configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub resolver: ResolverConfig,
    pub engine: EngineConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Listen port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5749,
        }
    }
}

/// Which track store backend to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// Track store settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database file path (sqlite backend). Defaults to a per-user data directory.
    pub db_path: Option<PathBuf>,
    /// Per-session change broadcast capacity. Slow consumers past this lag and reload.
    pub change_feed_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            db_path: None,
            change_feed_capacity: 256,
        }
    }
}

impl StoreConfig {
    /// Database path, falling back to the platform data directory
    pub fn resolved_db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => path.clone(),
            None => default_db_path(),
        }
    }

    /// Create the directory that will hold the database file
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.resolved_db_path().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

/// Media resolution settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// YouTube Data API key. When absent the official provider is skipped entirely.
    pub youtube_api_key: Option<String>,
    /// Per-call timeout for the official provider
    pub youtube_timeout_ms: u64,
    /// Invidious mirrors tried in order after the official provider
    pub invidious_instances: Vec<String>,
    /// Per-call timeout for each mirror
    pub invidious_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            youtube_api_key: None,
            youtube_timeout_ms: 5_000,
            invidious_instances: DEFAULT_INSTANCES.iter().map(|s| s.to_string()).collect(),
            invidious_timeout_ms: 4_000,
        }
    }
}

/// Session engine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between full projection reloads from the store
    pub reconcile_interval_secs: u64,
    /// Command channel depth per session engine
    pub command_buffer: usize,
    /// Session event broadcast capacity (SSE fan-out)
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 30,
            command_buffer: 64,
            event_capacity: 256,
        }
    }
}

/// Values collected from the command line / environment, merged over the file
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub memory_store: bool,
    pub youtube_api_key: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// With an explicit path, the file must exist and parse. Without one, the
    /// platform config directory (then /etc/jamq) is consulted, and a missing
    /// file falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Config::default()),
            },
        }
    }

    fn from_file(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
        Self::from_toml_str(&raw)
            .map_err(|e| Error::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    fn from_toml_str(raw: &str) -> std::result::Result<Config, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply command line / environment overrides on top of the file values
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(db_path) = overrides.db_path {
            self.store.db_path = Some(db_path);
        }
        if overrides.memory_store {
            self.store.backend = StoreBackend::Memory;
        }
        if let Some(key) = overrides.youtube_api_key {
            self.resolver.youtube_api_key = Some(key);
        }
    }
}

/// Default config file location: user config dir, then /etc
fn default_config_path() -> Option<PathBuf> {
    if let Some(dir) = dirs::config_dir() {
        let path = dir.join("jamq").join("config.toml");
        if path.exists() {
            return Some(path);
        }
    }
    let etc = PathBuf::from("/etc/jamq/config.toml");
    if etc.exists() {
        return Some(etc);
    }
    None
}

/// Default database location under the platform data directory
fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("jamq").join("jamq.db"))
        .unwrap_or_else(|| PathBuf::from("jamq.db"))
}
