//! Server configuration loading from file and environment variables.

use pitwall_db::DbRuntimeSettings;
use pitwall_events::{StorageBackend, SyncSettings, DEFAULT_MEMORY_CAPACITY};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Event store selection.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Per-kind retention.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Sync page sizes.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Deployment environment. Development responses carry error details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    /// Whether 500 responses should include a `detail` field.
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" => Ok(Environment::Production),
            "development" => Ok(Environment::Development),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment environment (`production` or `development`).
    #[serde(default)]
    pub environment: Environment,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// How long a request waits for a pooled connection before the store
    /// is reported unavailable.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
            connect_timeout_ms: self.connect_timeout_ms,
        }
    }
}

/// Event store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `sqlite` (durable) or `memory` (volatile, single process).
    #[serde(default)]
    pub backend: StorageBackend,

    /// Serve from the volatile store while SQLite is unreachable.
    #[serde(default = "default_true")]
    pub fallback_on_unavailable: bool,

    /// Ceiling for the volatile store, across both kinds.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// Seconds between attempts to reach SQLite again while degraded.
    #[serde(default = "default_probe_interval_seconds")]
    pub probe_interval_seconds: u64,
}

impl StorageConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }
}

/// Retention configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Events kept per kind.
    #[serde(default = "default_retention_capacity")]
    pub capacity: usize,

    /// Seconds between background sweeps. Zero disables the sweep; writes
    /// still trim inline.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

/// Sync page sizes.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Events returned to a consumer without a watermark.
    #[serde(default = "default_initial_page")]
    pub initial_page: usize,

    /// Upper bound on events returned per poll.
    #[serde(default = "default_max_page")]
    pub max_page: usize,
}

impl SyncConfig {
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            initial_page: self.initial_page,
            max_page: self.max_page,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "pitwall_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "pitwall.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_connect_timeout_ms() -> u64 {
    DbRuntimeSettings::default().connect_timeout_ms
}

fn default_true() -> bool {
    true
}

fn default_memory_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

fn default_probe_interval_seconds() -> u64 {
    10
}

fn default_retention_capacity() -> usize {
    500
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

fn default_initial_page() -> usize {
    SyncSettings::default().initial_page
}

fn default_max_page() -> usize {
    SyncSettings::default().max_page
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: Environment::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            fallback_on_unavailable: true,
            memory_capacity: default_memory_capacity(),
            probe_interval_seconds: default_probe_interval_seconds(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            capacity: default_retention_capacity(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_page: default_initial_page(),
            max_page: default_max_page(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PITWALL_HOST` overrides `server.host`
/// - `PITWALL_PORT` overrides `server.port`
/// - `PITWALL_ENVIRONMENT` overrides `server.environment`
/// - `PITWALL_DB_PATH` overrides `database.path`
/// - `PITWALL_STORAGE_BACKEND` overrides `storage.backend`
/// - `PITWALL_RETENTION_CAPACITY` overrides `retention.capacity`
/// - `PITWALL_LOG_LEVEL` overrides `logging.level`
/// - `PITWALL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// Unparseable override values are ignored with a warning.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
        let value = value?;
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(key, value = %value, "ignoring unparseable config override");
                None
            }
        }
    }

    if let Some(host) = parsed("PITWALL_HOST", var("PITWALL_HOST")) {
        config.server.host = host;
    }
    if let Some(port) = parsed("PITWALL_PORT", var("PITWALL_PORT")) {
        config.server.port = port;
    }
    if let Some(environment) = parsed("PITWALL_ENVIRONMENT", var("PITWALL_ENVIRONMENT")) {
        config.server.environment = environment;
    }
    if let Some(db_path) = var("PITWALL_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(backend) = parsed("PITWALL_STORAGE_BACKEND", var("PITWALL_STORAGE_BACKEND")) {
        config.storage.backend = backend;
    }
    if let Some(capacity) = parsed("PITWALL_RETENTION_CAPACITY", var("PITWALL_RETENTION_CAPACITY"))
    {
        config.retention.capacity = capacity;
    }
    if let Some(level) = var("PITWALL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PITWALL_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
