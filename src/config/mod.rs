//! Configuration management
//!
//! Configuration is loaded from a `config.yml` file, then individual values
//! may be overridden through `CLIPSHARE_*` environment variables.
//!
//! Missing optional values are filled with the service defaults.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub clipboard: ClipboardConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub abuse: AbuseConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed to call the API from a browser
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// How long in-flight requests may run after a shutdown signal
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_cors_origins() -> Vec<String> {
    [
        "http://localhost:5000",
        "https://localhost:5001",
        "http://localhost:8080",
        "https://localhost:8443",
        "http://127.0.0.1:5000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

/// On-disk locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `users.json`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding uploaded clipboard files; purged at startup
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("clipshare")
}

/// Clipboard item limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardConfig {
    /// Lifetime of every clipboard item
    #[serde(default = "default_clipboard_ttl")]
    pub ttl_seconds: u64,
    /// Largest accepted text snippet (default: 1MB)
    #[serde(default = "default_max_text_bytes")]
    pub max_text_bytes: usize,
    /// Largest accepted upload (default: 50MB)
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_clipboard_ttl(),
            max_text_bytes: default_max_text_bytes(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl ClipboardConfig {
    pub fn ttl(&self) -> Duration {
        seconds(self.ttl_seconds)
    }
}

fn default_clipboard_ttl() -> u64 {
    10 * 60
}

fn default_max_text_bytes() -> usize {
    1024 * 1024
}

fn default_max_file_bytes() -> usize {
    50 * 1024 * 1024
}

/// Login session lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_remember_me_ttl")]
    pub remember_me_ttl_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
            remember_me_ttl_seconds: default_remember_me_ttl(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        seconds(self.ttl_seconds)
    }

    pub fn remember_me_ttl(&self) -> Duration {
        seconds(self.remember_me_ttl_seconds)
    }
}

fn default_session_ttl() -> u64 {
    2 * 60 * 60
}

fn default_remember_me_ttl() -> u64 {
    7 * 24 * 60 * 60
}

/// Per (IP, method) fixed-window limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Length of one counting window
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Windows untouched this long are discarded by the sweep
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
    #[serde(default = "default_post_limit")]
    pub post_limit: u32,
    #[serde(default = "default_get_limit")]
    pub get_limit: u32,
    /// Limit for every method other than GET and POST
    #[serde(default = "default_other_limit")]
    pub default_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            idle_seconds: default_idle_seconds(),
            post_limit: default_post_limit(),
            get_limit: default_get_limit(),
            default_limit: default_other_limit(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        seconds(self.window_seconds)
    }

    pub fn idle(&self) -> Duration {
        seconds(self.idle_seconds)
    }

    /// Request budget per window for an HTTP method
    pub fn limit_for(&self, method: &str) -> u32 {
        match method {
            "POST" => self.post_limit,
            "GET" => self.get_limit,
            _ => self.default_limit,
        }
    }
}

fn default_window_seconds() -> u64 {
    60
}

fn default_idle_seconds() -> u64 {
    120
}

fn default_post_limit() -> u32 {
    20
}

fn default_get_limit() -> u32 {
    100
}

fn default_other_limit() -> u32 {
    50
}

/// Failure counting and blocking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseConfig {
    /// Failures above this count block the IP when the failure is recorded
    #[serde(default = "default_record_block_threshold")]
    pub record_block_threshold: u32,
    /// Failures above this count block the IP when it next asks for access
    #[serde(default = "default_access_block_threshold")]
    pub access_block_threshold: u32,
    /// Failure records untouched this long are discarded by the sweep
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            record_block_threshold: default_record_block_threshold(),
            access_block_threshold: default_access_block_threshold(),
            retention_seconds: default_retention_seconds(),
        }
    }
}

impl AbuseConfig {
    pub fn retention(&self) -> Duration {
        seconds(self.retention_seconds)
    }
}

fn default_record_block_threshold() -> u32 {
    crate::services::security::RECORD_BLOCK_THRESHOLD
}

fn default_access_block_threshold() -> u32 {
    crate::services::security::ACCESS_BLOCK_THRESHOLD
}

fn default_retention_seconds() -> u64 {
    60 * 60
}

/// Background sweep schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval")]
    pub interval_seconds: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_cleanup_interval(),
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_seconds.max(1))
    }
}

fn default_cleanup_interval() -> u64 {
    60
}

/// Account bootstrap and password rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Username of the admin created when no users exist
    #[serde(default = "default_admin_username")]
    pub default_admin_username: String,
    /// Password of the admin created when no users exist
    #[serde(default = "default_admin_password")]
    pub default_admin_password: String,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            default_admin_username: default_admin_username(),
            default_admin_password: default_admin_password(),
            min_password_length: default_min_password_length(),
        }
    }
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_password() -> String {
    "admin123".to_string()
}

fn default_min_password_length() -> usize {
    6
}

/// Longest configurable duration (100 years); keeps `now + ttl` representable
const MAX_DURATION_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

fn seconds(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_DURATION_SECONDS) as i64)
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
}

impl Config {
    /// Load configuration from file
    ///
    /// A missing or empty file yields the defaults. A file that exists but
    /// is not valid YAML is an error carrying the parse location.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        Ok(config)
    }

    /// Load configuration from file, then apply environment overrides
    ///
    /// Recognised variables:
    /// - CLIPSHARE_SERVER_HOST
    /// - CLIPSHARE_SERVER_PORT
    /// - CLIPSHARE_DATA_DIR
    /// - CLIPSHARE_TEMP_DIR
    /// - CLIPSHARE_ADMIN_PASSWORD
    /// - CLIPSHARE_CLEANUP_INTERVAL_SECONDS
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CLIPSHARE_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("CLIPSHARE_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(dir) = std::env::var("CLIPSHARE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CLIPSHARE_TEMP_DIR") {
            self.storage.temp_dir = PathBuf::from(dir);
        }
        if let Ok(password) = std::env::var("CLIPSHARE_ADMIN_PASSWORD") {
            if !password.is_empty() {
                self.auth.default_admin_password = password;
            }
        }
        if let Ok(interval) = std::env::var("CLIPSHARE_CLEANUP_INTERVAL_SECONDS") {
            if let Ok(interval) = interval.parse::<u64>() {
                self.cleanup.interval_seconds = interval;
            }
        }
    }
}

/// Format YAML parsing error with location
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
