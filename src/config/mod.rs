use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory with the browser client, served as a fallback when present
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Wall-clock budget for a single request before a 408 is returned
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Allowed CORS origins; empty means same-origin only
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            static_dir: default_static_dir(),
            request_timeout_secs: default_request_timeout(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./public")
}

fn default_request_timeout() -> u64 {
    30
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3001".to_string(),
        "http://127.0.0.1:3001".to_string(),
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for signing access tokens
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_days")]
    pub token_ttl_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_days: default_token_ttl_days(),
        }
    }
}

fn default_jwt_secret() -> String {
    // Tokens will not survive a restart unless a secret is configured
    uuid::Uuid::new_v4().to_string()
}

fn default_token_ttl_days() -> i64 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Default lifetime of a cached GET response
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Lifetime of the therapy-type catalog response
    #[serde(default = "default_catalog_ttl")]
    pub catalog_ttl_secs: u64,
    /// Lifetime of the dashboard analytics response
    #[serde(default = "default_dashboard_ttl")]
    pub dashboard_ttl_secs: u64,
    /// How often expired entries are purged
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            catalog_ttl_secs: default_catalog_ttl(),
            dashboard_ttl_secs: default_dashboard_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_catalog_ttl() -> u64 {
    1800
}

fn default_dashboard_ttl() -> u64 {
    120
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_comments_min_length")]
    pub comments_min_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            comments_min_length: default_comments_min_length(),
        }
    }
}

fn default_comments_min_length() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Record an `api_request` event for every authenticated request
    #[serde(default = "default_track_requests")]
    pub track_requests: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            track_requests: default_track_requests(),
        }
    }
}

fn default_track_requests() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            validation: ValidationConfig::default(),
            analytics: AnalyticsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
