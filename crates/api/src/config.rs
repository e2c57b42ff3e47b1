use std::collections::HashMap;
use std::net::SocketAddr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub dsts: DstsConfig,
    /// Token validator settings keyed by the `X-HP-Token-Type` header value.
    #[serde(default)]
    pub token_types: HashMap<String, TokenIssuerSettings>,
    /// Signing keys seeded into the key store at startup. Keys are
    /// write-once per kid; re-seeding an existing kid is a no-op.
    #[serde(default)]
    pub token_signing_keys: Vec<SigningKeyConfig>,
    #[serde(default)]
    pub scheduled_jobs: HashMap<String, ScheduledJob>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Dump full requests to the debug log.
    #[serde(default)]
    pub debug_rest_requests: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub server: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    pub user: String,

    #[serde(default)]
    pub password: String,

    pub name: String,

    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    #[serde(default)]
    pub ssl_root_cert: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Apply embedded schema migrations at startup.
    #[serde(default = "default_true")]
    pub schema_migration_enabled: bool,

    /// Exit after applying migrations.
    #[serde(default)]
    pub schema_migration_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentConfig {
    /// Pending records older than this are eligible for reaping.
    #[serde(default = "default_enroll_expiry_minutes")]
    pub enroll_expiry_minutes: i64,

    /// Max rows removed per reaper run.
    #[serde(default = "default_enroll_expiry_delete_limit")]
    pub enroll_expiry_delete_limit: i64,

    /// Floor for the Retry-After hint.
    #[serde(default = "default_retry_after")]
    pub retry_after_seconds: i64,

    /// Ceiling for the Retry-After hint, also the fallback when the rolling
    /// average is unavailable.
    #[serde(default = "default_max_retry_after")]
    pub max_retry_after_seconds: i64,

    /// Allow-list for the `mgmt_service` payload field.
    #[serde(default)]
    pub management_services: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_server")]
    pub server: String,

    #[serde(default = "default_cache_port")]
    pub port: u16,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub cache_db: i64,

    #[serde(default)]
    pub enabled: bool,

    /// average_enroll_time | sliding_window
    #[serde(default = "default_hint_strategy")]
    pub retry_after_hint_strategy: String,

    #[serde(default = "default_window_size")]
    pub enroll_time_window_size: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            server: default_cache_server(),
            port: default_cache_port(),
            password: String::new(),
            cache_db: 0,
            enabled: false,
            retry_after_hint_strategy: default_hint_strategy(),
            enroll_time_window_size: default_window_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Custom queue endpoint for local runs; cloud runs resolve the default.
    #[serde(default)]
    pub endpoint: String,

    pub pending_enroll_name: String,
    pub enroll_name: String,
    pub enroll_error_name: String,

    /// Long-poll seconds for the enrolled queue watch.
    #[serde(default = "default_watch_delay")]
    pub enroll_watch_delay: i32,

    /// Long-poll seconds for the enroll error queue watch.
    #[serde(default = "default_watch_delay")]
    pub enroll_error_watch_delay: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DstsConfig {
    pub host: String,
    pub port: u16,
}

/// Per token type issuer settings, keyed off the `X-HP-Token-Type` header.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenIssuerSettings {
    /// Validator to use: azuread | device | enrollment | app | test
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub issuer: String,

    #[serde(default)]
    pub audience: String,

    #[serde(default)]
    pub default_tenant_id: String,

    /// Subjects accepted for app tokens.
    #[serde(default)]
    pub allowed_app_ids: Vec<String>,
}

/// A token signing key provided through configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningKeyConfig {
    pub kid: String,
    /// Signing algorithm, e.g. RS256.
    pub alg: String,
    /// Public key in PEM format.
    pub pem: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledJob {
    #[serde(default)]
    pub enabled: bool,

    /// First run time of day, 24h "HH:MM:SS" UTC.
    #[serde(default)]
    pub start: String,

    /// Repeat interval, e.g. "30m", "24h".
    #[serde(default = "default_job_every")]
    pub every: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    7979
}
fn default_request_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_db_port() -> u16 {
    5432
}
fn default_ssl_mode() -> String {
    "disable".to_string()
}
fn default_max_connections() -> u32 {
    20
}
fn default_enroll_expiry_minutes() -> i64 {
    60
}
fn default_enroll_expiry_delete_limit() -> i64 {
    500
}
fn default_retry_after() -> i64 {
    5
}
fn default_max_retry_after() -> i64 {
    120
}
fn default_cache_server() -> String {
    "127.0.0.1".to_string()
}
fn default_cache_port() -> u16 {
    6379
}
fn default_hint_strategy() -> String {
    "average_enroll_time".to_string()
}
fn default_window_size() -> i64 {
    100
}
fn default_watch_delay() -> i32 {
    10
}
fn default_job_every() -> String {
    "24h".to_string()
}
fn default_true() -> bool {
    true
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with ES__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("ES").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.server.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "ES__DATABASE__SERVER must be set".to_string(),
            ));
        }
        if self.queue.pending_enroll_name.is_empty()
            || self.queue.enroll_name.is_empty()
            || self.queue.enroll_error_name.is_empty()
        {
            return Err(ConfigValidationError::MissingRequired(
                "queue names must be configured".to_string(),
            ));
        }
        if self.enrollment.retry_after_seconds > self.enrollment.max_retry_after_seconds {
            return Err(ConfigValidationError::InvalidValue(
                "retry_after_seconds cannot exceed max_retry_after_seconds".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigValidationError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|_| {
                ConfigValidationError::InvalidValue("invalid server host/port".to_string())
            })
    }

    pub fn database_config(&self) -> persistence::db::DatabaseConfig {
        persistence::db::DatabaseConfig {
            server: self.database.server.clone(),
            port: self.database.port,
            user: self.database.user.clone(),
            password: self.database.password.clone(),
            name: self.database.name.clone(),
            ssl_mode: self.database.ssl_mode.clone(),
            ssl_root_cert: self.database.ssl_root_cert.clone(),
            max_connections: self.database.max_connections,
        }
    }

    pub fn cache_config(&self) -> persistence::cache::CacheConfig {
        persistence::cache::CacheConfig {
            server: self.cache.server.clone(),
            port: self.cache.port,
            password: self.cache.password.clone(),
            cache_db: self.cache.cache_db,
            enabled: self.cache.enabled,
            retry_after_hint_strategy: self.cache.retry_after_hint_strategy.clone(),
            enroll_time_window_size: self.cache.enroll_time_window_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> config::ConfigBuilder<config::builder::DefaultState> {
        let defaults = r#"
            [server]
            host = "127.0.0.1"
            port = 7979

            [logging]
            level = "info"
            format = "json"

            [database]
            server = "localhost"
            port = 5432
            user = "es"
            name = "es"

            [enrollment]
            management_services = ["HPConnect"]

            [queue]
            pending_enroll_name = "pending_enroll"
            enroll_name = "enrolled"
            enroll_error_name = "enroll_error"

            [dsts]
            host = "localhost"
            port = 7001
        "#;
        config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml))
    }

    #[test]
    fn test_config_defaults() {
        let cfg: Config = base_config().build().unwrap().try_deserialize().unwrap();
        assert_eq!(cfg.enrollment.retry_after_seconds, 5);
        assert_eq!(cfg.enrollment.max_retry_after_seconds, 120);
        assert_eq!(cfg.queue.enroll_watch_delay, 10);
        assert!(!cfg.cache.enabled);
        assert!(cfg.database.schema_migration_enabled);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_config_rejects_inverted_retry_bounds() {
        let cfg: Config = base_config()
            .set_override("enrollment.retry_after_seconds", 300)
            .unwrap()
            .set_override("enrollment.max_retry_after_seconds", 60)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_token_types_table() {
        let cfg: Config = base_config()
            .set_override("token_types.azuread.type", "azuread")
            .unwrap()
            .set_override("token_types.azuread.issuer", "https://login.example.com/")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let settings = cfg.token_types.get("azuread").unwrap();
        assert_eq!(settings.kind, "azuread");
        assert!(settings.audience.is_empty());
    }
}
