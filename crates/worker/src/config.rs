use std::net::SocketAddr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub ca: EndpointConfig,
    pub dsts: EndpointConfig,
    pub queue: QueueConfig,
}

/// Health and metrics listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Custom queue endpoint for local runs; cloud runs resolve the default.
    #[serde(default)]
    pub endpoint: String,

    pub pending_enroll_name: String,
    pub pending_registration_name: String,
    pub enroll_name: String,
    pub enroll_error_name: String,

    #[serde(default = "default_watch_delay")]
    pub pending_enroll_watch_delay: i32,

    #[serde(default = "default_watch_delay")]
    pub pending_registration_watch_delay: i32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    7980
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_watch_delay() -> i32 {
    10
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/worker.toml - base configuration
    /// 2. config/worker-local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with ESW__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("config/worker"))
            .add_source(config::File::with_name("config/worker-local").required(false))
            .add_source(config::Environment::with_prefix("ESW").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, config::ConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|_| config::ConfigError::Message("invalid server host/port".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let defaults = r#"
            [server]

            [logging]

            [ca]
            host = "localhost"
            port = 7000

            [dsts]
            host = "localhost"
            port = 7001

            [queue]
            pending_enroll_name = "pending_enroll"
            pending_registration_name = "pending_registration"
            enroll_name = "enrolled"
            enroll_error_name = "enroll_error"
        "#;
        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.server.port, 7980);
        assert_eq!(cfg.queue.pending_enroll_watch_delay, 10);
        assert!(cfg.socket_addr().is_ok());
    }
}
