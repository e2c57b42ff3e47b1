//! Redis write-through cache.
//!
//! The cache is a derived projection over the durable store: enroll and
//! unenroll status entries, CSR hash markers, policy projections, and the
//! rolling enroll-duration statistics behind the Retry-After hint. Every
//! operation is bounded by a short deadline and every failure is non-fatal;
//! callers fall back to the database.
//!
//! A miss (`CacheError::Miss`) is authoritative "not present". Any other
//! error means the cache could not answer and must not be interpreted as
//! absence.

mod status;
mod timing;

use std::time::Duration;

use metrics::counter;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::info;

pub use timing::RetryHintStrategy;

/// Deadline for individual cache round-trips.
const CACHE_TIMEOUT: Duration = Duration::from_secs(1);

/// TTL for status entries.
const TTL_STATUS_SECS: u64 = 300;

/// TTL for CSR hash markers.
const TTL_CSR_HASH_SECS: u64 = 600;

const KEY_PREFIX_ENROLL_STATUS: &str = "status:";
const KEY_PREFIX_UNENROLL_STATUS: &str = "unenroll_status:";
const KEY_PREFIX_CSR_HASH: &str = "csrhash:";
const KEY_PREFIX_POLICY: &str = "policy:";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("item not found in cache")]
    Miss,

    #[error("caching is disabled")]
    Disabled,

    #[error("cache operation timed out")]
    Deadline,

    #[error("cache operation failed: {0}")]
    Unavailable(#[from] redis::RedisError),

    #[error("failed to decode cache entry: {0}")]
    Decode(#[from] serde_json::Error),
}

impl CacheError {
    /// True when the error is an authoritative "not present" rather than an
    /// unavailable cache.
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub server: String,
    pub port: u16,
    pub password: String,
    pub cache_db: i64,
    pub enabled: bool,
    pub retry_after_hint_strategy: String,
    pub enroll_time_window_size: i64,
}

/// Client for the enroll cache. Cloning is cheap; the underlying connection
/// is multiplexed.
#[derive(Clone)]
pub struct CacheClient {
    connection: Option<ConnectionManager>,
    strategy: RetryHintStrategy,
    window_size: i64,
}

impl CacheClient {
    /// Connects to the enroll cache, or returns a disabled client when
    /// caching is turned off in configuration.
    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        let strategy = RetryHintStrategy::parse(&config.retry_after_hint_strategy);
        if !config.enabled {
            info!("Caching is disabled - nothing to initialize");
            return Ok(Self {
                connection: None,
                strategy,
                window_size: config.enroll_time_window_size,
            });
        }

        let url = if config.password.is_empty() {
            format!("redis://{}:{}/{}", config.server, config.port, config.cache_db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                config.password, config.server, config.port, config.cache_db
            )
        };
        let client = redis::Client::open(url)?;
        let mut connection = ConnectionManager::new(client).await?;

        // Ping so a misconfigured cache fails startup instead of every request.
        tokio::time::timeout(
            CACHE_TIMEOUT,
            redis::cmd("PING").query_async::<String>(&mut connection),
        )
        .await
        .map_err(|_| CacheError::Deadline)??;

        info!(
            server = %config.server,
            port = config.port,
            "Successfully initialized the enroll cache"
        );
        Ok(Self {
            connection: Some(connection),
            strategy,
            window_size: config.enroll_time_window_size,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.connection.is_some()
    }

    fn connection(&self) -> Result<ConnectionManager, CacheError> {
        self.connection.clone().ok_or(CacheError::Disabled)
    }

    async fn get_string(&self, key: &str) -> Result<String, CacheError> {
        let mut connection = self.connection()?;
        let value: Option<String> = tokio::time::timeout(
            CACHE_TIMEOUT,
            redis::cmd("GET").arg(key).query_async(&mut connection),
        )
        .await
        .map_err(|_| CacheError::Deadline)??;
        value.ok_or(CacheError::Miss)
    }

    async fn set_string(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let mut connection = self.connection()?;
        tokio::time::timeout(
            CACHE_TIMEOUT,
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .query_async::<()>(&mut connection),
        )
        .await
        .map_err(|_| CacheError::Deadline)??;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), CacheError> {
        let mut connection = self.connection()?;
        tokio::time::timeout(
            CACHE_TIMEOUT,
            redis::cmd("DEL").arg(key).query_async::<()>(&mut connection),
        )
        .await
        .map_err(|_| CacheError::Deadline)??;
        Ok(())
    }
}

pub(crate) fn report_cache_hit(function: &'static str) {
    counter!("enroll_cache_hits_total", "function" => function).increment(1);
}

pub(crate) fn report_cache_error(operation: &'static str, function: &'static str) {
    counter!(
        "enroll_cache_errors_total",
        "operation" => operation,
        "function" => function
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_cache_reports_disabled() {
        let config = CacheConfig {
            server: "localhost".into(),
            port: 6379,
            password: String::new(),
            cache_db: 0,
            enabled: false,
            retry_after_hint_strategy: "average_enroll_time".into(),
            enroll_time_window_size: 10,
        };
        let cache = CacheClient::connect(&config).await.unwrap();
        assert!(!cache.is_enabled());

        let err = cache.get_string("status:any").await.unwrap_err();
        assert!(matches!(err, CacheError::Disabled));
        assert!(!err.is_miss());
    }

    #[test]
    fn test_miss_is_authoritative() {
        assert!(CacheError::Miss.is_miss());
        assert!(!CacheError::Deadline.is_miss());
    }
}
