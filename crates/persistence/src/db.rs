//! Database connection management.

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tracing::{error, info};

/// Per-statement deadline on the server side.
const STATEMENT_TIMEOUT_MS: u64 = 10_000;

/// Deadline for acquiring a connection and for individual round-trips.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection retries at startup.
const MAX_CONNECT_RETRIES: u32 = 3;
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// disable | prefer | require | verify-ca | verify-full
    pub ssl_mode: String,
    /// Root CA bundle for verified SSL modes. Ignored when empty.
    pub ssl_root_cert: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    fn connect_options(&self) -> PgConnectOptions {
        let ssl_mode = match self.ssl_mode.as_str() {
            "disable" => PgSslMode::Disable,
            "require" => PgSslMode::Require,
            "verify-ca" => PgSslMode::VerifyCa,
            "verify-full" => PgSslMode::VerifyFull,
            _ => PgSslMode::Prefer,
        };

        let mut options = PgConnectOptions::new()
            .host(&self.server)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
            .ssl_mode(ssl_mode)
            .application_name("enroll-service")
            .options([("statement_timeout", STATEMENT_TIMEOUT_MS.to_string())]);

        if !self.ssl_root_cert.is_empty() {
            options = options.ssl_root_cert(&self.ssl_root_cert);
        }
        options
    }
}

/// Connects to the enroll database, retrying a bounded number of times so a
/// briefly unavailable database does not fail startup.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let options = config.connect_options();
    let mut last_error = None;

    for attempt in 1..=MAX_CONNECT_RETRIES {
        let result = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options.clone())
            .await;

        match result {
            Ok(pool) => {
                info!(
                    server = %config.server,
                    port = config.port,
                    "Connected to the enroll database"
                );
                return Ok(pool);
            }
            Err(e) => {
                error!(
                    attempt,
                    server = %config.server,
                    error = %e,
                    "Failed to connect to enroll database"
                );
                last_error = Some(e);
                if attempt < MAX_CONNECT_RETRIES {
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
            }
        }
    }

    Err(last_error.expect("at least one connection attempt"))
}

/// Embedded schema migrations, applied at startup when migration is enabled.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("src/migrations")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_mapping_defaults_to_prefer() {
        let config = DatabaseConfig {
            server: "localhost".into(),
            port: 5432,
            user: "es".into(),
            password: "es".into(),
            name: "es".into(),
            ssl_mode: "bogus".into(),
            ssl_root_cert: String::new(),
            max_connections: 5,
        };
        // Should not panic; unknown modes fall back to prefer.
        let _ = config.connect_options();
    }
}
