use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use persistence::cache::CacheClient;
use persistence::repositories::{
    EnrollRepository, PublicKeyRepository, UnenrollRepository,
};
use shared::queue::QueueClient;
use tracing::info;

use enroll_api::app::{create_app, AppState, QueueUrls};
use enroll_api::auth::{KeyStore, TokenManager};
use enroll_api::clients::DstsClient;
use enroll_api::config::Config;
use enroll_api::jobs::{self, JobScheduler, PendingEnrollGaugeJob, ReapExpiredEnrollsJob};
use enroll_api::middleware;
use enroll_api::subscribers::{EnrollErrorSubscriber, EnrolledSubscriber, SubscriberSet};

/// Bound on draining subscribers and jobs at shutdown.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load().context("config load failed")?;

    middleware::logging::init_logging(&config.logging);
    middleware::init_metrics();

    info!("Starting Device Enrollment Service v{}", env!("CARGO_PKG_VERSION"));

    // Database, then migrations.
    let pool = persistence::db::create_pool(&config.database_config())
        .await
        .context("database init failed")?;

    if config.database.schema_migration_enabled {
        info!("Starting database schema migration");
        persistence::db::migrator()
            .run(&pool)
            .await
            .context("schema migration failed")?;
        info!("Successfully completed schema migration for the database");
    } else {
        info!("Database schema migration is disabled. Skipping ...");
    }
    if config.database.schema_migration_mode {
        info!("Exit after migration");
        return Ok(());
    }

    // Cache is required when enabled; a misconfigured cache fails startup.
    let cache = CacheClient::connect(&config.cache_config())
        .await
        .context("cache init failed")?;

    // DSTS backs enrollment token validation.
    let dsts = DstsClient::new(&config.dsts.host, config.dsts.port)
        .context("dsts client init failed")?;
    dsts.ping().await.context("dsts client failed to connect")?;

    // Queue client and url resolution for the three front-side queues.
    let endpoint = (!config.queue.endpoint.is_empty()).then_some(config.queue.endpoint.as_str());
    let queue = QueueClient::connect(endpoint).await;
    let queue_urls = QueueUrls {
        pending_enroll: queue
            .queue_url(&config.queue.pending_enroll_name)
            .await
            .context("failed to resolve pending enroll queue")?,
        enrolled: queue
            .queue_url(&config.queue.enroll_name)
            .await
            .context("failed to resolve enrolled queue")?,
        enroll_error: queue
            .queue_url(&config.queue.enroll_error_name)
            .await
            .context("failed to resolve enroll error queue")?,
    };

    // Signing keys: stored keys plus any seeded through configuration.
    let key_store = KeyStore::load(PublicKeyRepository::new(pool.clone()))
        .await
        .context("failed to load signing keys")?;
    for key in &config.token_signing_keys {
        key_store
            .register(&key.kid, &key.alg, &key.pem)
            .await
            .context("failed to register signing key")?;
    }

    let enrolls = EnrollRepository::new(pool.clone(), cache.clone());
    let unenrolls = UnenrollRepository::new(pool.clone(), cache.clone());

    let config = Arc::new(config);
    let token_manager = Arc::new(TokenManager::new(
        config.token_types.clone(),
        Arc::new(key_store),
        Arc::new(dsts),
    ));

    let state = AppState {
        config: config.clone(),
        enrolls: enrolls.clone(),
        unenrolls: unenrolls.clone(),
        cache: cache.clone(),
        queue: queue.clone(),
        queue_urls: Arc::new(queue_urls.clone()),
        token_manager,
    };

    // Background subscribers for the enrolled and error queues.
    let subscribers = SubscriberSet::start(
        EnrolledSubscriber::new(
            queue.clone(),
            queue_urls.enrolled.clone(),
            config.queue.enroll_watch_delay,
            enrolls.clone(),
            unenrolls.clone(),
        ),
        EnrollErrorSubscriber::new(
            queue.clone(),
            queue_urls.enroll_error.clone(),
            config.queue.enroll_error_watch_delay,
            enrolls.clone(),
            unenrolls.clone(),
        ),
    );

    // Scheduled jobs.
    let mut scheduler = JobScheduler::new();
    scheduler.register(PendingEnrollGaugeJob::new(enrolls.clone()));
    if let Some(job) = config.scheduled_jobs.get("delete_expired_enrolls") {
        if job.enabled {
            let every = jobs::parse_every(&job.every)
                .map_err(|e| anyhow::anyhow!("scheduled job interval: {e}"))?;
            let start_time = if job.start.is_empty() {
                None
            } else {
                Some(
                    NaiveTime::parse_from_str(&job.start, "%H:%M:%S")
                        .context("scheduled job start time")?,
                )
            };
            scheduler.register(ReapExpiredEnrollsJob::new(
                enrolls.clone(),
                config.enrollment.enroll_expiry_minutes,
                config.enrollment.enroll_expiry_delete_limit,
                every,
                start_time,
            ));
        } else {
            info!("Skipping disabled job delete_expired_enrolls");
        }
    }
    scheduler.start();

    // Serve until interrupted.
    let app = create_app(state);
    let addr = config.socket_addr()?;
    info!("Starting enrollment REST server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Drain background work before closing connections.
    subscribers.shutdown(SHUTDOWN_DRAIN_TIMEOUT).await;
    scheduler.shutdown();
    scheduler.wait_for_shutdown(SHUTDOWN_DRAIN_TIMEOUT).await;
    pool.close().await;

    info!("Server shutdown complete");
    Ok(())
}
