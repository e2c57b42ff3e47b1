use std::time::Duration;

use anyhow::{Context, Result};
use shared::queue::QueueClient;
use tracing::info;

use enroll_worker::clients::{CaClient, DstsClient};
use enroll_worker::config::Config;
use enroll_worker::http;
use enroll_worker::subscribers::{
    PendingEnrollSubscriber, PendingRegistrationSubscriber, SubscriberSet, WorkerQueues,
};

/// Bound on draining subscribers at shutdown.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load().context("config load failed")?;

    http::init_logging(&config.logging);
    http::init_metrics();

    info!("Starting Enrollment Worker v{}", env!("CARGO_PKG_VERSION"));

    // Both downstream services must answer a ping before we take work.
    let ca = CaClient::new(&config.ca.host, config.ca.port).context("ca client init failed")?;
    ca.ping().await.context("ca client failed to connect")?;

    let dsts = DstsClient::new(&config.dsts.host, config.dsts.port)
        .context("dsts client init failed")?;
    dsts.ping().await.context("dsts client failed to connect")?;

    let endpoint = (!config.queue.endpoint.is_empty()).then_some(config.queue.endpoint.as_str());
    let queue = QueueClient::connect(endpoint).await;
    let queues = WorkerQueues {
        pending_enroll: queue
            .queue_url(&config.queue.pending_enroll_name)
            .await
            .context("failed to resolve pending enroll queue")?,
        pending_registration: queue
            .queue_url(&config.queue.pending_registration_name)
            .await
            .context("failed to resolve pending registration queue")?,
        enrolled: queue
            .queue_url(&config.queue.enroll_name)
            .await
            .context("failed to resolve enrolled queue")?,
        enroll_error: queue
            .queue_url(&config.queue.enroll_error_name)
            .await
            .context("failed to resolve enroll error queue")?,
    };

    let subscribers = SubscriberSet::start(
        PendingEnrollSubscriber::new(
            queue.clone(),
            queues.clone(),
            config.queue.pending_enroll_watch_delay,
            ca,
            dsts.clone(),
        ),
        PendingRegistrationSubscriber::new(
            queue.clone(),
            queues.clone(),
            config.queue.pending_registration_watch_delay,
            dsts,
        ),
    );

    // Health and metrics listener; also anchors the process lifetime.
    let addr = config.socket_addr()?;
    info!("Worker health endpoint on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal");
    };

    axum::serve(listener, http::create_router())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    subscribers.shutdown(SHUTDOWN_DRAIN_TIMEOUT).await;

    info!("Worker shutdown complete");
    Ok(())
}
