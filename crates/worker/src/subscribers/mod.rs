//! Worker queue subscribers.
//!
//! `pending_enroll` feeds the CA stage (and device deletes), and
//! `pending_registration` feeds the DSTS stage. Per-message failures are
//! not retried locally; they are published to `enroll_error` so the front
//! moves the record into its error table and the device learns of the
//! failure on its next status poll.

mod pending_enroll;
mod pending_registration;

use std::time::Duration;

use domain::models::{EnrollErrorMessage, EnrollKind};
use shared::queue::QueueClient;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

pub use pending_enroll::PendingEnrollSubscriber;
pub use pending_registration::PendingRegistrationSubscriber;

/// Error code carried on enroll_error messages for processing failures.
pub(crate) const ERROR_CODE_PROCESSING: i32 = 13;

/// Pause after a receive failure so a broken queue connection does not spin
/// the loop.
pub(crate) const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Resolved queue urls for the worker side of the pipeline.
#[derive(Debug, Clone)]
pub struct WorkerQueues {
    pub pending_enroll: String,
    pub pending_registration: String,
    pub enrolled: String,
    pub enroll_error: String,
}

/// Handles for the spawned subscriber tasks plus the shutdown signal.
pub struct SubscriberSet {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    pub fn start(
        pending_enroll: PendingEnrollSubscriber,
        pending_registration: PendingRegistrationSubscriber,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = vec![
            tokio::spawn(pending_enroll.run(shutdown_rx.clone())),
            tokio::spawn(pending_registration.run(shutdown_rx)),
        ];
        info!("Worker queue subscribers started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Trips the shutdown signal and waits for the loops to drain, bounded
    /// by `timeout`.
    pub async fn shutdown(self, timeout: Duration) {
        info!("Signalling shutdown to worker queue subscribers");
        let _ = self.shutdown_tx.send(true);

        let drain = async {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    warn!("Subscriber task panicked: {}", e);
                }
            }
        };
        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => info!("Worker queue subscribers drained"),
            Err(_) => warn!("Subscriber drain timed out after {:?}", timeout),
        }
    }
}

pub(crate) fn is_shutdown(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Publishes a processing failure to the error queue. A failed publish is
/// logged and otherwise dropped; the caller proceeds to delete the source
/// message, and the abandoned record is eventually reaped.
pub(crate) async fn send_error_message(
    queue: &QueueClient,
    error_queue_url: &str,
    enroll_id: Uuid,
    request_id: Uuid,
    kind: EnrollKind,
    message: String,
) {
    let payload = EnrollErrorMessage {
        enroll_id,
        error_code: ERROR_CODE_PROCESSING,
        error_message: message,
        kind,
        request_id,
    };
    let body = match serde_json::to_string(&payload) {
        Ok(body) => body,
        Err(e) => {
            error!(enroll_id = %enroll_id, error = %e, "Error encoding enroll error message");
            return;
        }
    };
    info!(message = %body, "Sending error message");
    if let Err(e) = queue.send(error_queue_url, &body).await {
        error!(
            enroll_id = %enroll_id,
            error = %e,
            "Error sending message"
        );
        metrics::counter!("worker_error_publish_failures_total").increment(1);
    }
}
