//! Background queue subscribers for the front service.
//!
//! Two long-running tasks: one drains the `enrolled` queue to finalize
//! records, one drains `enroll_error` to move failing records into their
//! error tables. Both observe a shared shutdown channel at each receive
//! boundary and exit at the next poll after it trips.

mod enroll_error;
mod enrolled;

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use enroll_error::EnrollErrorSubscriber;
pub use enrolled::EnrolledSubscriber;

/// Pause after a receive failure so a broken queue connection does not spin
/// the loop.
pub(crate) const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Handles for the spawned subscriber tasks plus the shutdown signal.
pub struct SubscriberSet {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    pub fn start(enrolled: EnrolledSubscriber, errors: EnrollErrorSubscriber) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = vec![
            tokio::spawn(enrolled.run(shutdown_rx.clone())),
            tokio::spawn(errors.run(shutdown_rx)),
        ];
        info!("Queue subscribers started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Trips the shutdown signal and waits for the subscriber loops to drain,
    /// bounded by `timeout`. An in-flight long-poll finishes its current
    /// receive; the loop exits at the next boundary.
    pub async fn shutdown(self, timeout: Duration) {
        info!("Signalling shutdown to enroll queue subscribers");
        let _ = self.shutdown_tx.send(true);

        let drain = async {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    warn!("Subscriber task panicked: {}", e);
                }
            }
        };
        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => info!("Queue subscribers drained"),
            Err(_) => warn!("Subscriber drain timed out after {:?}", timeout),
        }
    }
}

/// True when the shutdown signal has tripped.
pub(crate) fn is_shutdown(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}
