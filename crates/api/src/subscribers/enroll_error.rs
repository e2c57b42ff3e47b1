//! Subscriber for the `enroll_error` queue.
//!
//! Any pipeline stage that fails posts here. The failing record is moved
//! into its error sibling table in one transaction; the queue message is
//! deleted after processing regardless of outcome, since the move is keyed
//! by id and replays against an already-moved row are no-ops.

use domain::models::{EnrollErrorMessage, EnrollKind};
use metrics::counter;
use persistence::repositories::{EnrollRepository, UnenrollRepository};
use shared::queue::{QueueClient, QueueMessage};
use tokio::sync::watch;
use tracing::{error, info};

use super::{is_shutdown, RECEIVE_ERROR_BACKOFF};

pub struct EnrollErrorSubscriber {
    queue: QueueClient,
    queue_url: String,
    watch_delay: i32,
    enrolls: EnrollRepository,
    unenrolls: UnenrollRepository,
}

impl EnrollErrorSubscriber {
    pub fn new(
        queue: QueueClient,
        queue_url: String,
        watch_delay: i32,
        enrolls: EnrollRepository,
        unenrolls: UnenrollRepository,
    ) -> Self {
        Self {
            queue,
            queue_url,
            watch_delay,
            enrolls,
            unenrolls,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if is_shutdown(&shutdown) {
                        info!("Shutting down enroll error queue watch");
                        break;
                    }
                }
                received = self.queue.receive_one(&self.queue_url, self.watch_delay) => {
                    match received {
                        Ok(Some(message)) => self.process(message).await,
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "Error fetching enroll error messages");
                            counter!("enroll_subscriber_errors_total", "queue" => "enroll_error")
                                .increment(1);
                            tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }

    async fn process(&self, message: QueueMessage) {
        match serde_json::from_str::<EnrollErrorMessage>(&message.body) {
            Ok(parsed) => self.fail_record(&parsed).await,
            Err(e) => {
                // Unknown shapes are logged and discarded.
                error!(error = %e, "Unknown payload in enroll error");
                counter!("enroll_subscriber_parse_errors_total", "queue" => "enroll_error")
                    .increment(1);
            }
        }

        if let Err(e) = self.queue.delete(&self.queue_url, &message.receipt_handle).await {
            error!(error = %e, "could not delete error queue entry after process");
            counter!("enroll_subscriber_delete_errors_total", "queue" => "enroll_error")
                .increment(1);
        }
    }

    async fn fail_record(&self, error_message: &EnrollErrorMessage) {
        let result = match error_message.kind {
            EnrollKind::Enroll | EnrollKind::RenewEnroll => {
                self.enrolls.fail(error_message).await
            }
            EnrollKind::Unenroll => self.unenrolls.fail(error_message).await,
        };

        match result {
            Ok(()) => {
                counter!("enroll_failures_recorded_total", "type" => error_message.kind.to_string())
                    .increment(1);
                info!(
                    enroll_id = %error_message.enroll_id,
                    code = error_message.error_code,
                    error = %error_message.error_message,
                    "enroll error recorded"
                );
            }
            Err(e) => {
                error!(
                    enroll_id = %error_message.enroll_id,
                    error = %e,
                    "Failed updating enroll failure"
                );
                counter!(
                    "enroll_failure_record_errors_total",
                    "type" => error_message.kind.to_string()
                )
                .increment(1);
            }
        }
    }
}
