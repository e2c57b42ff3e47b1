//! Subscriber for the `enrolled` queue.
//!
//! A message here is a completed pipeline run: either a certificate bundle
//! for enroll/renew or a delete confirmation for unenroll. The record is
//! finalized first and the queue message deleted last, so a crash in
//! between redelivers a message whose replay is a no-op.

use domain::models::EnrolledMessage;
use metrics::counter;
use persistence::repositories::{EnrollRepository, UnenrollRepository};
use shared::queue::{QueueClient, QueueMessage};
use tokio::sync::watch;
use tracing::{error, info};

use super::{is_shutdown, RECEIVE_ERROR_BACKOFF};

pub struct EnrolledSubscriber {
    queue: QueueClient,
    queue_url: String,
    watch_delay: i32,
    enrolls: EnrollRepository,
    unenrolls: UnenrollRepository,
}

impl EnrolledSubscriber {
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
                        info!("Shutting down enrolled queue watch");
                        break;
                    }
                }
                received = self.queue.receive_one(&self.queue_url, self.watch_delay) => {
                    match received {
                        Ok(Some(message)) => self.process(message).await,
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "Error fetching enrolled messages");
                            counter!("enroll_subscriber_errors_total", "queue" => "enrolled")
                                .increment(1);
                            tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }

    async fn process(&self, message: QueueMessage) {
        let parsed = match EnrolledMessage::parse(&message.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                // Not deleted: the message reappears after the visibility
                // timeout for another attempt.
                error!(error = %e, "Error parsing enrolled message");
                counter!("enroll_subscriber_parse_errors_total", "queue" => "enrolled")
                    .increment(1);
                return;
            }
        };

        match parsed {
            EnrolledMessage::Certificate(certificate) => {
                match self.enrolls.complete(&certificate).await {
                    Ok(_) => {
                        counter!("enroll_completions_total", "type" => "enroll").increment(1);
                        info!(
                            enroll_id = %certificate.enroll_id,
                            device_id = %certificate.device_id,
                            "enrolled"
                        );
                    }
                    Err(e) => {
                        error!(
                            enroll_id = %certificate.enroll_id,
                            error = %e,
                            "could not update enroll record"
                        );
                        counter!("enroll_completion_failures_total", "type" => "enroll")
                            .increment(1);
                    }
                }
            }
            EnrolledMessage::Unenrolled(done) => {
                match self.unenrolls.complete(done.unenroll_id).await {
                    Ok(_) => {
                        counter!("enroll_completions_total", "type" => "unenroll").increment(1);
                        info!(
                            unenroll_id = %done.unenroll_id,
                            device_id = %done.device_id,
                            request_id = %done.request_id,
                            "unenrolled"
                        );
                    }
                    Err(e) => {
                        error!(
                            unenroll_id = %done.unenroll_id,
                            error = %e,
                            "could not update unenroll record"
                        );
                        counter!("enroll_completion_failures_total", "type" => "unenroll")
                            .increment(1);
                    }
                }
            }
        }

        // Delete last; listeners would otherwise pick up duplicates.
        if let Err(e) = self.queue.delete(&self.queue_url, &message.receipt_handle).await {
            error!(error = %e, "could not delete queue entry after process");
            counter!("enroll_subscriber_delete_errors_total", "queue" => "enrolled").increment(1);
        }
    }
}
