//! Subscriber for the `pending_registration` queue.
//!
//! Second stage of the pipeline: the certificate exists, the device still
//! has to be registered with DSTS. On success the payload moves unchanged
//! to the `enrolled` queue.

use domain::models::{DeviceCertificate, EnrollKind};
use metrics::counter;
use shared::queue::{QueueClient, QueueMessage};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::clients::{DstsClient, DstsError};

use super::{is_shutdown, send_error_message, WorkerQueues, RECEIVE_ERROR_BACKOFF};

#[derive(Debug, Error)]
enum ProcessError {
    #[error("certificate is not base64 encoded")]
    BadCertificate,

    #[error("invalid device certificate type: unenroll")]
    InvalidKind,

    #[error(transparent)]
    Dsts(#[from] DstsError),

    #[error("could not send message to queue: {0}")]
    Publish(String),
}

pub struct PendingRegistrationSubscriber {
    queue: QueueClient,
    queues: WorkerQueues,
    watch_delay: i32,
    dsts: DstsClient,
}

impl PendingRegistrationSubscriber {
    pub fn new(
        queue: QueueClient,
        queues: WorkerQueues,
        watch_delay: i32,
        dsts: DstsClient,
    ) -> Self {
        Self {
            queue,
            queues,
            watch_delay,
            dsts,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if is_shutdown(&shutdown) {
                        info!("Shutting down pending registration queue watch");
                        break;
                    }
                }
                received = self.queue.receive_one(
                    &self.queues.pending_registration,
                    self.watch_delay,
                ) => {
                    match received {
                        Ok(Some(message)) => self.process(message).await,
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "Failed fetching registration messages");
                            counter!(
                                "worker_receive_errors_total",
                                "queue" => "pending_registration"
                            )
                            .increment(1);
                            tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }

    async fn process(&self, message: QueueMessage) {
        let certificate = match serde_json::from_str::<DeviceCertificate>(&message.body) {
            Ok(certificate) => certificate,
            Err(e) => {
                error!(error = %e, "Error unmarshaling pending registration message");
                counter!("worker_parse_errors_total", "queue" => "pending_registration")
                    .increment(1);
                return;
            }
        };

        if let Err(e) = self.register(&certificate).await {
            send_error_message(
                &self.queue,
                &self.queues.enroll_error,
                certificate.enroll_id,
                certificate.request_id,
                certificate.kind,
                e.to_string(),
            )
            .await;
        }

        if let Err(e) = self
            .queue
            .delete(&self.queues.pending_registration, &message.receipt_handle)
            .await
        {
            error!(error = %e, "Removing pending registration message failed");
            counter!("worker_delete_errors_total", "queue" => "pending_registration").increment(1);
        }
    }

    async fn register(&self, certificate: &DeviceCertificate) -> Result<(), ProcessError> {
        info!(
            enroll_id = %certificate.enroll_id,
            tenant_id = %certificate.tenant_id,
            kind = %certificate.kind,
            service = %certificate.mgmt_service,
            "Processing pending registration"
        );

        // The certificate travels base64 encoded; reject damage early.
        shared::crypto::decode_base64(&certificate.certificate)
            .map_err(|_| ProcessError::BadCertificate)?;

        match certificate.kind {
            EnrollKind::Enroll => self.dsts.create_device(certificate).await?,
            EnrollKind::RenewEnroll => self.dsts.update_device(certificate).await?,
            EnrollKind::Unenroll => return Err(ProcessError::InvalidKind),
        }

        let body = serde_json::to_string(certificate)
            .map_err(|e| ProcessError::Publish(e.to_string()))?;
        self.queue
            .send(&self.queues.enrolled, &body)
            .await
            .map_err(|e| ProcessError::Publish(e.to_string()))?;

        info!(
            enroll_id = %certificate.enroll_id,
            tenant_id = %certificate.tenant_id,
            device_id = %certificate.device_id,
            kind = %certificate.kind,
            service = %certificate.mgmt_service,
            "Enrolled message sent"
        );
        Ok(())
    }
}
