//! Subscriber for the `pending_enroll` queue.
//!
//! Dispatches on message type: enroll and renew go to the CA, unenroll goes
//! straight to DSTS delete and then to the `enrolled` queue. On success the
//! follow-on message is published before the source message is deleted; on
//! failure an error message is published instead. The source message is
//! deleted last in every path.

use domain::models::{DeviceCertificate, EnrollCommand, EnrollKind, UnenrollCompleted};
use metrics::counter;
use shared::queue::{QueueClient, QueueMessage};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::clients::{ca::IssuedCertificate, CaClient, CaError, DstsClient, DstsError};

use super::{is_shutdown, send_error_message, WorkerQueues, RECEIVE_ERROR_BACKOFF};

#[derive(Debug, Error)]
enum ProcessError {
    #[error("csr is not base64 encoded")]
    BadCsr,

    #[error("unenroll requires a device id")]
    MissingDeviceId,

    #[error(transparent)]
    Ca(#[from] CaError),

    #[error(transparent)]
    Dsts(#[from] DstsError),

    #[error("could not send message to queue: {0}")]
    Publish(String),
}

pub struct PendingEnrollSubscriber {
    queue: QueueClient,
    queues: WorkerQueues,
    watch_delay: i32,
    ca: CaClient,
    dsts: DstsClient,
}

impl PendingEnrollSubscriber {
    pub fn new(
        queue: QueueClient,
        queues: WorkerQueues,
        watch_delay: i32,
        ca: CaClient,
        dsts: DstsClient,
    ) -> Self {
        Self {
            queue,
            queues,
            watch_delay,
            ca,
            dsts,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if is_shutdown(&shutdown) {
                        info!("Shutting down pending enroll queue watch");
                        break;
                    }
                }
                received = self.queue.receive_one(&self.queues.pending_enroll, self.watch_delay) => {
                    match received {
                        Ok(Some(message)) => self.process(message).await,
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "Error fetching pending enroll messages");
                            counter!("worker_receive_errors_total", "queue" => "pending_enroll")
                                .increment(1);
                            tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }

    async fn process(&self, message: QueueMessage) {
        let command = match serde_json::from_str::<EnrollCommand>(&message.body) {
            Ok(command) => command,
            Err(e) => {
                error!(error = %e, "Error unmarshalling pending enroll message");
                counter!("worker_parse_errors_total", "queue" => "pending_enroll").increment(1);
                return;
            }
        };

        if let Err(e) = self.process_command(&command).await {
            send_error_message(
                &self.queue,
                &self.queues.enroll_error,
                command.id,
                command.request_id,
                command.kind,
                e.to_string(),
            )
            .await;
        }

        if let Err(e) = self
            .queue
            .delete(&self.queues.pending_enroll, &message.receipt_handle)
            .await
        {
            error!(error = %e, "Removing pending enroll message failed");
            counter!("worker_delete_errors_total", "queue" => "pending_enroll").increment(1);
        }
    }

    async fn process_command(&self, command: &EnrollCommand) -> Result<(), ProcessError> {
        info!(
            kind = %command.kind,
            request_id = %command.request_id,
            enroll_id = %command.id,
            tenant_id = %command.tenant_id,
            "Pending enroll message"
        );

        if command.kind == EnrollKind::Unenroll {
            return self.delete_device(command).await;
        }

        // Enroll and renew share a payload; validate the CSR shape before
        // handing it to the CA.
        shared::crypto::decode_base64(&command.csr).map_err(|_| ProcessError::BadCsr)?;

        let issued: IssuedCertificate = match command.kind {
            EnrollKind::Enroll => {
                self.ca
                    .create_device_certificate(command.request_id, &command.tenant_id, &command.csr)
                    .await?
            }
            EnrollKind::RenewEnroll => {
                let device_id = command.device_id.ok_or(ProcessError::MissingDeviceId)?;
                self.ca
                    .renew_device_certificate(
                        command.request_id,
                        &command.tenant_id,
                        device_id,
                        &command.csr,
                    )
                    .await?
            }
            EnrollKind::Unenroll => unreachable!("handled above"),
        };

        info!(
            kind = %command.kind,
            enroll_id = %command.id,
            tenant_id = %command.tenant_id,
            "Created device certificate"
        );

        let registration = DeviceCertificate {
            request_id: command.request_id,
            tenant_id: command.tenant_id.clone(),
            enroll_id: command.id,
            device_id: issued.device_id,
            certificate: issued.certificate,
            parent_certificates: issued.parent_certificates,
            kind: command.kind,
            mgmt_service: command.mgmt_service.clone(),
            hardware_hash: command.hardware_hash.clone(),
        };
        let body = serde_json::to_string(&registration)
            .map_err(|e| ProcessError::Publish(e.to_string()))?;
        self.queue
            .send(&self.queues.pending_registration, &body)
            .await
            .map_err(|e| ProcessError::Publish(e.to_string()))?;

        info!(
            enroll_id = %command.id,
            tenant_id = %command.tenant_id,
            service = %command.mgmt_service,
            "Pending registration message sent"
        );
        Ok(())
    }

    /// Unenroll path: delete the device in DSTS, then publish the completion
    /// straight to the `enrolled` queue.
    async fn delete_device(&self, command: &EnrollCommand) -> Result<(), ProcessError> {
        let device_id = command.device_id.ok_or(ProcessError::MissingDeviceId)?;
        info!(device_id = %device_id, "Processing delete device");

        self.dsts
            .delete_device(command.request_id, &command.tenant_id, device_id)
            .await?;

        let completed = UnenrollCompleted {
            unenroll_id: command.id,
            request_id: command.request_id,
            tenant_id: command.tenant_id.clone(),
            device_id,
            kind: EnrollKind::Unenroll,
        };
        let body =
            serde_json::to_string(&completed).map_err(|e| ProcessError::Publish(e.to_string()))?;
        self.queue
            .send(&self.queues.enrolled, &body)
            .await
            .map_err(|e| ProcessError::Publish(e.to_string()))?;
        Ok(())
    }
}
