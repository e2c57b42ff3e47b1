//! Device Security Token Service client.
//!
//! DSTS owns device identities. The worker registers a device after the CA
//! issued its certificate, updates the stored certificate on renew, and
//! deletes the device on unenroll.

use std::time::Duration;

use domain::models::DeviceCertificate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

/// Per-call deadline for DSTS round-trips.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(3);

/// Bounded startup connectivity check.
const PING_RETRIES: u32 = 3;
const PING_RETRY_WAIT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum DstsError {
    #[error("dsts request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("dsts create device error: {0}")]
    CreateFailed(u32),

    #[error("dsts update device error: {0}")]
    UpdateFailed(u32),

    #[error("dsts delete device error: {0}")]
    DeleteFailed(u32),
}

#[derive(Debug, Serialize)]
struct CreateDeviceRequest<'a> {
    request_id: Uuid,
    tenant_id: &'a str,
    device_id: Uuid,
    /// Base64 encoded device certificate.
    device_certificate: &'a str,
    mgmt_service: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    hardware_hash: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateDeviceRequest<'a> {
    request_id: Uuid,
    tenant_id: &'a str,
    /// Base64 encoded device certificate.
    device_certificate: &'a str,
    /// Fields touched by this update.
    update_mask: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct DeleteDeviceRequest<'a> {
    request_id: Uuid,
    tenant_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: u32,
}

#[derive(Clone)]
pub struct DstsClient {
    http: Client,
    base_url: String,
}

impl DstsClient {
    pub fn new(host: &str, port: u16) -> Result<Self, DstsError> {
        let http = Client::builder().timeout(OPERATION_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: format!("http://{host}:{port}"),
        })
    }

    pub async fn ping(&self) -> Result<(), DstsError> {
        let mut last_error = None;
        for _ in 0..PING_RETRIES {
            match self
                .http
                .get(format!("{}/health", self.base_url))
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                Ok(_) => {
                    info!(address = %self.base_url, "successful ping to DSTS");
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "could not ping dsts server");
                    last_error = Some(e);
                    tokio::time::sleep(PING_RETRY_WAIT).await;
                }
            }
        }
        Err(DstsError::Http(last_error.expect("at least one ping attempt")))
    }

    /// `CreateDevice` for a freshly issued certificate.
    pub async fn create_device(&self, certificate: &DeviceCertificate) -> Result<(), DstsError> {
        let response: StatusResponse = self
            .http
            .post(format!("{}/v1/devices", self.base_url))
            .json(&CreateDeviceRequest {
                request_id: certificate.request_id,
                tenant_id: &certificate.tenant_id,
                device_id: certificate.device_id,
                device_certificate: &certificate.certificate,
                mgmt_service: &certificate.mgmt_service,
                hardware_hash: &certificate.hardware_hash,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != 0 {
            return Err(DstsError::CreateFailed(response.status));
        }
        Ok(())
    }

    /// `UpdateDevice` with a certificate-only field mask, used on renew.
    pub async fn update_device(&self, certificate: &DeviceCertificate) -> Result<(), DstsError> {
        let response: StatusResponse = self
            .http
            .patch(format!(
                "{}/v1/devices/{}",
                self.base_url, certificate.device_id
            ))
            .json(&UpdateDeviceRequest {
                request_id: certificate.request_id,
                tenant_id: &certificate.tenant_id,
                device_certificate: &certificate.certificate,
                update_mask: &["certificate"],
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != 0 {
            return Err(DstsError::UpdateFailed(response.status));
        }
        Ok(())
    }

    /// `DeleteDevice` on unenroll.
    pub async fn delete_device(
        &self,
        request_id: Uuid,
        tenant_id: &str,
        device_id: Uuid,
    ) -> Result<(), DstsError> {
        let response: StatusResponse = self
            .http
            .delete(format!("{}/v1/devices/{}", self.base_url, device_id))
            .json(&DeleteDeviceRequest {
                request_id,
                tenant_id,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != 0 {
            return Err(DstsError::DeleteFailed(response.status));
        }
        Ok(())
    }
}
