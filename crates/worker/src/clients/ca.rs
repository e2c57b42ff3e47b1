//! Certificate Authority client.
//!
//! Two operations: issue a certificate for a new device, renew the
//! certificate of an existing one. The CA allocates the device id at issue
//! time. A non-zero status in an otherwise successful response is a
//! failure.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

/// Per-call deadline for CA round-trips.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(3);

/// Bounded startup connectivity check.
const PING_RETRIES: u32 = 3;
const PING_RETRY_WAIT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum CaError {
    #[error("ca request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to create device certifiate!")]
    CreateFailed(u32),

    #[error("failed to renew device certifiate!")]
    RenewFailed(u32),
}

#[derive(Debug, Serialize)]
struct CertificateRequest<'a> {
    request_id: Uuid,
    tenant_id: &'a str,
    /// Base64 encoded CSR.
    csr: &'a str,
}

#[derive(Debug, Deserialize)]
struct CertificateResponse {
    device_id: Uuid,
    /// Base64 encoded device certificate.
    #[serde(default)]
    device_certificate: String,
    /// Base64 encoded root and signing certificates.
    #[serde(default)]
    parent_certificates: String,
    status: u32,
}

/// Certificate material returned by the CA.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub device_id: Uuid,
    pub certificate: String,
    pub parent_certificates: String,
}

#[derive(Clone)]
pub struct CaClient {
    http: Client,
    base_url: String,
}

impl CaClient {
    pub fn new(host: &str, port: u16) -> Result<Self, CaError> {
        let http = Client::builder().timeout(OPERATION_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: format!("http://{host}:{port}"),
        })
    }

    /// Verifies the CA is reachable at startup, retrying a bounded number of
    /// times. Startup fails if the CA stays unreachable.
    pub async fn ping(&self) -> Result<(), CaError> {
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
                    info!(address = %self.base_url, "successful ping to CA");
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "could not ping ca server");
                    last_error = Some(e);
                    tokio::time::sleep(PING_RETRY_WAIT).await;
                }
            }
        }
        Err(CaError::Http(last_error.expect("at least one ping attempt")))
    }

    /// `CreateDeviceCertificate`. The request id makes retries idempotent on
    /// the CA side.
    pub async fn create_device_certificate(
        &self,
        request_id: Uuid,
        tenant_id: &str,
        csr: &str,
    ) -> Result<IssuedCertificate, CaError> {
        let response: CertificateResponse = self
            .http
            .post(format!("{}/v1/certificates", self.base_url))
            .json(&CertificateRequest {
                request_id,
                tenant_id,
                csr,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != 0 {
            error!(code = response.status, "Response from certificate authority");
            return Err(CaError::CreateFailed(response.status));
        }
        Ok(IssuedCertificate {
            device_id: response.device_id,
            certificate: response.device_certificate,
            parent_certificates: response.parent_certificates,
        })
    }

    /// `RenewDeviceCertificate` for an already enrolled device.
    pub async fn renew_device_certificate(
        &self,
        request_id: Uuid,
        tenant_id: &str,
        device_id: Uuid,
        csr: &str,
    ) -> Result<IssuedCertificate, CaError> {
        let response: CertificateResponse = self
            .http
            .post(format!(
                "{}/v1/certificates/{}/renew",
                self.base_url, device_id
            ))
            .json(&CertificateRequest {
                request_id,
                tenant_id,
                csr,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != 0 {
            error!(code = response.status, "Response from certificate authority");
            return Err(CaError::RenewFailed(response.status));
        }
        Ok(IssuedCertificate {
            device_id: response.device_id,
            certificate: response.device_certificate,
            parent_certificates: response.parent_certificates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_strings_are_stable() {
        // These strings travel in enroll_error messages and are matched by
        // operators; they must not drift.
        assert_eq!(
            CaError::CreateFailed(13).to_string(),
            "failed to create device certifiate!"
        );
        assert_eq!(
            CaError::RenewFailed(13).to_string(),
            "failed to renew device certifiate!"
        );
    }
}
