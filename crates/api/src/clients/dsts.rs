//! DSTS client for the front service.
//!
//! The front only needs one DSTS operation: enrollment token validation,
//! used by the enrollment token validator. Device registration against DSTS
//! happens in the worker.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

/// Per-call deadline for DSTS round-trips.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(3);

/// Bounded startup connectivity check.
const PING_RETRIES: u32 = 3;
const PING_RETRY_WAIT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum DstsError {
    #[error("dsts request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("dsts validate enrollment token error: {0}")]
    Status(u32),
}

#[derive(Debug, Serialize)]
struct ValidateTokenRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateTokenResponse {
    #[serde(default)]
    tenant_id: String,
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

    /// Verifies DSTS is reachable at startup. Retries a bounded number of
    /// times; startup fails if DSTS stays unreachable.
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

    /// Enrollment tokens are issued by DSTS; validation is delegated there.
    /// Returns the tenant id the token was issued for.
    pub async fn validate_enrollment_token(&self, token: &str) -> Result<String, DstsError> {
        let response: ValidateTokenResponse = self
            .http
            .post(format!("{}/v1/enrollment_tokens/validate", self.base_url))
            .json(&ValidateTokenRequest { token })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != 0 {
            return Err(DstsError::Status(response.status));
        }
        Ok(response.tenant_id)
    }
}
