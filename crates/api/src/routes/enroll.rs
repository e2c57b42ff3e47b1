//! Enroll and renew endpoints.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use domain::models::{EnrollCommand, EnrollKind};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::EnrollClaims;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    /// Base64 encoded CSR.
    pub csr: String,
    /// Target management service, e.g. HPConnect.
    #[serde(default)]
    pub mgmt_service: String,
    /// Optional hardware hash, passed through to device registration.
    #[serde(default)]
    pub hardware_hash: String,
}

/// `POST /api/v1/enroll`
///
/// Creates a pending enroll record and hands the request to the pipeline.
/// Responds 202 immediately; the caller polls `GET /enroll/{id}` for the
/// outcome, honoring the Retry-After hint.
pub async fn enroll_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<EnrollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = state.token_manager.claims_from_headers(&headers).await?;

    let csr_hash = validate_csr(&state, &payload).await?;

    let record = state
        .enrolls
        .create(&claims.tenant_id, &claims.user_id, &csr_hash)
        .await?;

    publish_command(
        &state,
        EnrollCommand {
            id: record.id,
            tenant_id: claims.tenant_id.clone(),
            request_id: record.request_id,
            csr: payload.csr,
            kind: EnrollKind::Enroll,
            mgmt_service: payload.mgmt_service,
            hardware_hash: payload.hardware_hash,
            device_id: None,
        },
    )
    .await?;

    info!(
        enroll_id = %record.id,
        request_id = %record.request_id,
        tenant_id = %claims.tenant_id,
        "Enroll queued"
    );
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// `PATCH /api/v1/enroll/{device_id}`
///
/// Renews the certificate of an already enrolled device. The bearer must be
/// a device token whose subject matches the path device id.
pub async fn renew_enroll(
    State(state): State<AppState>,
    Path(device_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<EnrollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = state.token_manager.claims_from_headers(&headers).await?;
    require_device_match(&claims, device_id)?;

    let csr_hash = validate_csr(&state, &payload).await?;

    let record = state
        .enrolls
        .create_renewal(&claims.tenant_id, &claims.user_id, device_id, &csr_hash)
        .await?;

    publish_command(
        &state,
        EnrollCommand {
            id: record.id,
            tenant_id: claims.tenant_id.clone(),
            request_id: record.request_id,
            csr: payload.csr,
            kind: EnrollKind::RenewEnroll,
            mgmt_service: payload.mgmt_service,
            hardware_hash: payload.hardware_hash,
            device_id: Some(device_id),
        },
    )
    .await?;

    info!(
        enroll_id = %record.id,
        request_id = %record.request_id,
        tenant_id = %claims.tenant_id,
        device_id = %device_id,
        "Renew enroll queued"
    );
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// Shared CSR checks: base64 shape, then the duplicate short circuit against
/// cache and store.
async fn validate_csr(state: &AppState, payload: &EnrollRequest) -> Result<String, ApiError> {
    let csr_hash =
        shared::crypto::csr_hash(&payload.csr).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if state.enrolls.has_csr_hash(&csr_hash).await? {
        return Err(ApiError::DuplicateCsr);
    }

    validate_management_service(state, &payload.mgmt_service)?;
    Ok(csr_hash)
}

fn validate_management_service(state: &AppState, mgmt_service: &str) -> Result<(), ApiError> {
    let services = &state.config.enrollment.management_services;
    if mgmt_service.is_empty() {
        return Err(ApiError::BadRequest(
            "please specify mgmt_service in payload".to_string(),
        ));
    }
    if !services.iter().any(|s| s == mgmt_service) {
        return Err(ApiError::BadRequest(format!(
            "{} is not a valid mgmt_service. Valid values are {:?}",
            mgmt_service, services
        )));
    }
    Ok(())
}

pub(super) fn require_device_match(
    claims: &EnrollClaims,
    device_id: Uuid,
) -> Result<(), ApiError> {
    match claims.device_id {
        Some(claimed) if claimed == device_id => Ok(()),
        _ => Err(ApiError::BadRequest(
            "device id does not match claim in bearer token".to_string(),
        )),
    }
}

/// Hands the record to the pipeline. A publish failure surfaces as 500; the
/// already-inserted row stays pending and is eventually reaped.
async fn publish_command(state: &AppState, command: EnrollCommand) -> Result<(), ApiError> {
    let body = serde_json::to_string(&command)
        .map_err(|e| ApiError::Internal(format!("failed to encode enroll message: {e}")))?;
    state
        .queue
        .send(&state.queue_urls.pending_enroll, &body)
        .await
        .map_err(|e| {
            tracing::error!(enroll_id = %command.id, error = %e, "Enroll handoff failed");
            ApiError::Internal("there was an error handing off enroll for processing".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_match_requires_device_token() {
        let device_id = Uuid::new_v4();
        let claims = EnrollClaims {
            tenant_id: "tenant-a".into(),
            user_id: String::new(),
            device_id: None,
        };
        assert!(require_device_match(&claims, device_id).is_err());

        let claims = EnrollClaims {
            device_id: Some(device_id),
            ..claims
        };
        assert!(require_device_match(&claims, device_id).is_ok());
        assert!(require_device_match(&claims, Uuid::new_v4()).is_err());
    }
}
