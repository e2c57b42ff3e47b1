//! Unenroll endpoint and unenroll status lookup.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use domain::models::{EnrollCommand, EnrollKind, STATUS_COMPLETED, STATUS_PENDING};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::EnrollClaims;
use crate::error::ApiError;

use super::enroll::require_device_match;
use super::status::retry_after_hint;

/// `DELETE /api/v1/enroll/{device_id}`
///
/// Requires a device token matching the path device id. Creates the
/// unenroll record and queues the delete; DSTS is called by the worker.
pub async fn unenroll_device(
    State(state): State<AppState>,
    Path(device_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let claims = state.token_manager.claims_from_headers(&headers).await?;
    require_device_match(&claims, device_id)?;

    let record = state.unenrolls.create(&claims.tenant_id, device_id).await?;

    let command = EnrollCommand {
        id: record.id,
        tenant_id: claims.tenant_id.clone(),
        request_id: record.request_id,
        csr: String::new(),
        kind: EnrollKind::Unenroll,
        mgmt_service: String::new(),
        hardware_hash: String::new(),
        device_id: Some(device_id),
    };
    let body = serde_json::to_string(&command)
        .map_err(|e| ApiError::Internal(format!("failed to encode unenroll message: {e}")))?;
    state
        .queue
        .send(&state.queue_urls.pending_enroll, &body)
        .await
        .map_err(|e| {
            error!(unenroll_id = %record.id, error = %e, "Unenroll handoff failed");
            ApiError::Internal("there was an error while unenroll".to_string())
        })?;

    info!(
        unenroll_id = %record.id,
        request_id = %record.request_id,
        tenant_id = %claims.tenant_id,
        device_id = %device_id,
        "Unenroll queued"
    );
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// Unenroll status lookup, reached from the status endpoint when a device
/// token polls an id that is not in the enroll table.
pub(super) async fn unenroll_status(
    state: &AppState,
    id: Uuid,
    claims: &EnrollClaims,
) -> Result<Response, ApiError> {
    let entry = match state.unenrolls.status(id).await? {
        Some(entry) => entry,
        None => {
            error!(id = %id, "Could not find unenroll id");
            return Err(ApiError::NotFound(id));
        }
    };

    if entry.tenant_id != claims.tenant_id || Some(entry.device_id) != claims.device_id {
        error!(
            token_tenant_id = %claims.tenant_id,
            tenant_id = %entry.tenant_id,
            device_id = %entry.device_id,
            "Could not find unenroll id"
        );
        return Err(ApiError::NotFound(id));
    }

    match entry.status {
        STATUS_PENDING => Err(ApiError::InProgress {
            retry_after: retry_after_hint(state).await,
        }),
        STATUS_COMPLETED => {
            Ok(Json(json!({ "id": id, "status": "success" })).into_response())
        }
        _ => Err(ApiError::NotFound(id)),
    }
}
