//! Internal maintenance endpoints.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;

/// `DELETE /api/v1/internal/enroll/expired`
///
/// Runs one reaper tick: deletes pending enroll records older than the
/// configured expiry window, bounded by the per-run delete limit.
pub async fn delete_expired_enrolls(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let enrollment = &state.config.enrollment;
    let count = state
        .enrolls
        .delete_expired(
            enrollment.enroll_expiry_minutes * 60,
            enrollment.enroll_expiry_delete_limit,
        )
        .await?;

    info!(count, "Delete expired enroll records");
    Ok(Json(json!({ "count": count })))
}
