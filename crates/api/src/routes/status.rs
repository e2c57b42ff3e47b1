//! Enrollment status polling.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use domain::models::{STATUS_COMPLETED, STATUS_PENDING};
use tracing::error;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;

use super::unenroll::unenroll_status;

/// `GET /api/v1/enroll/{enroll_id}`
///
/// Pending records answer 429 with a Retry-After hint computed from the
/// rolling enroll duration; completed records return the certificate bundle.
/// Lookup misses and ownership mismatches are both 404 so nothing about
/// foreign records is disclosed.
pub async fn enroll_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<axum::response::Response, ApiError> {
    let claims = state.token_manager.claims_from_headers(&headers).await?;

    let entry = match state.enrolls.status(id).await? {
        Some(entry) => entry,
        None => {
            // Device tokens may be polling an unenroll id.
            if claims.device_id.is_some() {
                return unenroll_status(&state, id, &claims).await;
            }
            return Err(ApiError::NotFound(id));
        }
    };

    if entry.tenant_id != claims.tenant_id || entry.user_id != claims.user_id {
        error!(
            token_tenant_id = %claims.tenant_id,
            entry_tenant_id = %entry.tenant_id,
            "Failed to match enroll record"
        );
        return Err(ApiError::NotFound(id));
    }

    // A device token only reads records carrying its own device id.
    if let Some(device_id) = claims.device_id {
        if entry.device_id != Some(device_id) {
            error!(
                token_device_id = %device_id,
                "Failed to match enroll record"
            );
            return Err(ApiError::NotFound(id));
        }
    }

    match entry.status {
        STATUS_PENDING => Err(ApiError::InProgress {
            retry_after: retry_after_hint(&state).await,
        }),
        STATUS_COMPLETED => {
            let details = state
                .enrolls
                .details(id)
                .await?
                .ok_or(ApiError::NotFound(id))?;
            Ok(Json(details).into_response())
        }
        _ => Err(ApiError::NotFound(id)),
    }
}

/// Computes the Retry-After hint under the configured strategy, bounded to
/// `[retry_after_seconds, max_retry_after_seconds]`. An unavailable cache
/// falls back to the maximum.
pub(super) async fn retry_after_hint(state: &AppState) -> i64 {
    let enrollment = &state.config.enrollment;
    let average = match state.cache.average_enroll_seconds().await {
        Ok(average) => average,
        Err(e) => {
            error!(
                default = enrollment.max_retry_after_seconds,
                error = %e,
                "Failed to get average enroll time"
            );
            return enrollment.max_retry_after_seconds;
        }
    };

    bounded_hint(
        average,
        enrollment.retry_after_seconds,
        enrollment.max_retry_after_seconds,
    )
}

/// An optimistic second on top of the average, bounded to `[floor, ceiling]`
/// and never below one second.
fn bounded_hint(average: i64, floor: i64, ceiling: i64) -> i64 {
    let average = if average <= 0 { floor } else { average };
    (average + 1).clamp(floor, ceiling).max(1)
}

#[cfg(test)]
mod tests {
    use super::bounded_hint;

    #[test]
    fn test_hint_tracks_average_plus_one() {
        assert_eq!(bounded_hint(6, 1, 120), 7);
        assert_eq!(bounded_hint(42, 1, 120), 43);
    }

    #[test]
    fn test_hint_is_bounded() {
        assert_eq!(bounded_hint(500, 5, 120), 120);
        assert_eq!(bounded_hint(0, 5, 120), 6);
        assert_eq!(bounded_hint(-3, 5, 120), 6);
    }

    #[test]
    fn test_hint_is_at_least_one_second() {
        assert_eq!(bounded_hint(0, 0, 120), 1);
    }

    #[test]
    fn test_hint_monotonicity() {
        // If every observed sample is <= T the hint stays <= min(T+1, max).
        let max = 120;
        for t in [1_i64, 10, 60, 119, 300] {
            let hint = bounded_hint(t, 1, max);
            assert!(hint <= (t + 1).min(max));
        }
    }
}
