use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("id: {0} is not found")]
    NotFound(uuid::Uuid),

    #[error("specified csr has been used previously")]
    DuplicateCsr,

    #[error("request is being processed. Please see 'Retry-After' for a wait hint")]
    InProgress { retry_after: i64 },

    #[error("too many requests")]
    Busy,

    #[error("{0}")]
    Internal(String),
}

/// Error body shape shared by all failing responses.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::DuplicateCsr => StatusCode::CONFLICT,
            ApiError::InProgress { .. } | ApiError::Busy => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Status polls against pending records are expected traffic, not
        // errors worth logging.
        match &self {
            ApiError::InProgress { .. } => {}
            ApiError::Internal(message) => {
                tracing::error!(code = status.as_u16(), error = %message, "Request failed")
            }
            other => tracing::debug!(code = status.as_u16(), error = %other, "Request rejected"),
        }

        let body = ErrorBody {
            error: self.to_string(),
            code: status.as_u16(),
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::InProgress { retry_after } = self {
            if let Ok(value) = header::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            // A deadline on the hot path reads as back-pressure, not failure.
            sqlx::Error::PoolTimedOut => ApiError::Busy,
            _ => ApiError::Internal(format!("database error: {}", err)),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err.is_header_error() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Unauthorized(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::DuplicateCsr.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::InProgress { retry_after: 6 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::Busy.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_pool_timeout_maps_to_busy() {
        let err: ApiError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, ApiError::Busy));
    }

    #[test]
    fn test_row_not_found_is_not_special_cased() {
        // Lookups use fetch_optional; RowNotFound only escapes on bugs.
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
