//! Enrollment record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record is waiting for the pipeline to finish.
pub const STATUS_PENDING: i32 = 0;

/// Record reached its terminal success state.
pub const STATUS_COMPLETED: i32 = 1;

/// Identity of a freshly created enroll or unenroll record, returned to the
/// caller of `POST /enroll` so it can poll for status.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub created_time: DateTime<Utc>,
}

/// Status projection of an enroll record. This is what the status endpoint
/// matches against token claims, and what the cache stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollStatus {
    pub status: i32,
    pub tenant_id: String,
    pub user_id: String,
    pub device_id: Option<Uuid>,
}

/// Certificate bundle returned for a completed enrollment.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedEnroll {
    pub device_id: Uuid,
    pub certificate: String,
    pub parent_certificates: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enroll_status_serde_round_trip() {
        let status = EnrollStatus {
            status: STATUS_PENDING,
            tenant_id: "tenant-a".into(),
            user_id: "user-1".into(),
            device_id: None,
        };
        let json = serde_json::to_string(&status).unwrap();
        let back: EnrollStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, STATUS_PENDING);
        assert_eq!(back.tenant_id, "tenant-a");
        assert!(back.device_id.is_none());
    }
}
