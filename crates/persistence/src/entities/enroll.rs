//! Row mappings for the enroll tables.

use chrono::{DateTime, Utc};
use domain::models::{CompletedEnroll, EnrollStatus, PendingRecord};
use sqlx::FromRow;
use uuid::Uuid;

/// Identity columns returned when a record is created.
#[derive(Debug, FromRow)]
pub struct PendingRecordEntity {
    pub id: Uuid,
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<PendingRecordEntity> for PendingRecord {
    fn from(entity: PendingRecordEntity) -> Self {
        PendingRecord {
            id: entity.id,
            request_id: entity.request_id,
            created_time: entity.created_at,
        }
    }
}

/// Status projection row.
#[derive(Debug, FromRow)]
pub struct EnrollStatusEntity {
    pub status: i32,
    pub device_id: Option<Uuid>,
    pub tenant_id: String,
    pub user_id: String,
}

impl From<EnrollStatusEntity> for EnrollStatus {
    fn from(entity: EnrollStatusEntity) -> Self {
        EnrollStatus {
            status: entity.status,
            tenant_id: entity.tenant_id,
            user_id: entity.user_id,
            device_id: entity.device_id,
        }
    }
}

/// Certificate columns of a completed enroll row.
#[derive(Debug, FromRow)]
pub struct CompletedEnrollEntity {
    pub device_id: Option<Uuid>,
    pub certificate: Option<String>,
    pub parent_certificates: Option<String>,
}

impl CompletedEnrollEntity {
    /// A completed row always has a device id and certificate; rows that do
    /// not are still pending and have no completed projection.
    pub fn into_completed(self) -> Option<CompletedEnroll> {
        Some(CompletedEnroll {
            device_id: self.device_id?,
            certificate: self.certificate?,
            parent_certificates: self.parent_certificates.unwrap_or_default(),
        })
    }
}
