//! Row mappings for the unenroll tables.

use domain::models::UnenrollStatus;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, FromRow)]
pub struct UnenrollStatusEntity {
    pub status: i32,
    pub tenant_id: String,
    pub device_id: Uuid,
}

impl From<UnenrollStatusEntity> for UnenrollStatus {
    fn from(entity: UnenrollStatusEntity) -> Self {
        UnenrollStatus {
            status: entity.status,
            tenant_id: entity.tenant_id,
            device_id: entity.device_id,
        }
    }
}
