//! Row mapping for the policy table.

use chrono::{DateTime, Utc};
use domain::models::Policy;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, FromRow)]
pub struct PolicyEntity {
    pub id: Uuid,
    pub tenant_id: String,
    pub data: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<PolicyEntity> for Policy {
    fn from(entity: PolicyEntity) -> Self {
        Policy {
            id: entity.id,
            tenant_id: entity.tenant_id,
            data: entity.data,
            enabled: entity.enabled,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}
