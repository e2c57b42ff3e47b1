//! Unenrollment record types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status projection of an unenroll record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnenrollStatus {
    pub status: i32,
    pub tenant_id: String,
    pub device_id: Uuid,
}
