//! Tenant policy model.
//!
//! Policy `data` is an opaque JSON object from the caller's point of view;
//! the service only enforces the `version` field and the one-enabled-policy-
//! per-tenant constraint.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The only policy version this service understands.
pub const SUPPORTED_POLICY_VERSION: i32 = 1;

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("invalid policy data")]
    Invalid,

    #[error("invalid policy version")]
    InvalidVersion,
}

/// A stored policy row.
#[derive(Debug, Clone, Serialize)]
pub struct Policy {
    pub id: Uuid,
    pub tenant_id: String,
    /// Policy data as a JSON string.
    pub data: String,
    pub enabled: bool,
    #[serde(rename = "created_time")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updated_time", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Parsed policy payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyData {
    pub version: i32,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl PolicyData {
    /// Parses and validates a policy JSON string.
    pub fn from_json(data: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_json::from_str(data).map_err(|_| PolicyError::Invalid)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn to_json(&self) -> String {
        // BTreeMap keys keep serialization stable
        serde_json::to_string(self).expect("policy data serializes")
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.version != SUPPORTED_POLICY_VERSION {
            return Err(PolicyError::InvalidVersion);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_round_trip() {
        let mut attributes = BTreeMap::new();
        attributes.insert("BulkEnrollTokenLifetimeDays".to_string(), "7".to_string());
        let policy = PolicyData {
            version: SUPPORTED_POLICY_VERSION,
            attributes,
        };

        let parsed = PolicyData::from_json(&policy.to_json()).unwrap();
        assert_eq!(parsed, policy);
    }

    #[test]
    fn test_policy_rejects_unsupported_version() {
        let err = PolicyData::from_json("{\"version\": 2}").unwrap_err();
        assert_eq!(err, PolicyError::InvalidVersion);
    }

    #[test]
    fn test_policy_rejects_malformed_json() {
        let err = PolicyData::from_json("{version: 1").unwrap_err();
        assert_eq!(err, PolicyError::Invalid);
    }

    #[test]
    fn test_policy_attributes_default_to_empty() {
        let policy = PolicyData::from_json("{\"version\": 1}").unwrap();
        assert!(policy.attributes.is_empty());
    }
}
