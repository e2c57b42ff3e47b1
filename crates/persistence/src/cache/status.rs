//! Status entries, CSR hash markers and policy projections.

use domain::models::{EnrollStatus, Policy, UnenrollStatus};
use tracing::{debug, error};
use uuid::Uuid;

use super::{
    report_cache_error, report_cache_hit, CacheClient, CacheError, KEY_PREFIX_CSR_HASH,
    KEY_PREFIX_ENROLL_STATUS, KEY_PREFIX_POLICY, KEY_PREFIX_UNENROLL_STATUS, TTL_CSR_HASH_SECS,
    TTL_STATUS_SECS,
};

const FUNCTION_ENROLL_STATUS: &str = "EnrollStatus";
const FUNCTION_UNENROLL_STATUS: &str = "UnenrollStatus";
const FUNCTION_CSR_HASH: &str = "CsrHash";
const FUNCTION_POLICY: &str = "Policy";

impl CacheClient {
    /// Seeds the status entry for a new enroll record. Best effort.
    pub async fn create_enroll_status(
        &self,
        id: Uuid,
        tenant_id: &str,
        user_id: &str,
        device_id: Option<Uuid>,
        status: i32,
    ) {
        let entry = EnrollStatus {
            status,
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            device_id,
        };
        self.write_enroll_status(id, &entry).await;
    }

    /// Updates the status entry for a finished enroll. The existing entry is
    /// read back first so the tenant/user fields survive the update; when it
    /// is gone (expired TTL) the update is skipped and the next status read
    /// repopulates from the database.
    pub async fn set_enroll_status(&self, id: Uuid, device_id: Option<Uuid>, status: i32) {
        if !self.is_enabled() {
            return;
        }
        match self.read_enroll_status(id).await {
            Ok(mut entry) => {
                entry.device_id = device_id;
                entry.status = status;
                self.write_enroll_status(id, &entry).await;
            }
            Err(e) => {
                debug!(id = %id, error = %e, "Could not update enroll status in cache");
                report_cache_error("set", FUNCTION_ENROLL_STATUS);
            }
        }
    }

    pub async fn get_enroll_status(&self, id: Uuid) -> Result<EnrollStatus, CacheError> {
        let entry = self.read_enroll_status(id).await?;
        report_cache_hit(FUNCTION_ENROLL_STATUS);
        Ok(entry)
    }

    /// Stores a freshly loaded status entry (database read-through backfill).
    pub async fn store_enroll_status(&self, id: Uuid, entry: &EnrollStatus) {
        self.write_enroll_status(id, entry).await;
    }

    pub async fn delete_enroll_status(&self, id: Uuid) {
        if !self.is_enabled() {
            return;
        }
        let key = format!("{KEY_PREFIX_ENROLL_STATUS}{id}");
        if let Err(e) = self.delete_key(&key).await {
            error!(id = %id, error = %e, "Could not delete enroll status from cache");
            report_cache_error("delete", FUNCTION_ENROLL_STATUS);
        }
    }

    async fn read_enroll_status(&self, id: Uuid) -> Result<EnrollStatus, CacheError> {
        let key = format!("{KEY_PREFIX_ENROLL_STATUS}{id}");
        let raw = self.get_string(&key).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn write_enroll_status(&self, id: Uuid, entry: &EnrollStatus) {
        if !self.is_enabled() {
            return;
        }
        let key = format!("{KEY_PREFIX_ENROLL_STATUS}{id}");
        let body = match serde_json::to_string(entry) {
            Ok(body) => body,
            Err(e) => {
                error!(id = %id, error = %e, "Failed to serialize enroll status for caching");
                return;
            }
        };
        if let Err(e) = self.set_string(&key, &body, TTL_STATUS_SECS).await {
            error!(id = %id, error = %e, "Could not store enroll status in cache");
            report_cache_error("set", FUNCTION_ENROLL_STATUS);
        }
    }

    pub async fn create_unenroll_status(
        &self,
        id: Uuid,
        tenant_id: &str,
        device_id: Uuid,
        status: i32,
    ) {
        let entry = UnenrollStatus {
            status,
            tenant_id: tenant_id.to_string(),
            device_id,
        };
        self.write_unenroll_status(id, &entry).await;
    }

    pub async fn set_unenroll_status(&self, id: Uuid, status: i32) {
        if !self.is_enabled() {
            return;
        }
        match self.read_unenroll_status(id).await {
            Ok(mut entry) => {
                entry.status = status;
                self.write_unenroll_status(id, &entry).await;
            }
            Err(e) => {
                debug!(id = %id, error = %e, "Could not update unenroll status in cache");
                report_cache_error("set", FUNCTION_UNENROLL_STATUS);
            }
        }
    }

    pub async fn get_unenroll_status(&self, id: Uuid) -> Result<UnenrollStatus, CacheError> {
        let entry = self.read_unenroll_status(id).await?;
        report_cache_hit(FUNCTION_UNENROLL_STATUS);
        Ok(entry)
    }

    pub async fn store_unenroll_status(&self, id: Uuid, entry: &UnenrollStatus) {
        self.write_unenroll_status(id, entry).await;
    }

    async fn read_unenroll_status(&self, id: Uuid) -> Result<UnenrollStatus, CacheError> {
        let key = format!("{KEY_PREFIX_UNENROLL_STATUS}{id}");
        let raw = self.get_string(&key).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn write_unenroll_status(&self, id: Uuid, entry: &UnenrollStatus) {
        if !self.is_enabled() {
            return;
        }
        let key = format!("{KEY_PREFIX_UNENROLL_STATUS}{id}");
        let body = match serde_json::to_string(entry) {
            Ok(body) => body,
            Err(e) => {
                error!(id = %id, error = %e, "Failed to serialize unenroll status for caching");
                return;
            }
        };
        if let Err(e) = self.set_string(&key, &body, TTL_STATUS_SECS).await {
            error!(id = %id, error = %e, "Could not store unenroll status in cache");
            report_cache_error("set", FUNCTION_UNENROLL_STATUS);
        }
    }

    /// Marks a CSR hash as seen. Best effort; the database keeps the
    /// authoritative copy.
    pub async fn set_csr_hash(&self, csr_hash: &str) {
        if !self.is_enabled() {
            return;
        }
        let key = format!("{KEY_PREFIX_CSR_HASH}{csr_hash}");
        if let Err(e) = self.set_string(&key, "true", TTL_CSR_HASH_SECS).await {
            error!(csr_hash, error = %e, "Could not store csr hash marker");
            report_cache_error("set", FUNCTION_CSR_HASH);
        }
    }

    /// Checks the duplicate-CSR short circuit. `Miss` means the hash has not
    /// been seen recently and the caller must consult the database.
    pub async fn has_csr_hash(&self, csr_hash: &str) -> Result<bool, CacheError> {
        let key = format!("{KEY_PREFIX_CSR_HASH}{csr_hash}");
        match self.get_string(&key).await {
            Ok(_) => {
                report_cache_hit(FUNCTION_CSR_HASH);
                Ok(true)
            }
            Err(e) => {
                if !e.is_miss() {
                    report_cache_error("get", FUNCTION_CSR_HASH);
                }
                Err(e)
            }
        }
    }

    pub async fn set_policy(&self, policy: &Policy) {
        if !self.is_enabled() {
            return;
        }
        let key = format!("{KEY_PREFIX_POLICY}{}", policy.tenant_id);
        let body = match serde_json::to_string(policy) {
            Ok(body) => body,
            Err(e) => {
                error!(tenant_id = %policy.tenant_id, error = %e, "Failed to serialize policy");
                return;
            }
        };
        if let Err(e) = self.set_string(&key, &body, TTL_STATUS_SECS).await {
            error!(tenant_id = %policy.tenant_id, error = %e, "Could not store policy in cache");
            report_cache_error("set", FUNCTION_POLICY);
        }
    }

    pub async fn delete_policy(&self, tenant_id: &str) {
        if !self.is_enabled() {
            return;
        }
        let key = format!("{KEY_PREFIX_POLICY}{tenant_id}");
        if let Err(e) = self.delete_key(&key).await {
            error!(tenant_id, error = %e, "Could not delete policy from cache");
            report_cache_error("delete", FUNCTION_POLICY);
        }
    }
}
