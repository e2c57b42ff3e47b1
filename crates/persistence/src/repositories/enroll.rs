//! Enroll record repository.
//!
//! Owns the `enroll` / `enroll_error` tables and the write-through cache
//! entries derived from them. State transitions are serialized per row by
//! the store: a record is created pending, completed by the enrolled
//! subscriber, moved to `enroll_error` on failure, or reaped on expiry.

use std::time::Instant;

use domain::models::{
    CompletedEnroll, DeviceCertificate, EnrollErrorMessage, EnrollStatus, PendingRecord,
    STATUS_COMPLETED, STATUS_PENDING,
};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::CacheClient;
use crate::entities::enroll::{CompletedEnrollEntity, EnrollStatusEntity, PendingRecordEntity};

use super::observe_db;

#[derive(Clone)]
pub struct EnrollRepository {
    pool: PgPool,
    cache: CacheClient,
}

impl EnrollRepository {
    pub fn new(pool: PgPool, cache: CacheClient) -> Self {
        Self { pool, cache }
    }

    /// Creates a pending record for an incoming device enroll.
    pub async fn create(
        &self,
        tenant_id: &str,
        user_id: &str,
        csr_hash: &str,
    ) -> Result<PendingRecord, sqlx::Error> {
        let start = Instant::now();
        let entity = sqlx::query_as::<_, PendingRecordEntity>(
            r#"
            INSERT INTO enroll (tenant_id, user_id, csr_hash)
            VALUES ($1, $2, $3)
            RETURNING id, request_id, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(csr_hash)
        .fetch_one(&self.pool)
        .await?;
        observe_db("create_enroll", start);

        self.cache
            .create_enroll_status(entity.id, tenant_id, user_id, None, STATUS_PENDING)
            .await;
        self.cache.set_csr_hash(csr_hash).await;
        Ok(entity.into())
    }

    /// Creates a pending renewal record for a device that already exists.
    pub async fn create_renewal(
        &self,
        tenant_id: &str,
        user_id: &str,
        device_id: Uuid,
        csr_hash: &str,
    ) -> Result<PendingRecord, sqlx::Error> {
        let start = Instant::now();
        let entity = sqlx::query_as::<_, PendingRecordEntity>(
            r#"
            INSERT INTO enroll (tenant_id, user_id, device_id, csr_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, request_id, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(device_id)
        .bind(csr_hash)
        .fetch_one(&self.pool)
        .await?;
        observe_db("renew_enroll", start);

        self.cache
            .create_enroll_status(entity.id, tenant_id, user_id, Some(device_id), STATUS_PENDING)
            .await;
        self.cache.set_csr_hash(csr_hash).await;
        Ok(entity.into())
    }

    /// Finalizes a record with its certificate. Returns the end-to-end
    /// elapsed seconds, or `None` when the row was already completed or
    /// gone - redelivered queue messages make this a no-op, so the elapsed
    /// time feeds the rolling average at most once per record.
    pub async fn complete(
        &self,
        result: &DeviceCertificate,
    ) -> Result<Option<f64>, sqlx::Error> {
        let start = Instant::now();
        let elapsed: Option<f64> = sqlx::query_scalar(
            r#"
            UPDATE enroll
            SET device_id = $1, certificate = $2, parent_certificates = $3,
                updated_at = NOW(), status = $4
            WHERE id = $5 AND status = $6
            RETURNING CAST(EXTRACT(EPOCH FROM (updated_at - created_at)) AS DOUBLE PRECISION)
            "#,
        )
        .bind(result.device_id)
        .bind(&result.certificate)
        .bind(&result.parent_certificates)
        .bind(STATUS_COMPLETED)
        .bind(result.enroll_id)
        .bind(STATUS_PENDING)
        .fetch_optional(&self.pool)
        .await?;
        observe_db("update_enroll", start);

        match elapsed {
            Some(elapsed) => {
                self.cache.add_enroll_elapsed(elapsed).await;
                self.cache
                    .set_enroll_status(result.enroll_id, Some(result.device_id), STATUS_COMPLETED)
                    .await;
                Ok(Some(elapsed))
            }
            None => {
                debug!(enroll_id = %result.enroll_id, "Enroll record already finalized");
                Ok(None)
            }
        }
    }

    /// Status lookup for polling. Reads through the cache; a database hit is
    /// written back so the next poll within the TTL skips the store.
    pub async fn status(&self, id: Uuid) -> Result<Option<EnrollStatus>, sqlx::Error> {
        if let Ok(cached) = self.cache.get_enroll_status(id).await {
            return Ok(Some(cached));
        }

        let start = Instant::now();
        let entity = sqlx::query_as::<_, EnrollStatusEntity>(
            "SELECT status, device_id, tenant_id, user_id FROM enroll WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        observe_db("get_status_by_id", start);

        match entity {
            Some(entity) => {
                let status: EnrollStatus = entity.into();
                self.cache.store_enroll_status(id, &status).await;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Certificate bundle of a completed record.
    pub async fn details(&self, id: Uuid) -> Result<Option<CompletedEnroll>, sqlx::Error> {
        let start = Instant::now();
        let entity = sqlx::query_as::<_, CompletedEnrollEntity>(
            "SELECT device_id, certificate, parent_certificates FROM enroll WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        observe_db("get_enroll_details", start);

        Ok(entity.and_then(CompletedEnrollEntity::into_completed))
    }

    /// Duplicate-CSR check. The cache marker short-circuits; a cache miss or
    /// failure falls back to the store, and a store hit refreshes the marker.
    pub async fn has_csr_hash(&self, csr_hash: &str) -> Result<bool, sqlx::Error> {
        if let Ok(exists) = self.cache.has_csr_hash(csr_hash).await {
            return Ok(exists);
        }

        let start = Instant::now();
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM enroll WHERE csr_hash = $1")
                .bind(csr_hash)
                .fetch_one(&self.pool)
                .await?;
        observe_db("check_csr_hash", start);

        if count > 0 {
            self.cache.set_csr_hash(csr_hash).await;
        }
        Ok(count > 0)
    }

    /// Number of records still waiting on the pipeline.
    pub async fn pending_count(&self) -> Result<i64, sqlx::Error> {
        let start = Instant::now();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enroll WHERE status = $1")
            .bind(STATUS_PENDING)
            .fetch_one(&self.pool)
            .await?;
        observe_db("get_pending_enroll_count", start);
        Ok(count)
    }

    /// Moves a failing record into `enroll_error`, recording the failure.
    /// Insert and delete run in one transaction; replaying against a row
    /// that was already moved selects nothing and commits as a no-op.
    pub async fn fail(&self, error: &EnrollErrorMessage) -> Result<(), sqlx::Error> {
        let start = Instant::now();
        info!(
            enroll_id = %error.enroll_id,
            code = error.error_code,
            error = %error.error_message,
            "Failing enroll entry"
        );

        self.cache.delete_enroll_status(error.enroll_id).await;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO enroll_error (
                id, request_id, tenant_id, user_id, csr_hash, status, device_id,
                certificate, error_code, error_text)
            SELECT id, request_id, tenant_id, user_id, csr_hash, status, device_id,
                certificate, $1, $2
            FROM enroll WHERE id = $3
            "#,
        )
        .bind(error.error_code)
        .bind(&error.error_message)
        .bind(error.enroll_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM enroll WHERE id = $1")
            .bind(error.enroll_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        observe_db("failed_enroll", start);
        Ok(())
    }

    /// Deletes records that never reached a terminal state within the expiry
    /// window, bounded per run. Runs in a transaction.
    pub async fn delete_expired(
        &self,
        expiry_seconds: i64,
        delete_limit: i64,
    ) -> Result<u64, sqlx::Error> {
        let start = Instant::now();
        info!(
            expired_since = expiry_seconds,
            delete_limit, "Deleting expired enroll records"
        );

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            DELETE FROM enroll WHERE id IN (
                SELECT id FROM enroll
                WHERE created_at < NOW() - ($1 * INTERVAL '1 second')
                LIMIT $2)
            "#,
        )
        .bind(expiry_seconds)
        .bind(delete_limit)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        observe_db("delete_expired_enrolls", start);

        info!(
            count = result.rows_affected(),
            expired_since = expiry_seconds,
            "Deleted expired enroll records"
        );
        Ok(result.rows_affected())
    }
}
