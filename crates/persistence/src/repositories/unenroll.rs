//! Unenroll record repository.
//!
//! Same lifecycle as enroll without the CSR and certificate columns.

use std::time::Instant;

use domain::models::{
    EnrollErrorMessage, PendingRecord, UnenrollStatus, STATUS_COMPLETED, STATUS_PENDING,
};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::CacheClient;
use crate::entities::enroll::PendingRecordEntity;
use crate::entities::unenroll::UnenrollStatusEntity;

use super::observe_db;

#[derive(Clone)]
pub struct UnenrollRepository {
    pool: PgPool,
    cache: CacheClient,
}

impl UnenrollRepository {
    pub fn new(pool: PgPool, cache: CacheClient) -> Self {
        Self { pool, cache }
    }

    /// Creates the record tracking an unenroll request through the queue.
    pub async fn create(
        &self,
        tenant_id: &str,
        device_id: Uuid,
    ) -> Result<PendingRecord, sqlx::Error> {
        let start = Instant::now();
        let entity = sqlx::query_as::<_, PendingRecordEntity>(
            r#"
            INSERT INTO unenroll (tenant_id, device_id)
            VALUES ($1, $2)
            RETURNING id, request_id, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(device_id)
        .fetch_one(&self.pool)
        .await?;
        observe_db("unenroll", start);

        self.cache
            .create_unenroll_status(entity.id, tenant_id, device_id, STATUS_PENDING)
            .await;
        Ok(entity.into())
    }

    /// Marks an unenroll record complete. Returns the elapsed seconds, or
    /// `None` for a redelivered completion against an already-final row.
    pub async fn complete(&self, unenroll_id: Uuid) -> Result<Option<f64>, sqlx::Error> {
        let start = Instant::now();
        let elapsed: Option<f64> = sqlx::query_scalar(
            r#"
            UPDATE unenroll
            SET updated_at = NOW(), status = $1
            WHERE id = $2 AND status = $3
            RETURNING CAST(EXTRACT(EPOCH FROM (updated_at - created_at)) AS DOUBLE PRECISION)
            "#,
        )
        .bind(STATUS_COMPLETED)
        .bind(unenroll_id)
        .bind(STATUS_PENDING)
        .fetch_optional(&self.pool)
        .await?;
        observe_db("update_unenroll", start);

        match elapsed {
            Some(elapsed) => {
                self.cache.add_unenroll_elapsed(elapsed).await;
                self.cache
                    .set_unenroll_status(unenroll_id, STATUS_COMPLETED)
                    .await;
                Ok(Some(elapsed))
            }
            None => {
                debug!(unenroll_id = %unenroll_id, "Unenroll record already finalized");
                Ok(None)
            }
        }
    }

    pub async fn status(&self, id: Uuid) -> Result<Option<UnenrollStatus>, sqlx::Error> {
        if let Ok(cached) = self.cache.get_unenroll_status(id).await {
            return Ok(Some(cached));
        }

        let start = Instant::now();
        let entity = sqlx::query_as::<_, UnenrollStatusEntity>(
            "SELECT status, tenant_id, device_id FROM unenroll WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        observe_db("get_status_by_id", start);

        match entity {
            Some(entity) => {
                let status: UnenrollStatus = entity.into();
                self.cache.store_unenroll_status(id, &status).await;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Moves a failing unenroll record into `unenroll_error`.
    pub async fn fail(&self, error: &EnrollErrorMessage) -> Result<(), sqlx::Error> {
        let start = Instant::now();
        info!(
            unenroll_id = %error.enroll_id,
            code = error.error_code,
            error = %error.error_message,
            "Failing unenroll entry"
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO unenroll_error (
                id, request_id, tenant_id, device_id, status, error_code, error_text)
            SELECT id, request_id, tenant_id, device_id, status, $1, $2
            FROM unenroll WHERE id = $3
            "#,
        )
        .bind(error.error_code)
        .bind(&error.error_message)
        .bind(error.enroll_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM unenroll WHERE id = $1")
            .bind(error.enroll_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        observe_db("failed_unenroll", start);
        Ok(())
    }
}
