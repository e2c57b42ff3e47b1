//! Tenant policy repository.

use std::time::Instant;

use domain::models::Policy;
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::CacheClient;
use crate::entities::policy::PolicyEntity;

use super::observe_db;

#[derive(Clone)]
pub struct PolicyRepository {
    pool: PgPool,
    cache: CacheClient,
}

impl PolicyRepository {
    pub fn new(pool: PgPool, cache: CacheClient) -> Self {
        Self { pool, cache }
    }

    /// Creates an enabled policy for a tenant. The partial unique index on
    /// `(tenant_id) WHERE enabled` rejects a second enabled policy with a
    /// unique violation.
    pub async fn create(&self, tenant_id: &str, data: &str) -> Result<Policy, sqlx::Error> {
        let start = Instant::now();
        let entity = sqlx::query_as::<_, PolicyEntity>(
            r#"
            INSERT INTO policy (tenant_id, data, enabled)
            VALUES ($1, $2, TRUE)
            RETURNING id, tenant_id, data, enabled, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(data)
        .fetch_one(&self.pool)
        .await?;
        observe_db("create_policy", start);

        let policy: Policy = entity.into();
        self.cache.set_policy(&policy).await;
        Ok(policy)
    }

    pub async fn get(&self, id: Uuid, tenant_id: &str) -> Result<Option<Policy>, sqlx::Error> {
        let start = Instant::now();
        let entity = sqlx::query_as::<_, PolicyEntity>(
            r#"
            SELECT id, tenant_id, data, enabled, created_at, updated_at
            FROM policy WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        observe_db("get_policy", start);
        Ok(entity.map(Into::into))
    }

    pub async fn get_by_tenant(&self, tenant_id: &str) -> Result<Option<Policy>, sqlx::Error> {
        let start = Instant::now();
        let entity = sqlx::query_as::<_, PolicyEntity>(
            r#"
            SELECT id, tenant_id, data, enabled, created_at, updated_at
            FROM policy WHERE tenant_id = $1 AND enabled
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        observe_db("get_policy_by_tenant", start);
        Ok(entity.map(Into::into))
    }

    pub async fn update(
        &self,
        id: Uuid,
        tenant_id: &str,
        data: &str,
    ) -> Result<Option<Policy>, sqlx::Error> {
        let start = Instant::now();
        let entity = sqlx::query_as::<_, PolicyEntity>(
            r#"
            UPDATE policy SET data = $1, updated_at = NOW()
            WHERE id = $2 AND tenant_id = $3
            RETURNING id, tenant_id, data, enabled, created_at, updated_at
            "#,
        )
        .bind(data)
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        observe_db("update_policy", start);

        if let Some(entity) = &entity {
            let policy = Policy {
                id: entity.id,
                tenant_id: entity.tenant_id.clone(),
                data: entity.data.clone(),
                enabled: entity.enabled,
                created_at: entity.created_at,
                updated_at: entity.updated_at,
            };
            self.cache.set_policy(&policy).await;
        }
        Ok(entity.map(Into::into))
    }

    pub async fn delete(&self, id: Uuid, tenant_id: &str) -> Result<bool, sqlx::Error> {
        let start = Instant::now();
        let result = sqlx::query("DELETE FROM policy WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        observe_db("delete_policy", start);

        if result.rows_affected() > 0 {
            self.cache.delete_policy(tenant_id).await;
        }
        Ok(result.rows_affected() > 0)
    }
}
