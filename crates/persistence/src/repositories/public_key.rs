//! Token signing key repository.

use std::time::Instant;

use domain::models::PublicKey;
use sqlx::PgPool;

use crate::entities::public_key::PublicKeyEntity;

use super::observe_db;

#[derive(Clone)]
pub struct PublicKeyRepository {
    pool: PgPool,
}

impl PublicKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn has_key(&self, kid: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM public_key WHERE kid = $1")
            .bind(kid)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn get(&self, kid: &str) -> Result<Option<PublicKey>, sqlx::Error> {
        let start = Instant::now();
        let entity = sqlx::query_as::<_, PublicKeyEntity>(
            "SELECT kid, alg, public_key FROM public_key WHERE kid = $1",
        )
        .bind(kid)
        .fetch_optional(&self.pool)
        .await?;
        observe_db("get_publickey", start);
        Ok(entity.map(Into::into))
    }

    /// Stores a key once per kid. A kid that is already present is left
    /// untouched - keys are immutable once stored.
    pub async fn add(&self, kid: &str, alg: &str, pem: &str) -> Result<(), sqlx::Error> {
        if self.has_key(kid).await? {
            return Ok(());
        }

        let start = Instant::now();
        sqlx::query(
            "INSERT INTO public_key (kid, alg, public_key) VALUES ($1, $2, $3) \
             ON CONFLICT (kid) DO NOTHING",
        )
        .bind(kid)
        .bind(alg)
        .bind(pem)
        .execute(&self.pool)
        .await?;
        observe_db("set_publickey", start);
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<PublicKey>, sqlx::Error> {
        let entities =
            sqlx::query_as::<_, PublicKeyEntity>("SELECT kid, alg, public_key FROM public_key")
                .fetch_all(&self.pool)
                .await?;
        Ok(entities.into_iter().map(Into::into).collect())
    }
}
