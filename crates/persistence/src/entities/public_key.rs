//! Row mapping for the public_key table.

use domain::models::PublicKey;
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct PublicKeyEntity {
    pub kid: String,
    pub alg: String,
    pub public_key: String,
}

impl From<PublicKeyEntity> for PublicKey {
    fn from(entity: PublicKeyEntity) -> Self {
        PublicKey {
            kid: entity.kid,
            alg: entity.alg,
            pem: entity.public_key,
        }
    }
}
