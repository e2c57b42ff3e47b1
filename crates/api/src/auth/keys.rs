//! Token signing key store.
//!
//! In-memory map of `kid` to decoding key, backed by the `public_key` table.
//! Keys are write-once per kid; both the table and the map reject updates to
//! an existing kid by leaving the stored key untouched.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

use jsonwebtoken::{Algorithm, DecodingKey};
use persistence::repositories::PublicKeyRepository;
use tracing::{error, info, warn};

pub struct KeyStore {
    keys: RwLock<HashMap<String, (Algorithm, DecodingKey)>>,
    repository: Option<PublicKeyRepository>,
}

impl KeyStore {
    /// Loads every stored key into the in-memory map. Keys that fail to
    /// parse are skipped with a warning so one bad row cannot block startup.
    pub async fn load(repository: PublicKeyRepository) -> Result<Self, sqlx::Error> {
        let mut keys = HashMap::new();
        for key in repository.all().await? {
            match parse_key(&key.alg, &key.pem) {
                Ok(parsed) => {
                    keys.insert(key.kid, parsed);
                }
                Err(e) => warn!(kid = %key.kid, alg = %key.alg, error = %e, "Skipping unparseable signing key"),
            }
        }
        info!(count = keys.len(), "Loaded token signing keys");
        Ok(Self {
            keys: RwLock::new(keys),
            repository: Some(repository),
        })
    }

    /// Registers a key, persisting it and adding it to the map. A kid that
    /// is already known is left as-is.
    pub async fn register(&self, kid: &str, alg: &str, pem: &str) -> Result<(), sqlx::Error> {
        if self.contains(kid) {
            return Ok(());
        }
        let parsed = match parse_key(alg, pem) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(kid, alg, error = %e, "Rejecting unparseable signing key");
                return Ok(());
            }
        };
        if let Some(repository) = &self.repository {
            repository.add(kid, alg, pem).await?;
        }
        self.keys
            .write()
            .expect("key store lock poisoned")
            .entry(kid.to_string())
            .or_insert(parsed);
        Ok(())
    }

    /// A store with no persistence, populated only through `register`.
    /// Useful when the service runs without a key table.
    pub fn in_memory() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            repository: None,
        }
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys
            .read()
            .expect("key store lock poisoned")
            .contains_key(kid)
    }

    pub fn get(&self, kid: &str) -> Option<(Algorithm, DecodingKey)> {
        self.keys
            .read()
            .expect("key store lock poisoned")
            .get(kid)
            .cloned()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(entries: Vec<(String, Algorithm, DecodingKey)>) -> Self {
        let mut keys = HashMap::new();
        for (kid, alg, key) in entries {
            keys.insert(kid, (alg, key));
        }
        Self {
            keys: RwLock::new(keys),
            repository: None,
        }
    }
}

fn parse_key(alg: &str, pem: &str) -> Result<(Algorithm, DecodingKey), String> {
    let algorithm = Algorithm::from_str(alg).map_err(|e| e.to_string())?;
    let key = match algorithm {
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 | Algorithm::PS256
        | Algorithm::PS384 | Algorithm::PS512 => {
            DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| e.to_string())?
        }
        Algorithm::ES256 | Algorithm::ES384 => {
            DecodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| e.to_string())?
        }
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem.as_bytes()).map_err(|e| e.to_string())?,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            return Err("symmetric signing algorithms are not accepted".to_string())
        }
    };
    Ok((algorithm, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_keys_are_rejected() {
        assert!(parse_key("HS256", "secret").is_err());
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        assert!(parse_key("NONE", "").is_err());
    }

    #[test]
    fn test_store_lookup() {
        let store = KeyStore::for_tests(vec![(
            "kid-1".to_string(),
            Algorithm::HS256,
            DecodingKey::from_secret(b"test"),
        )]);
        assert!(store.contains("kid-1"));
        assert!(store.get("kid-2").is_none());
        let (alg, _) = store.get("kid-1").unwrap();
        assert_eq!(alg, Algorithm::HS256);
    }
}
