//! Per token type validation.
//!
//! Device and app tokens carry differing claims but share the common JWT
//! checks: a known signing kid, a valid signature, the configured audience
//! when one is set, and an issuer that starts with the configured issuer.

use jsonwebtoken::{decode, decode_header, TokenData, Validation};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::TokenIssuerSettings;

use super::{AuthError, EnrollClaims, KeyStore};

#[derive(Debug, Deserialize)]
struct AzureAdClaims {
    #[serde(default)]
    tid: String,
    #[serde(default)]
    sub: String,
    #[serde(default)]
    iss: String,
}

#[derive(Debug, Deserialize)]
struct DeviceClaims {
    /// Tenant id from the enroll token, propagated back by DSTS.
    #[serde(default)]
    tid: String,
    /// Device id.
    #[serde(default)]
    sub: String,
    #[serde(default)]
    iss: String,
}

#[derive(Debug, Deserialize)]
struct TestClaims {
    #[serde(default)]
    tid: String,
    #[serde(default)]
    iss: String,
}

#[derive(Debug, Deserialize)]
struct AppClaims {
    #[serde(default)]
    typ: String,
    #[serde(default)]
    sub: String,
    #[serde(default)]
    iss: String,
}

const APP_TYPE_CLAIM: &str = "app";

pub(super) fn validate_azuread(
    keys: &KeyStore,
    settings: &TokenIssuerSettings,
    token: &str,
) -> Result<EnrollClaims, AuthError> {
    let data = decode_claims::<AzureAdClaims>(keys, settings, token)?;
    check_issuer(&data.claims.iss, settings)?;
    Ok(EnrollClaims {
        tenant_id: data.claims.tid,
        user_id: data.claims.sub,
        device_id: None,
    })
}

pub(super) fn validate_device(
    keys: &KeyStore,
    settings: &TokenIssuerSettings,
    token: &str,
) -> Result<EnrollClaims, AuthError> {
    let data = decode_claims::<DeviceClaims>(keys, settings, token)?;
    check_issuer(&data.claims.iss, settings)?;

    if data.claims.sub.is_empty() {
        tracing::error!("Could not get the device ID from device token");
        return Err(AuthError::InvalidToken);
    }
    let device_id = Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidSubject)?;

    Ok(EnrollClaims {
        tenant_id: data.claims.tid,
        user_id: String::new(),
        device_id: Some(device_id),
    })
}

pub(super) fn validate_test(
    keys: &KeyStore,
    settings: &TokenIssuerSettings,
    token: &str,
) -> Result<EnrollClaims, AuthError> {
    let data = decode_claims::<TestClaims>(keys, settings, token)?;
    check_issuer(&data.claims.iss, settings)?;
    Ok(EnrollClaims {
        tenant_id: data.claims.tid,
        user_id: String::new(),
        device_id: None,
    })
}

/// App tokens authenticate a registered service, not a tenant; the subject
/// must match one of the allowed app ids.
pub(super) fn validate_app(
    keys: &KeyStore,
    settings: &TokenIssuerSettings,
    token: &str,
) -> Result<EnrollClaims, AuthError> {
    let data = decode_claims::<AppClaims>(keys, settings, token)?;
    if data.claims.typ != APP_TYPE_CLAIM {
        return Err(AuthError::InvalidTypeClaim);
    }
    check_issuer(&data.claims.iss, settings)?;
    if !settings.allowed_app_ids.iter().any(|id| *id == data.claims.sub) {
        return Err(AuthError::InvalidSubject);
    }
    Ok(EnrollClaims::default())
}

fn decode_claims<T: DeserializeOwned>(
    keys: &KeyStore,
    settings: &TokenIssuerSettings,
    token: &str,
) -> Result<TokenData<T>, AuthError> {
    let header = decode_header(token).map_err(|_| AuthError::InvalidToken)?;
    let kid = header.kid.ok_or(AuthError::InvalidKid)?;
    let (algorithm, key) = keys.get(&kid).ok_or(AuthError::UnknownKid)?;

    let mut validation = Validation::new(algorithm);
    if settings.audience.is_empty() {
        validation.validate_aud = false;
    } else {
        validation.set_audience(&[settings.audience.clone()]);
    }

    decode::<T>(token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        _ => AuthError::InvalidToken,
    })
}

fn check_issuer(issuer: &str, settings: &TokenIssuerSettings) -> Result<(), AuthError> {
    if !issuer.starts_with(&settings.issuer) {
        return Err(AuthError::InvalidIssuer);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
    use serde::Serialize;

    const TEST_KID: &str = "test-kid";
    const TEST_SECRET: &[u8] = b"validator-test-secret";

    #[derive(Serialize)]
    struct RawClaims {
        tid: String,
        sub: String,
        iss: String,
        typ: String,
        exp: i64,
    }

    fn test_keys() -> KeyStore {
        KeyStore::for_tests(vec![(
            TEST_KID.to_string(),
            Algorithm::HS256,
            DecodingKey::from_secret(TEST_SECRET),
        )])
    }

    fn sign(claims: &RawClaims, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &EncodingKey::from_secret(TEST_SECRET)).unwrap()
    }

    fn claims(tid: &str, sub: &str) -> RawClaims {
        RawClaims {
            tid: tid.to_string(),
            sub: sub.to_string(),
            iss: "https://issuer.example.com/v2".to_string(),
            typ: "app".to_string(),
            exp: epoch_in_one_hour(),
        }
    }

    fn epoch_in_one_hour() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
            + 3600
    }

    fn settings() -> TokenIssuerSettings {
        TokenIssuerSettings {
            kind: "azuread".to_string(),
            issuer: "https://issuer.example.com".to_string(),
            audience: String::new(),
            default_tenant_id: String::new(),
            allowed_app_ids: vec!["app-1".to_string()],
        }
    }

    #[test]
    fn test_azuread_claims_extracted() {
        let token = sign(&claims("tenant-a", "user-1"), Some(TEST_KID));
        let result = validate_azuread(&test_keys(), &settings(), &token).unwrap();
        assert_eq!(result.tenant_id, "tenant-a");
        assert_eq!(result.user_id, "user-1");
        assert!(result.device_id.is_none());
    }

    #[test]
    fn test_missing_kid_is_rejected() {
        let token = sign(&claims("tenant-a", "user-1"), None);
        let err = validate_azuread(&test_keys(), &settings(), &token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidKid));
    }

    #[test]
    fn test_unknown_kid_is_rejected() {
        let token = sign(&claims("tenant-a", "user-1"), Some("other-kid"));
        let err = validate_azuread(&test_keys(), &settings(), &token).unwrap_err();
        assert!(matches!(err, AuthError::UnknownKid));
    }

    #[test]
    fn test_issuer_prefix_is_enforced() {
        let mut bad = claims("tenant-a", "user-1");
        bad.iss = "https://rogue.example.com".to_string();
        let token = sign(&bad, Some(TEST_KID));
        let err = validate_azuread(&test_keys(), &settings(), &token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidIssuer));
    }

    #[test]
    fn test_device_token_requires_uuid_subject() {
        let device_id = Uuid::new_v4();
        let token = sign(&claims("tenant-a", &device_id.to_string()), Some(TEST_KID));
        let result = validate_device(&test_keys(), &settings(), &token).unwrap();
        assert_eq!(result.device_id, Some(device_id));

        let token = sign(&claims("tenant-a", "not-a-uuid"), Some(TEST_KID));
        let err = validate_device(&test_keys(), &settings(), &token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidSubject));

        let token = sign(&claims("tenant-a", ""), Some(TEST_KID));
        let err = validate_device(&test_keys(), &settings(), &token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[test]
    fn test_app_token_subject_allow_list() {
        let token = sign(&claims("", "app-1"), Some(TEST_KID));
        let result = validate_app(&test_keys(), &settings(), &token).unwrap();
        assert!(result.tenant_id.is_empty());

        let token = sign(&claims("", "app-2"), Some(TEST_KID));
        let err = validate_app(&test_keys(), &settings(), &token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidSubject));
    }

    #[test]
    fn test_app_token_requires_typ_claim() {
        let mut raw = claims("", "app-1");
        raw.typ = "device".to_string();
        let token = sign(&raw, Some(TEST_KID));
        let err = validate_app(&test_keys(), &settings(), &token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidTypeClaim));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let mut raw = claims("tenant-a", "user-1");
        raw.exp = 1_000_000;
        let token = sign(&raw, Some(TEST_KID));
        let err = validate_azuread(&test_keys(), &settings(), &token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
