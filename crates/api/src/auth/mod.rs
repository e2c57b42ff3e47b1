//! Bearer token validation.
//!
//! Requests select a validator with the `X-HP-Token-Type` header; the
//! configured token-types table maps each header value onto one of a closed
//! set of validators. Signing keys are looked up by `kid` in a process-wide
//! key map backed by the `public_key` table.

mod keys;
mod validators;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use thiserror::Error;
use uuid::Uuid;

use crate::clients::DstsClient;
use crate::config::TokenIssuerSettings;

pub use keys::KeyStore;

pub const HEADER_TOKEN_TYPE: &str = "x-hp-token-type";
const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("the X-HP-Token-Type header was not found in the request")]
    TokenTypeHeaderNotFound,

    #[error("X-HP-Token-Type header contains an unsupported token type")]
    UnsupportedTokenType,

    #[error("request does not have an authorization header")]
    NoAuthorizationHeader,

    #[error("authorization header does not contain a bearer token")]
    NoBearerToken,

    #[error("invalid token provided")]
    InvalidToken,

    #[error("invalid token signing kid specified")]
    InvalidKid,

    #[error("the given key ID was not found in the key store")]
    UnknownKid,

    #[error("specified token contains an invalid issuer claim")]
    InvalidIssuer,

    #[error("specified token contains an invalid audience claim")]
    InvalidAudience,

    #[error("specified token contains an invalid typ claim")]
    InvalidTypeClaim,

    #[error("specified token contains an invalid sub claim")]
    InvalidSubject,

    #[error("enrollment token validation failed")]
    EnrollmentTokenRejected,
}

impl AuthError {
    /// Header shape problems are the caller's fault and surface as 400;
    /// everything else is an authentication failure (401).
    pub fn is_header_error(&self) -> bool {
        matches!(self, AuthError::TokenTypeHeaderNotFound)
    }
}

/// Claims extracted from a validated token, reduced to what enrollment
/// decisions need.
#[derive(Debug, Clone, Default)]
pub struct EnrollClaims {
    pub tenant_id: String,
    pub user_id: String,
    /// Only present for device tokens.
    pub device_id: Option<Uuid>,
}

/// The closed set of validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    AzureAd,
    Device,
    Enrollment,
    App,
    Test,
}

impl TokenKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "azuread" => Some(TokenKind::AzureAd),
            "device" => Some(TokenKind::Device),
            "enrollment" => Some(TokenKind::Enrollment),
            "app" => Some(TokenKind::App),
            "test" => Some(TokenKind::Test),
            _ => None,
        }
    }
}

/// Validates bearer tokens for the REST surface.
pub struct TokenManager {
    token_types: HashMap<String, TokenIssuerSettings>,
    keys: Arc<KeyStore>,
    dsts: Arc<DstsClient>,
}

impl TokenManager {
    pub fn new(
        token_types: HashMap<String, TokenIssuerSettings>,
        keys: Arc<KeyStore>,
        dsts: Arc<DstsClient>,
    ) -> Self {
        Self {
            token_types,
            keys,
            dsts,
        }
    }

    /// Extracts and validates the bearer token carried by a request.
    pub async fn claims_from_headers(&self, headers: &HeaderMap) -> Result<EnrollClaims, AuthError> {
        let token_type = headers
            .get(HEADER_TOKEN_TYPE)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::TokenTypeHeaderNotFound)?;
        let token = extract_bearer_token(headers)?;
        self.validate(token_type, token).await
    }

    /// Validates a token of the given type and returns its enrollment
    /// claims. Type specific claims (device id, app id) are checked by the
    /// matching validator; the tenant id is required for every type except
    /// app tokens.
    pub async fn validate(
        &self,
        token_type: &str,
        token: &str,
    ) -> Result<EnrollClaims, AuthError> {
        let token_type = token_type.to_lowercase();
        let settings = self
            .token_types
            .get(&token_type)
            .ok_or(AuthError::UnsupportedTokenType)?;
        let kind = TokenKind::parse(&settings.kind).ok_or(AuthError::UnsupportedTokenType)?;

        let claims = match kind {
            TokenKind::AzureAd => validators::validate_azuread(&self.keys, settings, token)?,
            TokenKind::Device => validators::validate_device(&self.keys, settings, token)?,
            TokenKind::Test => validators::validate_test(&self.keys, settings, token)?,
            TokenKind::App => validators::validate_app(&self.keys, settings, token)?,
            TokenKind::Enrollment => {
                let tenant_id = self
                    .dsts
                    .validate_enrollment_token(token)
                    .await
                    .map_err(|_| AuthError::EnrollmentTokenRejected)?;
                EnrollClaims {
                    tenant_id,
                    ..Default::default()
                }
            }
        };

        if kind != TokenKind::App && claims.tenant_id.is_empty() {
            tracing::error!("Could not get tenant id claim from token");
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::NoAuthorizationHeader)?;
    value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::NoBearerToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_kind_parse_is_closed() {
        assert!(TokenKind::parse("azuread").is_some());
        assert!(TokenKind::parse("device").is_some());
        assert!(TokenKind::parse("saml").is_none());
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            extract_bearer_token(&headers),
            Err(AuthError::NoAuthorizationHeader)
        ));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(matches!(
            extract_bearer_token(&headers),
            Err(AuthError::NoBearerToken)
        ));

        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc");
    }

    #[test]
    fn test_header_error_classification() {
        assert!(AuthError::TokenTypeHeaderNotFound.is_header_error());
        assert!(!AuthError::InvalidToken.is_header_error());
        assert!(!AuthError::NoAuthorizationHeader.is_header_error());
    }
}
