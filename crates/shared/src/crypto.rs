//! Hashing utilities for enrollment requests.

use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CsrError {
    #[error("csr is not base64 encoded")]
    NotBase64,
}

/// Computes the deduplication hash for a CSR.
///
/// The input is the base64 CSR string exactly as presented by the device. It
/// is validated for base64 encoding, then the hash is taken over the base64
/// string itself (not the decoded bytes) so that the same hash can be derived
/// from the queue payload without decoding.
pub fn csr_hash(csr_base64: &str) -> Result<String, CsrError> {
    base64::engine::general_purpose::STANDARD
        .decode(csr_base64)
        .map_err(|_| CsrError::NotBase64)?;

    let digest = Sha256::digest(csr_base64.as_bytes());
    Ok(hex::encode(digest))
}

/// Decodes a base64 payload field (CSR or certificate) into raw bytes.
pub fn decode_base64(value: &str) -> Result<Vec<u8>, CsrError> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|_| CsrError::NotBase64)
}

/// Encodes raw bytes into the base64 form carried in queue payloads.
pub fn encode_base64(value: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csr_hash_is_deterministic() {
        let csr = encode_base64(b"dummy");
        let a = csr_hash(&csr).unwrap();
        let b = csr_hash(&csr).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_csr_hash_is_lowercase_hex() {
        let csr = encode_base64(b"dummy");
        let hash = csr_hash(&csr).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_csr_hash_rejects_non_base64() {
        let err = csr_hash("not base64 at all!").unwrap_err();
        assert!(matches!(err, CsrError::NotBase64));
    }

    #[test]
    fn test_csr_hash_differs_for_different_input() {
        let a = csr_hash(&encode_base64(b"csr-one")).unwrap();
        let b = csr_hash(&encode_base64(b"csr-two")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_base64_round_trip() {
        let encoded = encode_base64(b"certificate bytes");
        assert_eq!(decode_base64(&encoded).unwrap(), b"certificate bytes");
    }
}
