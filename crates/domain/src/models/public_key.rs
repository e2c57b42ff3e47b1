//! Token signing keys.

use serde::{Deserialize, Serialize};

/// A verification key for bearer tokens, keyed by `kid`. Rows are immutable
/// once stored; duplicate kids are rejected at insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKey {
    pub kid: String,
    pub alg: String,
    pub pem: String,
}
