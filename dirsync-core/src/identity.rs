//! Surrogate key derivation.
//!
//! A surrogate key is the lowercase hex SHA-256 digest of the adapter-native
//! identifier (for LDAP-style sources, the entry's distinguished name). The
//! input is hashed byte-for-byte; no case folding or whitespace trimming.

use sha2::{Digest, Sha256};

use crate::types::SurrogateKey;

/// Derive the surrogate key for a source-native identifier.
pub fn surrogate_key(source_id: &str) -> SurrogateKey {
    let mut h = Sha256::new();
    h.update(source_id.as_bytes());
    SurrogateKey(hex::encode(h.finalize()))
}
