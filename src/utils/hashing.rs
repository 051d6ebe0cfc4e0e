//! Hashing utilities

use serde::Serialize;
use sha1::{Digest, Sha1};

/// Hash raw bytes
///
/// # Returns
/// A 40-character lowercase hex SHA-1 digest
pub fn create_hash(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Hash the JSON encoding of a value
///
/// Struct fields serialize in declaration order, so two values with identical
/// fields always hash identically. Callers are responsible for putting
/// multi-valued fields into a canonical order first.
pub fn create_json_hash<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(create_hash(&bytes))
}
