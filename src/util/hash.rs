//! Hashing utilities for cache directory names and content comparison.

use sha2::{Digest, Sha256};

/// Compute SHA256 hash of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute SHA256 hash of a string.
pub fn sha256_str(s: &str) -> String {
    sha256_bytes(s.as_bytes())
}

/// First `len` hex chars of the SHA256 of a string.
pub fn short_hash(s: &str, len: usize) -> String {
    let mut hash = sha256_str(s);
    hash.truncate(len);
    hash
}
