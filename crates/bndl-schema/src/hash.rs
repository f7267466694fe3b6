//! Payload digests and cache fingerprints.
//!
//! Payload content integrity uses SHA-512 rendered as uppercase hex
//! (128 characters), matching the hash attribute carried in the bound
//! manifest. Cache-id fingerprints use BLAKE3, which is much faster
//! and only needs to be collision-resistant, not externally verifiable.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha512};

/// A validated SHA-512 payload digest (128 uppercase hex characters).
///
/// The newtype validates at construction and deserialization time so
/// that malformed hex never propagates into a bound manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PayloadHash(String);

/// Errors produced when constructing a [`PayloadHash`] from a string.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The string is not exactly 128 characters long.
    #[error("Invalid SHA-512 digest: expected 128 hex characters, got {0}")]
    InvalidLength(usize),

    /// The string contains a non-hexadecimal character.
    #[error("Invalid SHA-512 digest: contains non-hex characters in '{0}'")]
    InvalidCharacters(String),
}

impl PayloadHash {
    /// Create a validated `PayloadHash`, normalizing to uppercase.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the input is not exactly 128 ASCII hex
    /// characters.
    pub fn new(s: impl Into<String>) -> Result<Self, HashError> {
        let s = s.into();
        if s.len() != 128 {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidCharacters(s));
        }
        Ok(Self(s.to_uppercase()))
    }

    /// Compute the SHA-512 digest of in-memory data.
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha512::digest(data);
        Self(hex::encode_upper(digest))
    }

    /// Compute the SHA-512 digest of a file, streaming its contents.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn compute_file(path: &std::path::Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha512::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(Self(hex::encode_upper(hasher.finalize())))
    }

    /// Return the digest as an uppercase hex string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PayloadHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for PayloadHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PayloadHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute a short BLAKE3 content fingerprint (16 hex characters).
///
/// Used for deterministic cache-id derivation: the same input always
/// yields the same fingerprint, so rebinding an unchanged chain is
/// idempotent.
pub fn content_fingerprint(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    hash.to_hex().as_str()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_yields_128_uppercase_hex() {
        let hash = PayloadHash::compute(b"hello world");
        assert_eq!(hash.as_str().len(), 128);
        assert!(
            hash.as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn compute_is_deterministic() {
        assert_eq!(PayloadHash::compute(b"abc"), PayloadHash::compute(b"abc"));
        assert_ne!(PayloadHash::compute(b"abc"), PayloadHash::compute(b"abd"));
    }

    #[test]
    fn new_rejects_wrong_length() {
        assert!(matches!(
            PayloadHash::new("AB12"),
            Err(HashError::InvalidLength(4))
        ));
    }

    #[test]
    fn new_rejects_non_hex() {
        let s = "G".repeat(128);
        assert!(matches!(
            PayloadHash::new(s),
            Err(HashError::InvalidCharacters(_))
        ));
    }

    #[test]
    fn new_normalizes_to_uppercase() {
        let lower = PayloadHash::compute(b"x").as_str().to_lowercase();
        let hash = PayloadHash::new(lower).unwrap();
        assert_eq!(hash, PayloadHash::compute(b"x"));
    }

    #[test]
    fn compute_file_matches_compute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"payload bytes").unwrap();
        assert_eq!(
            PayloadHash::compute_file(&path).unwrap(),
            PayloadHash::compute(b"payload bytes")
        );
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        let a = content_fingerprint(b"same");
        let b = content_fingerprint(b"same");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }
}
