//! Core identifier types shared across all ghostvault crates.

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Unique identifier for a blob tracked by the vault.
///
/// 16 random bytes generated locally at upload start. Never derived from
/// file content, so two uploads of the same file get distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobId(pub [u8; 16]);

impl BlobId {
    /// Generate a fresh random blob id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Encode the blob id as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0)
    }

    /// Decode a blob id from a lowercase hex string.
    ///
    /// Returns `None` if the string is not valid hex or not exactly 16 bytes.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let bytes = data_encoding::HEXLOWER.decode(hex.as_bytes()).ok()?;
        if bytes.len() != 16 {
            return None;
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Some(Self(arr))
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Identifier assigned by the blob backend when ciphertext is stored.
///
/// Opaque to everything except the backend that minted it. Stable once set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentId(pub String);

impl ContentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_id_hex_roundtrip() {
        let id = BlobId([42; 16]);
        let hex = id.to_hex();
        let parsed = BlobId::from_hex(&hex).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn blob_id_from_hex_invalid() {
        // Too short
        assert!(BlobId::from_hex("abcd").is_none());
        // Not hex
        assert!(BlobId::from_hex("zzzz").is_none());
        // Too long (17 bytes = 34 hex chars)
        let long = "aa".repeat(17);
        assert!(BlobId::from_hex(&long).is_none());
        // Empty
        assert!(BlobId::from_hex("").is_none());
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = BlobId::generate();
        let b = BlobId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn blob_id_postcard_roundtrip() {
        let id = BlobId::generate();
        let encoded: Vec<u8> = postcard::to_allocvec(&id).unwrap();
        let decoded: BlobId = postcard::from_bytes(&encoded).unwrap();
        assert_eq!(id, decoded);
    }
}
