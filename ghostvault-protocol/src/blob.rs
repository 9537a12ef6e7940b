//! Blob records: the registry's view of one uploaded file.

use serde::{Deserialize, Serialize};

use crate::types::{BlobId, ContentId};

/// AEAD algorithm used to produce a blob's ciphertext.
///
/// Stored as a tag in the registry so decryption never needs out-of-band
/// negotiation. v1 only has one algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    ChaCha20Poly1305,
}

impl CipherAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChaCha20Poly1305 => "chacha20poly1305",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chacha20poly1305" => Some(Self::ChaCha20Poly1305),
            _ => None,
        }
    }
}

/// How a blob's key can be recovered.
///
/// The nonce lives in the ciphertext frame itself; this only records the
/// algorithm tag and the label under which the wrapped key is held in a
/// sealed keystore. Raw key material never appears here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    pub algorithm: CipherAlgorithm,
    /// Keystore label for the wrapped per-blob key.
    pub key_ref: String,
}

/// Lifecycle state of a blob record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobState {
    /// Registered before the backend confirmed the upload.
    Provisional,
    /// Upload confirmed; the record is immutable except for deletion.
    Finalized,
    /// Upload failed; kept so the user can retry or purge it.
    Failed,
}

impl BlobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisional => "provisional",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provisional" => Some(Self::Provisional),
            "finalized" => Some(Self::Finalized),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One logical encrypted file tracked by the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub id: BlobId,
    /// Display name only; never trusted or used for addressing.
    pub name: String,
    /// Set exactly when the blob has completed an upload.
    pub content_id: Option<ContentId>,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Unix timestamp (seconds) of upload start.
    pub uploaded_at: i64,
    pub encryption: EncryptionMetadata,
    pub state: BlobState,
}

impl Blob {
    /// Whether this blob can be fetched and decrypted.
    ///
    /// Provisional and failed records are never selectable for retrieval.
    pub fn is_retrievable(&self) -> bool {
        self.state == BlobState::Finalized && self.content_id.is_some()
    }
}

/// Current unix time in seconds.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_blob(state: BlobState, content_id: Option<ContentId>) -> Blob {
        Blob {
            id: BlobId([7; 16]),
            name: "notes.txt".to_string(),
            content_id,
            size: 11,
            uploaded_at: 1_700_000_000,
            encryption: EncryptionMetadata {
                algorithm: CipherAlgorithm::ChaCha20Poly1305,
                key_ref: BlobId([7; 16]).to_hex(),
            },
            state,
        }
    }

    #[test]
    fn finalized_blob_with_content_id_is_retrievable() {
        let blob = test_blob(
            BlobState::Finalized,
            Some(ContentId("abc123".to_string())),
        );
        assert!(blob.is_retrievable());
    }

    #[test]
    fn provisional_blob_is_not_retrievable() {
        let blob = test_blob(BlobState::Provisional, None);
        assert!(!blob.is_retrievable());
    }

    #[test]
    fn failed_blob_is_not_retrievable() {
        let blob = test_blob(BlobState::Failed, None);
        assert!(!blob.is_retrievable());
    }

    #[test]
    fn state_string_roundtrip() {
        for state in [
            BlobState::Provisional,
            BlobState::Finalized,
            BlobState::Failed,
        ] {
            assert_eq!(BlobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(BlobState::parse("garbage"), None);
    }

    #[test]
    fn algorithm_string_roundtrip() {
        let alg = CipherAlgorithm::ChaCha20Poly1305;
        assert_eq!(CipherAlgorithm::parse(alg.as_str()), Some(alg));
        assert_eq!(CipherAlgorithm::parse("rot13"), None);
    }
}
