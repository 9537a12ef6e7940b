//! Per-blob encryption keys and the in-memory key manager.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use ghostvault_protocol::error::VaultError;
use ghostvault_protocol::types::BlobId;

/// Key length in bytes: 256 bits for ChaCha20Poly1305.
pub const KEY_SIZE: usize = 32;

/// Symmetric key for one blob.
///
/// Zeroed on drop. Never serialized in plaintext; wrapped export goes
/// through the sealed keystore.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct BlobKey([u8; KEY_SIZE]);

impl BlobKey {
    /// Generate a fresh cryptographically random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

// Key material must not end up in logs.
impl std::fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlobKey(..)")
    }
}

/// Holds per-blob keys in memory, keyed by blob id.
///
/// Thread-safe. An id with no entry is the "key unavailable" condition:
/// the registry row may exist (another device, restored database) but
/// decryption is impossible until a sealed keystore is restored.
#[derive(Default)]
pub struct KeyManager {
    keys: Mutex<HashMap<BlobId, BlobKey>>,
}

impl KeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh random key for a blob, replacing any previous one.
    pub fn issue_key(&self, blob_id: BlobId) -> BlobKey {
        let key = BlobKey::generate();
        self.keys.lock().unwrap().insert(blob_id, key.clone());
        tracing::debug!(blob_id = %blob_id, "issued blob key");
        key
    }

    /// Look up the key for a blob.
    pub fn key_for(&self, blob_id: BlobId) -> Result<BlobKey, VaultError> {
        self.keys
            .lock()
            .unwrap()
            .get(&blob_id)
            .cloned()
            .ok_or(VaultError::KeyUnavailable { blob_id })
    }

    /// Forget the key for a deleted blob.
    pub fn discard_key(&self, blob_id: BlobId) {
        if self.keys.lock().unwrap().remove(&blob_id).is_some() {
            tracing::debug!(blob_id = %blob_id, "discarded blob key");
        }
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().unwrap().is_empty()
    }

    /// Snapshot all held keys. Only the keystore should call this; the
    /// returned copies must be wrapped or zeroized promptly.
    pub(crate) fn entries(&self) -> Vec<(BlobId, BlobKey)> {
        self.keys
            .lock()
            .unwrap()
            .iter()
            .map(|(id, key)| (*id, key.clone()))
            .collect()
    }

    /// Insert a key recovered from a sealed keystore.
    pub(crate) fn insert(&self, blob_id: BlobId, key: BlobKey) {
        self.keys.lock().unwrap().insert(blob_id, key);
    }
}
