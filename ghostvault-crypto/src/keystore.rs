//! Sealed keystore: wrapped export of per-blob keys for device recovery.
//!
//! Keys are wrapped under a vault master key derived with HKDF-SHA256 from
//! the wallet session secret and a fixed domain-separation label. The
//! wrapped set is one postcard body encrypted as a single ciphertext frame,
//! so a second device holding the same wallet secret can re-derive the
//! master key and unseal. The session secret itself never touches disk.

use std::path::Path;

use anyhow::{Context, Result};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use ghostvault_protocol::error::VaultError;
use ghostvault_protocol::types::BlobId;

use crate::codec;
use crate::keys::{BlobKey, KeyManager, KEY_SIZE};

/// Domain-separation label for master key derivation.
const KEYSTORE_INFO: &[u8] = b"ghostvault-keystore-v1";

#[derive(Serialize, Deserialize)]
struct SealedEntry {
    id: BlobId,
    key: [u8; KEY_SIZE],
}

fn derive_master_key(session_secret: &[u8; 32]) -> BlobKey {
    let hk = Hkdf::<Sha256>::new(None, session_secret);
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(KEYSTORE_INFO, &mut okm)
        .expect("32-byte HKDF output is always valid");
    let key = BlobKey::from_bytes(okm);
    okm.zeroize();
    key
}

/// Seal every key the manager holds into an encrypted snapshot.
pub fn snapshot_sealed(
    manager: &KeyManager,
    session_secret: &[u8; 32],
) -> Result<Vec<u8>, VaultError> {
    let mut entries: Vec<SealedEntry> = manager
        .entries()
        .into_iter()
        .map(|(id, key)| SealedEntry {
            id,
            key: *key.as_bytes(),
        })
        .collect();

    let mut body = postcard::to_allocvec(&entries).map_err(|e| VaultError::Keystore {
        reason: format!("failed to encode keystore body: {e}"),
    })?;
    for entry in &mut entries {
        entry.key.zeroize();
    }

    let master = derive_master_key(session_secret);
    let sealed = codec::encrypt(&body, &master);
    body.zeroize();

    tracing::debug!(keys = manager.len(), "sealed keystore snapshot");
    sealed
}

/// Unseal a snapshot and load its keys into the manager.
///
/// Returns the number of keys restored. A wrong session secret surfaces as
/// [`VaultError::AuthenticationFailure`].
pub fn restore_sealed(
    manager: &KeyManager,
    sealed: &[u8],
    session_secret: &[u8; 32],
) -> Result<usize, VaultError> {
    let master = derive_master_key(session_secret);
    let mut body = codec::decrypt(sealed, &master)?;

    let entries: Vec<SealedEntry> =
        postcard::from_bytes(&body).map_err(|e| VaultError::Keystore {
            reason: format!("failed to decode keystore body: {e}"),
        })?;
    body.zeroize();

    let count = entries.len();
    for mut entry in entries {
        manager.insert(entry.id, BlobKey::from_bytes(entry.key));
        entry.key.zeroize();
    }

    tracing::info!(keys = count, "restored sealed keystore");
    Ok(count)
}

/// Seal the manager's keys and write the snapshot to `path`.
pub fn save(manager: &KeyManager, path: &Path, session_secret: &[u8; 32]) -> Result<()> {
    let sealed = snapshot_sealed(manager, session_secret)
        .context("failed to seal keystore snapshot")?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create keystore directory: {}", parent.display())
        })?;
    }
    std::fs::write(path, &sealed)
        .with_context(|| format!("failed to write keystore file: {}", path.display()))?;

    tracing::info!(path = %path.display(), "keystore saved");
    Ok(())
}

/// Read a sealed snapshot from `path` and load it into the manager.
pub fn load(manager: &KeyManager, path: &Path, session_secret: &[u8; 32]) -> Result<usize> {
    let sealed = std::fs::read(path)
        .with_context(|| format!("failed to read keystore file: {}", path.display()))?;
    let count = restore_sealed(manager, &sealed, session_secret)
        .with_context(|| format!("failed to unseal keystore: {}", path.display()))?;
    Ok(count)
}
