//! Authenticated encryption of blob payloads.
//!
//! Every call to [`encrypt`] draws a fresh random nonce, so encrypting the
//! same plaintext with the same key twice never produces correlatable
//! ciphertext. [`decrypt`] returns a distinct authentication failure on any
//! tag mismatch instead of emitting garbage.

use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;

use ghostvault_protocol::error::VaultError;
use ghostvault_protocol::frame::{decode_frame, encode_frame, NONCE_SIZE};

use crate::keys::BlobKey;

/// Encrypt a payload into a versioned ciphertext frame.
pub fn encrypt(plaintext: &[u8], key: &BlobKey) -> Result<Vec<u8>, VaultError> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| VaultError::validation("invalid key size"))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| VaultError::validation("payload cannot be encrypted"))?;

    Ok(encode_frame(&nonce_bytes, &ciphertext))
}

/// Decrypt a ciphertext frame back into plaintext.
///
/// Fails with [`VaultError::Frame`] on malformed framing and
/// [`VaultError::AuthenticationFailure`] when the tag check fails (wrong
/// key, corruption, or tampering).
pub fn decrypt(frame_bytes: &[u8], key: &BlobKey) -> Result<Vec<u8>, VaultError> {
    let frame = decode_frame(frame_bytes)?;

    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| VaultError::validation("invalid key size"))?;
    cipher
        .decrypt(Nonce::from_slice(&frame.nonce), frame.ciphertext)
        .map_err(|_| VaultError::AuthenticationFailure)
}
