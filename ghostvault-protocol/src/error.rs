//! Error taxonomy shared by all vault crates.
//!
//! Component failures bubble unmodified to the vault service, which maps
//! them onto blob state transitions. The kind decides the handling:
//! transient errors are retried with backoff, everything else is terminal.

use thiserror::Error;

use crate::frame::FrameError;
use crate::types::BlobId;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Backend or network hiccup worth retrying with backoff. Surfaced to
    /// the caller only after retries are exhausted.
    #[error("transient failure: {reason}")]
    Transient { reason: String },

    /// Permanently absent. Not retryable.
    #[error("{what} not found")]
    NotFound { what: String },

    /// AEAD tag check failed: wrong key, corrupted payload, or tampering.
    /// Always surfaced distinctly so the caller can warn the user instead
    /// of rendering garbage.
    #[error("ciphertext failed authentication (wrong key, corruption, or tampering)")]
    AuthenticationFailure,

    /// No key was ever issued or unsealed for this blob on this device.
    /// Recoverable in principle (restore a sealed keystore), but decryption
    /// is impossible right now.
    #[error("key unavailable for blob {blob_id}, cannot decrypt")]
    KeyUnavailable { blob_id: BlobId },

    /// Bad input, rejected before any state transition begins.
    #[error("invalid input: {reason}")]
    Validation { reason: String },

    /// Malformed ciphertext framing.
    #[error("malformed ciphertext frame: {0}")]
    Frame(#[from] FrameError),

    /// Local registry fault.
    #[error("registry failure: {reason}")]
    Registry { reason: String },

    /// Sealed keystore fault.
    #[error("keystore failure: {reason}")]
    Keystore { reason: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl VaultError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Whether retrying with backoff can help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Decryption-integrity class: tag failure or missing key. Terminal,
    /// and worth a loud warning in any UI.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailure | Self::KeyUnavailable { .. }
        )
    }
}
