//! Ciphertext framing: `[version][nonce][AEAD ciphertext + tag]`.
//!
//! Frames are self-describing so decryption never needs out-of-band
//! algorithm negotiation. Decode rejects unknown versions and truncated
//! input before any AEAD work happens.

use thiserror::Error;

/// Current frame format version.
pub const FRAME_VERSION: u8 = 1;

/// Nonce length in bytes (96-bit, ChaCha20Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag length. A valid frame always carries the
/// version byte, a full nonce, and at least the tag.
pub const TAG_SIZE: usize = 16;

/// Minimum byte length of a well-formed frame.
pub const MIN_FRAME_SIZE: usize = 1 + NONCE_SIZE + TAG_SIZE;

/// Errors when decoding a ciphertext frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated: {len} bytes, need at least {MIN_FRAME_SIZE}")]
    Truncated { len: usize },
    #[error("unsupported frame version: {0}")]
    UnsupportedVersion(u8),
}

/// A decoded view into a ciphertext frame.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub nonce: [u8; NONCE_SIZE],
    /// AEAD ciphertext including the trailing tag.
    pub ciphertext: &'a [u8],
}

/// Assemble a frame from a nonce and AEAD ciphertext.
pub fn encode_frame(nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
    out.push(FRAME_VERSION);
    out.extend_from_slice(nonce);
    out.extend_from_slice(ciphertext);
    out
}

/// Split a frame back into nonce and ciphertext.
pub fn decode_frame(data: &[u8]) -> Result<Frame<'_>, FrameError> {
    if data.len() < MIN_FRAME_SIZE {
        return Err(FrameError::Truncated { len: data.len() });
    }
    if data[0] != FRAME_VERSION {
        return Err(FrameError::UnsupportedVersion(data[0]));
    }
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&data[1..1 + NONCE_SIZE]);
    Ok(Frame {
        nonce,
        ciphertext: &data[1 + NONCE_SIZE..],
    })
}
