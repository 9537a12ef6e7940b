//! Shared types, ciphertext framing, and error taxonomy for ghostvault.

pub mod blob;
pub mod error;
pub mod frame;
pub mod types;
