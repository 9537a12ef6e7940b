//! Key management, authenticated encryption, and the sealed keystore.

pub mod codec;
pub mod keys;
pub mod keystore;
