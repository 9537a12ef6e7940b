//! Encrypted-blob lifecycle orchestration.
//!
//! [`service::VaultService`] composes the key manager, the AEAD codec, the
//! blob backend, and the durable registry into upload/retrieve/delete
//! operations. [`chat`] holds the wallet and inference collaborator seams.

pub mod chat;
pub mod service;

pub use service::{RetrievePhase, UploadPhase, VaultConfig, VaultEvent, VaultService};
